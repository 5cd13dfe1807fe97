//! The core, UI-agnostic library for `microbit-manager`.
//!
//! `microbit-core` keeps track of a micro:bit that can be plugged in or pulled
//! out at any moment, keeps its mass-storage volume mounted at a fixed mount
//! point while it is attached, and copies Intel HEX files onto it safely. Any
//! front-end (the `microbit-manager` CLI, a TUI, a GUI) polls it for state and
//! asks it to do things; the library never calls back.
//!
//! The library is structured into several key modules:
//! - [`device`]: Device identity, presence samples and the [`DeviceProbe`] seam.
//! - [`mount`]: The [`MountController`] state machine that owns the mount point.
//! - [`monitor`]: The background [`PresenceMonitor`] that polls and reconciles.
//! - [`mod@hex`]: Structural validation of Intel HEX files.
//! - [`transfer`]: The [`CopyEngine`] that puts a validated file on the board.
//! - [`details`]: Read-only board information from `DETAILS.TXT`.
//! - [`platform`]: Linux implementations of the probe, mounter and free-space seams.
//! - [`manager`]: The [`Manager`] facade tying all of the above together.
//!
//! ## Example: Flashing a File
//!
//! ```rust,no_run
//! use microbit_core::{CandidateFile, Config, Manager};
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let mut manager = Manager::system(Config::default());
//!     manager.start_monitor()?;
//!
//!     // The front-end found this file in the user's downloads.
//!     let candidate = CandidateFile::from_path("/home/me/Downloads/blinky.hex")?;
//!
//!     if let Err(reason) = manager.validate_file(&candidate.path) {
//!         println!("Not flashing: {reason}");
//!         return Ok(());
//!     }
//!
//!     let written = manager.transfer_file_with_progress(
//!         &candidate,
//!         |total| println!("Copying {total} bytes"),
//!         |done| println!("{done} bytes written"),
//!     )?;
//!     println!("Flashed {written} bytes.");
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod details;
pub mod device;
pub mod error;
pub mod hex;
pub mod manager;
pub mod monitor;
pub mod mount;
pub mod platform;
pub mod transfer;

pub use config::{Config, MICROBIT, MOUNT_POINT, POLL_INTERVAL};
pub use device::{CandidateFile, DeviceIdentity, DeviceProbe, DeviceState};
pub use error::{CopyError, MountFailure, ToggleError, UnmountFailure};
pub use hex::{HexError, HexSummary, ValidationResult};
pub use manager::Manager;
pub use monitor::{PresenceEvent, PresenceMonitor, PresenceStatus};
pub use mount::{MountController, MountState, Mounted, Mounter};
pub use transfer::{CopyEngine, CopyResult, FreeSpace};
