//! Provides platform-specific functionality.
//!
//! This module contains the implementations of the core's seams that talk to
//! the operating system: finding the board in the device tree, mounting and
//! unmounting it, and asking the mounted filesystem for free space.
//!
//! Only Linux is supported; the mount point and the sysfs layout are Linux
//! concepts.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;
