//! Device identity, presence samples and the files offered for flashing.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A USB vendor/product pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    /// Returns true if the hexadecimal strings read from sysfs (`idVendor`,
    /// `idProduct`) name this identity.
    pub fn matches(&self, vendor: &str, product: &str) -> bool {
        let parse = |s: &str| u16::from_str_radix(s.trim().trim_start_matches("0x"), 16).ok();
        parse(vendor) == Some(self.vendor_id) && parse(product) == Some(self.product_id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// The result of a single probe of the device tree.
///
/// This is recomputed on every poll and never cached beyond the last sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Absent,
    /// The board is attached and exposes this block device node.
    Present(PathBuf),
}

impl DeviceState {
    pub fn is_present(&self) -> bool {
        matches!(self, DeviceState::Present(_))
    }

    pub fn block_path(&self) -> Option<&Path> {
        match self {
            DeviceState::Present(path) => Some(path),
            DeviceState::Absent => None,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Absent => write!(f, "disconnected"),
            DeviceState::Present(path) => write!(f, "connected ({})", path.display()),
        }
    }
}

/// Read-only view of the device tree, answering "is the board attached?".
///
/// Implementations must never mount or modify anything, and must report a
/// failed enumeration as [`DeviceState::Absent`] rather than an error:
/// callers poll continuously and a transient failure must not stop them.
/// When several matching devices exist the first one found wins.
pub trait DeviceProbe: Send {
    fn probe(&self) -> DeviceState;
}

impl<P: DeviceProbe + Sync + ?Sized> DeviceProbe for std::sync::Arc<P> {
    fn probe(&self) -> DeviceState {
        (**self).probe()
    }
}

/// A file the user may choose to flash. The front-end finds these by
/// scanning the downloads directory; the core only reads them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Size in bytes at the time of the scan.
    pub size: u64,
    pub modified: SystemTime,
}

impl CandidateFile {
    /// Stats `path` and builds a candidate from it.
    pub fn from_path(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified()?,
            path,
        })
    }

    /// The file's base name, which is also its name on the board.
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }
}
