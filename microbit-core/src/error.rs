//! The closed set of failures the core reports.
//!
//! None of these are fatal: every one of them is handed back to the
//! front-end for display while the presence monitor keeps running.

use crate::hex::HexError;
use thiserror::Error;

/// Why a mount attempt did not produce a usable mount.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MountFailure {
    #[error("device is busy")]
    Busy,
    #[error("unsupported filesystem or corrupted device")]
    UnsupportedFilesystem,
    #[error("permission denied (mounting requires root)")]
    PermissionDenied,
    #[error("mount point is not accessible")]
    MountPointUnavailable,
}

/// Why an unmount attempt left the volume mounted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UnmountFailure {
    #[error("device is busy (close any files or programs using it)")]
    Busy,
    #[error("permission denied (unmounting requires root)")]
    PermissionDenied,
    #[error("unmount failed: {0}")]
    Os(String),
}

/// Failure of a manual mount/unmount toggle.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToggleError {
    #[error("no micro:bit connected")]
    NoDevice,
    #[error(transparent)]
    Unmount(#[from] UnmountFailure),
}

/// Why a transfer did not put the complete file on the board.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CopyError {
    #[error("micro:bit not mounted")]
    NotMounted,
    #[error("invalid HEX file: {0}")]
    InvalidHex(#[from] HexError),
    #[error("not enough space on micro:bit ({available} bytes free, need {required})")]
    InsufficientSpace { required: u64, available: u64 },
    #[error("copy incomplete: {actual}/{expected} bytes on the device")]
    Incomplete { expected: u64, actual: u64 },
    #[error("{detail}")]
    IoFailure { detail: String },
}

impl CopyError {
    /// Classifies an I/O error hit while writing to the board.
    pub(crate) fn io(context: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let cause = match err.kind() {
            ErrorKind::NotFound => "micro:bit disconnected during copy".to_string(),
            ErrorKind::PermissionDenied => {
                "permission denied, micro:bit may be read-only or disconnected".to_string()
            }
            ErrorKind::StorageFull => "no space left on micro:bit".to_string(),
            _ if err.raw_os_error() == Some(libc::EIO) => {
                "I/O error, micro:bit may have been disconnected".to_string()
            }
            _ => err.to_string(),
        };
        CopyError::IoFailure {
            detail: format!("{context}: {cause}"),
        }
    }
}
