//! Copying a HEX file onto the mounted board.
//!
//! A transfer is a sequence of checks followed by a plain byte copy:
//! 1.  The board must be mounted.
//! 2.  The file must be valid Intel HEX.
//! 3.  The board must have room for it.
//!
//! The first failing check ends the transfer before anything is written.
//! After the copy the destination is stat'ed again, because a board pulled
//! mid-write does not always produce a write error.
use crate::device::CandidateFile;
use crate::error::CopyError;
use crate::hex;
use crate::mount::MountState;
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

const BUFFER_SIZE: usize = 64 * 1024; // 64 KiB

/// Bytes written on success.
pub type CopyResult = Result<u64, CopyError>;

/// Free space lookup for a mounted filesystem.
pub trait FreeSpace {
    fn available_bytes(&self, mount_point: &Path) -> io::Result<u64>;
}

/// Validates, checks and copies HEX files onto the board.
pub struct CopyEngine<S> {
    space: S,
}

impl<S: FreeSpace> CopyEngine<S> {
    pub fn new(space: S) -> Self {
        Self { space }
    }

    /// Copies `candidate` to the root of the mounted board under its own
    /// file name. Blocks until the data is on the device. Never retries.
    pub fn transfer(&self, candidate: &CandidateFile, mount: &MountState) -> CopyResult {
        self.transfer_with_progress(candidate, mount, |_| {}, |_| {})
    }

    /// Same as [`transfer`], reporting progress through callbacks.
    ///
    /// * `on_copy_start` - Called once all checks have passed, with the number
    ///   of bytes about to be copied.
    /// * `on_copy_progress` - Called after each chunk with the total number of
    ///   bytes written so far.
    ///
    /// [`transfer`]: CopyEngine::transfer
    pub fn transfer_with_progress<F>(
        &self,
        candidate: &CandidateFile,
        mount: &MountState,
        on_copy_start: impl FnOnce(u64),
        mut on_copy_progress: F,
    ) -> CopyResult
    where
        F: FnMut(u64),
    {
        let Some(mounted) = mount.mounted() else {
            return Err(CopyError::NotMounted);
        };

        let summary = hex::validate(&candidate.path)?;
        debug!(
            "{} is valid: {} records, {} data bytes",
            candidate.path.display(),
            summary.records,
            summary.data_bytes
        );

        let mount_point = mounted.mount_point();
        let available = self
            .space
            .available_bytes(mount_point)
            .map_err(|e| CopyError::io("checking free space", &e))?;
        if available < candidate.size {
            return Err(CopyError::InsufficientSpace {
                required: candidate.size,
                available,
            });
        }

        let Some(file_name) = candidate.file_name() else {
            return Err(CopyError::IoFailure {
                detail: format!("{} has no file name", candidate.path.display()),
            });
        };
        let dest_path = mount_point.join(file_name);

        let mut source = File::open(&candidate.path)
            .map_err(|e| CopyError::io("reading source file", &e))?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // Synchronous writes make a pulled board fail the write rather than
        // the page cache flush.
        #[cfg(unix)]
        options.custom_flags(libc::O_SYNC);
        let mut dest = options
            .open(&dest_path)
            .map_err(|e| CopyError::io("creating file on micro:bit", &e))?;

        on_copy_start(candidate.size);

        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = source
                .read(&mut buffer)
                .map_err(|e| CopyError::io("reading source file", &e))?;
            if n == 0 {
                break;
            }
            dest.write_all(&buffer[..n])
                .map_err(|e| CopyError::io("writing to micro:bit", &e))?;
            written += n as u64;
            on_copy_progress(written);
        }

        dest.flush()
            .and_then(|()| dest.sync_all())
            .map_err(|e| CopyError::io("flushing to micro:bit", &e))?;
        drop(dest);

        let actual = fs::metadata(&dest_path)
            .map_err(|e| CopyError::io("checking copied file", &e))?
            .len();
        if actual != candidate.size {
            return Err(CopyError::Incomplete {
                expected: candidate.size,
                actual,
            });
        }

        info!(
            "Copied {} to {} ({} bytes)",
            candidate.path.display(),
            dest_path.display(),
            written
        );
        Ok(written)
    }
}
