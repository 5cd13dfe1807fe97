//! Ownership of the fixed mount point.
//!
//! [`MountController`] is the only thing in the crate that mounts or unmounts
//! the board. It never mounts a block path it has not just seen reported as
//! present by its [`DeviceProbe`], so a stale or caller-supplied path cannot
//! end up mounted.

use crate::device::{DeviceProbe, DeviceState};
use crate::error::{MountFailure, UnmountFailure};
use log::{debug, info, warn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// The platform operations behind mounting, so the state machine can be
/// driven without privileges in tests.
pub trait Mounter: Send {
    /// Mounts `source` at `target`. The target directory already exists.
    fn mount(&self, source: &Path, target: &Path) -> Result<(), MountFailure>;

    /// Unmounts whatever is mounted at `target`. Succeeds if nothing is.
    fn unmount(&self, target: &Path) -> Result<(), UnmountFailure>;

    /// The block device currently mounted at `target`, according to the
    /// system mount table.
    fn mounted_source(&self, target: &Path) -> Option<PathBuf>;
}

impl<M: Mounter + Sync + ?Sized> Mounter for std::sync::Arc<M> {
    fn mount(&self, source: &Path, target: &Path) -> Result<(), MountFailure> {
        (**self).mount(source, target)
    }

    fn unmount(&self, target: &Path) -> Result<(), UnmountFailure> {
        (**self).unmount(target)
    }

    fn mounted_source(&self, target: &Path) -> Option<PathBuf> {
        (**self).mounted_source(target)
    }
}

/// An established mount. Only [`MountController`] can create one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mounted {
    mount_point: PathBuf,
    block_path: PathBuf,
}

impl Mounted {
    pub(crate) fn new(mount_point: impl Into<PathBuf>, block_path: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            block_path: block_path.into(),
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn block_path(&self) -> &Path {
        &self.block_path
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounted(Mounted),
    MountFailed(MountFailure),
}

impl MountState {
    pub fn is_mounted(&self) -> bool {
        matches!(self, MountState::Mounted(_))
    }

    pub fn mounted(&self) -> Option<&Mounted> {
        match self {
            MountState::Mounted(mounted) => Some(mounted),
            _ => None,
        }
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountState::Unmounted => write!(f, "not mounted"),
            MountState::Mounted(m) => write!(
                f,
                "mounted {} at {}",
                m.block_path.display(),
                m.mount_point.display()
            ),
            MountState::MountFailed(reason) => write!(f, "mount failed: {reason}"),
        }
    }
}

/// Owns the mount state for one mount point.
///
/// Every method takes `&mut self`; sharing a controller between the presence
/// monitor and the front-end means putting it behind a mutex, which is what
/// serializes mount table changes.
pub struct MountController<P, M> {
    probe: P,
    mounter: M,
    mount_point: PathBuf,
    state: MountState,
}

impl<P: DeviceProbe, M: Mounter> MountController<P, M> {
    /// Creates a controller, adopting or cleaning up whatever a previous run
    /// left mounted at `mount_point`.
    ///
    /// An existing mount is kept if its source is the device the probe sees
    /// right now. Anything else mounted there is stale and is unmounted on a
    /// best-effort basis.
    pub fn new(probe: P, mounter: M, mount_point: impl Into<PathBuf>) -> Self {
        let mut controller = Self {
            probe,
            mounter,
            mount_point: mount_point.into(),
            state: MountState::Unmounted,
        };

        if let Some(source) = controller.mounter.mounted_source(&controller.mount_point) {
            match controller.probe.probe() {
                DeviceState::Present(path) if path == source => {
                    info!(
                        "Found {} already mounted at {}",
                        source.display(),
                        controller.mount_point.display()
                    );
                    controller.state =
                        MountState::Mounted(Mounted::new(controller.mount_point.clone(), source));
                }
                _ => {
                    info!(
                        "Removing stale mount of {} at {}",
                        source.display(),
                        controller.mount_point.display()
                    );
                    controller.release();
                }
            }
        }

        controller
    }

    pub fn state(&self) -> &MountState {
        &self.state
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Probes the device tree. Does not change the mount state.
    pub fn probe(&self) -> DeviceState {
        self.probe.probe()
    }

    /// Makes sure `block_path` is mounted at the mount point.
    ///
    /// A no-op if it already is. The path is only mounted if a fresh probe
    /// reports that exact device as present; otherwise the state is returned
    /// unchanged. Mount errors become [`MountState::MountFailed`].
    pub fn ensure_mounted(&mut self, block_path: &Path) -> MountState {
        if let MountState::Mounted(mounted) = &self.state {
            if mounted.block_path == block_path {
                return self.state.clone();
            }
        }

        match self.probe.probe() {
            DeviceState::Present(observed) if observed == block_path => {}
            observed => {
                warn!(
                    "Not mounting {}: probe reports {observed}",
                    block_path.display()
                );
                return self.state.clone();
            }
        }

        if let MountState::Mounted(previous) = &self.state {
            debug!(
                "Replacing mount of {} with {}",
                previous.block_path.display(),
                block_path.display()
            );
            self.release();
        }

        self.state = match self.mount(block_path) {
            Ok(()) => {
                info!(
                    "Mounted {} at {}",
                    block_path.display(),
                    self.mount_point.display()
                );
                MountState::Mounted(Mounted::new(self.mount_point.clone(), block_path))
            }
            Err(reason) => {
                warn!("Failed to mount {}: {reason}", block_path.display());
                MountState::MountFailed(reason)
            }
        };
        self.state.clone()
    }

    fn mount(&self, block_path: &Path) -> Result<(), MountFailure> {
        fs::create_dir_all(&self.mount_point).map_err(|e| {
            warn!(
                "Cannot create mount point {}: {e}",
                self.mount_point.display()
            );
            MountFailure::MountPointUnavailable
        })?;
        self.mounter.mount(block_path, &self.mount_point)
    }

    /// Makes sure nothing is mounted at the mount point.
    ///
    /// A no-op unless currently mounted. On failure the state stays
    /// `Mounted`; retrying is up to the caller.
    pub fn ensure_unmounted(&mut self) -> Result<MountState, UnmountFailure> {
        if !self.state.is_mounted() {
            return Ok(self.state.clone());
        }

        self.mounter.unmount(&self.mount_point).map_err(|e| {
            warn!("Failed to unmount {}: {e}", self.mount_point.display());
            e
        })?;
        info!("Unmounted {}", self.mount_point.display());
        self.state = MountState::Unmounted;
        Ok(self.state.clone())
    }

    /// Brings the mount state in line with a freshly observed device state.
    ///
    /// A present device is mounted through [`ensure_mounted`]. An absent one
    /// forces the state to `Unmounted`: the unmount is still attempted to
    /// clear the mount table, but its outcome is only logged because the
    /// device is already gone.
    ///
    /// [`ensure_mounted`]: MountController::ensure_mounted
    pub fn reconcile(&mut self, device: &DeviceState) -> MountState {
        match device {
            DeviceState::Present(block_path) => self.ensure_mounted(block_path),
            DeviceState::Absent => {
                if self.state.is_mounted()
                    || self.mounter.mounted_source(&self.mount_point).is_some()
                {
                    self.release();
                }
                self.state = MountState::Unmounted;
                self.state.clone()
            }
        }
    }

    /// Best-effort unmount that always leaves the state `Unmounted`.
    fn release(&mut self) {
        if let Err(e) = self.mounter.unmount(&self.mount_point) {
            warn!(
                "Ignoring failed unmount of {}: {e}",
                self.mount_point.display()
            );
        }
        self.state = MountState::Unmounted;
    }
}
