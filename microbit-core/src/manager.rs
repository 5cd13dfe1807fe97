//! The surface a front-end talks to.
//!
//! [`Manager`] wires a probe, a mounter and a free-space source into one
//! mount controller, runs the presence monitor over it, and exposes the
//! pull-style calls a UI makes on every render tick. Nothing here calls back
//! into the UI.

use crate::device::{CandidateFile, DeviceProbe, DeviceState};
use crate::error::ToggleError;
use crate::hex::{self, ValidationResult};
use crate::monitor::{PresenceMonitor, PresenceStatus, SharedController};
use crate::mount::{MountController, MountState, Mounter};
use crate::transfer::{CopyEngine, CopyResult, FreeSpace};
use log::info;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

#[cfg(target_os = "linux")]
use crate::{
    config::Config,
    platform::{StatvfsSpace, SysfsProbe, SystemMounter},
};

/// Dropping a manager stops its monitor.
pub struct Manager<P, M, S> {
    controller: SharedController<P, M>,
    status: Arc<RwLock<PresenceStatus>>,
    engine: CopyEngine<S>,
    monitor: Option<PresenceMonitor>,
}

#[cfg(target_os = "linux")]
impl Manager<SysfsProbe, SystemMounter, StatvfsSpace> {
    /// A manager for the real board on this machine.
    pub fn system(config: Config) -> Self {
        let mounter = SystemMounter::new(&config);
        let mount_point = config.mount_point.clone();
        Self::new(SysfsProbe::new(config), mounter, StatvfsSpace, mount_point)
    }
}

impl<P, M, S> Manager<P, M, S>
where
    P: DeviceProbe + 'static,
    M: Mounter + 'static,
    S: FreeSpace,
{
    pub fn new(probe: P, mounter: M, space: S, mount_point: impl Into<PathBuf>) -> Self {
        let controller = MountController::new(probe, mounter, mount_point);
        let status = PresenceStatus {
            mount: controller.state().clone(),
            ..PresenceStatus::default()
        };
        Self {
            controller: Arc::new(Mutex::new(controller)),
            status: Arc::new(RwLock::new(status)),
            engine: CopyEngine::new(space),
            monitor: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MountController<P, M>> {
        match self.controller.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, mount: &MountState) {
        let mut status = match self.status.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        status.mount = mount.clone();
    }

    /// Starts background polling. Does nothing if it is already running.
    pub fn start_monitor(&mut self) -> io::Result<()> {
        if self.monitor.is_none() {
            self.monitor = Some(PresenceMonitor::spawn(
                self.controller.clone(),
                self.status.clone(),
            )?);
        }
        Ok(())
    }

    /// Stops background polling after its current iteration.
    pub fn stop_monitor(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
    }

    /// Latest presence and mount state as published by the monitor.
    pub fn status(&self) -> PresenceStatus {
        match self.status.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Probes the device tree right now.
    pub fn probe_device(&self) -> DeviceState {
        self.lock().probe()
    }

    pub fn mount_state(&self) -> MountState {
        self.lock().state().clone()
    }

    /// Mounts the attached board or unmounts it, depending on the current
    /// state. Waits for any in-flight poll to finish first.
    pub fn request_mount_toggle(&self) -> Result<MountState, ToggleError> {
        let mut controller = self.lock();
        let state = if controller.state().is_mounted() {
            controller.ensure_unmounted()?
        } else {
            match controller.probe() {
                DeviceState::Present(block_path) => controller.ensure_mounted(&block_path),
                DeviceState::Absent => return Err(ToggleError::NoDevice),
            }
        };
        info!("Manual toggle: {state}");
        self.publish(&state);
        Ok(state)
    }

    /// Mounts the attached board unless it already is.
    pub fn mount(&self) -> Result<MountState, ToggleError> {
        let mut controller = self.lock();
        let state = match controller.probe() {
            DeviceState::Present(block_path) => controller.ensure_mounted(&block_path),
            DeviceState::Absent => return Err(ToggleError::NoDevice),
        };
        self.publish(&state);
        Ok(state)
    }

    /// Unmounts the board if it is mounted.
    pub fn unmount(&self) -> Result<MountState, ToggleError> {
        let state = self.lock().ensure_unmounted()?;
        self.publish(&state);
        Ok(state)
    }

    pub fn validate_file(&self, path: &Path) -> ValidationResult {
        hex::validate(path)
    }

    /// Copies `candidate` onto the board.
    ///
    /// The mount state is sampled once up front; the copy itself runs without
    /// holding the controller lock so that polling carries on meanwhile. If
    /// the board goes away mid-copy the result says so.
    pub fn transfer_file(&self, candidate: &CandidateFile) -> CopyResult {
        self.transfer_file_with_progress(candidate, |_| {}, |_| {})
    }

    pub fn transfer_file_with_progress<F>(
        &self,
        candidate: &CandidateFile,
        on_copy_start: impl FnOnce(u64),
        on_copy_progress: F,
    ) -> CopyResult
    where
        F: FnMut(u64),
    {
        let mount = self.mount_state();
        self.engine
            .transfer_with_progress(candidate, &mount, on_copy_start, on_copy_progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MountFailure, UnmountFailure};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Board {
        device: Mutex<Option<PathBuf>>,
    }

    impl DeviceProbe for Board {
        fn probe(&self) -> DeviceState {
            match self.device.lock().unwrap().clone() {
                Some(path) => DeviceState::Present(path),
                None => DeviceState::Absent,
            }
        }
    }

    struct NoopMounter;

    impl Mounter for NoopMounter {
        fn mount(&self, _: &Path, _: &Path) -> Result<(), MountFailure> {
            Ok(())
        }

        fn unmount(&self, _: &Path) -> Result<(), UnmountFailure> {
            Ok(())
        }

        fn mounted_source(&self, _: &Path) -> Option<PathBuf> {
            None
        }
    }

    struct Plenty;

    impl FreeSpace for Plenty {
        fn available_bytes(&self, _: &Path) -> io::Result<u64> {
            Ok(u64::MAX)
        }
    }

    #[test]
    fn toggle_without_a_board_reports_no_device() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::new(Arc::new(Board::default()), NoopMounter, Plenty, dir.path());
        assert_eq!(manager.request_mount_toggle(), Err(ToggleError::NoDevice));
        assert_eq!(manager.mount_state(), MountState::Unmounted);
    }

    #[test]
    fn toggle_flips_between_mounted_and_unmounted() {
        let dir = tempfile::tempdir().unwrap();
        let board = Arc::new(Board::default());
        *board.device.lock().unwrap() = Some("/dev/sdx1".into());
        let manager = Manager::new(board.clone(), NoopMounter, Plenty, dir.path().join("mnt"));

        assert!(manager.request_mount_toggle().unwrap().is_mounted());
        assert!(manager.status().mount.is_mounted());

        assert_eq!(manager.request_mount_toggle(), Ok(MountState::Unmounted));
        assert_eq!(manager.status().mount, MountState::Unmounted);
    }

    #[test]
    fn transfer_needs_a_mount() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.hex");
        std::fs::write(&path, ":00000001FF\n").unwrap();
        let candidate = CandidateFile::from_path(&path).unwrap();

        let manager = Manager::new(
            Arc::new(Board::default()),
            NoopMounter,
            Plenty,
            dir.path().join("mnt"),
        );
        assert!(manager.validate_file(&path).is_ok());
        assert_eq!(
            manager.transfer_file(&candidate),
            Err(crate::error::CopyError::NotMounted)
        );
    }

    /// Holds the first mount until released and records the order of mount
    /// table changes, flagging any two that run at the same time.
    struct Recorder {
        entered: mpsc::Sender<()>,
        release: Mutex<mpsc::Receiver<()>>,
        busy: AtomicBool,
        overlapped: AtomicBool,
        log: Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn begin(&self, what: &'static str) {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.log.lock().unwrap().push(what);
        }

        fn end(&self, what: &'static str) {
            self.log.lock().unwrap().push(what);
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    impl Mounter for Recorder {
        fn mount(&self, _: &Path, _: &Path) -> Result<(), MountFailure> {
            self.begin("mount");
            self.entered.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            self.end("mounted");
            Ok(())
        }

        fn unmount(&self, _: &Path) -> Result<(), UnmountFailure> {
            self.begin("unmount");
            self.end("unmounted");
            Ok(())
        }

        fn mounted_source(&self, _: &Path) -> Option<PathBuf> {
            None
        }
    }

    #[test]
    fn toggle_waits_for_the_monitor_to_finish_mounting() {
        let dir = tempfile::tempdir().unwrap();
        let board = Arc::new(Board::default());
        *board.device.lock().unwrap() = Some("/dev/sdx1".into());

        let (entered_tx, entered) = mpsc::channel();
        let (release, release_rx) = mpsc::channel();
        let recorder = Arc::new(Recorder {
            entered: entered_tx,
            release: Mutex::new(release_rx),
            busy: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
        });

        let mut manager = Manager::new(board, recorder.clone(), Plenty, dir.path().join("mnt"));
        manager.start_monitor().unwrap();
        // The first poll sees the board attach and is now inside mount.
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        thread::scope(|s| {
            let toggle = s.spawn(|| manager.request_mount_toggle());
            thread::sleep(Duration::from_millis(50));
            assert!(!toggle.is_finished(), "toggle ran during a reconcile");

            release.send(()).unwrap();
            // The reconcile mounted the board, so the toggle unmounts it.
            assert_eq!(toggle.join().unwrap(), Ok(MountState::Unmounted));
        });

        manager.stop_monitor();
        assert!(!recorder.overlapped.load(Ordering::SeqCst));
        assert_eq!(
            *recorder.log.lock().unwrap(),
            vec!["mount", "mounted", "unmount", "unmounted"]
        );
        assert_eq!(manager.status().mount, MountState::Unmounted);
    }

    #[test]
    fn unmount_waits_for_the_monitor_to_finish_mounting() {
        let dir = tempfile::tempdir().unwrap();
        let board = Arc::new(Board::default());
        *board.device.lock().unwrap() = Some("/dev/sdx1".into());

        let (entered_tx, entered) = mpsc::channel();
        let (release, release_rx) = mpsc::channel();
        let recorder = Arc::new(Recorder {
            entered: entered_tx,
            release: Mutex::new(release_rx),
            busy: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
        });

        let mut manager = Manager::new(board, recorder.clone(), Plenty, dir.path().join("mnt"));
        manager.start_monitor().unwrap();
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        thread::scope(|s| {
            let unmount = s.spawn(|| manager.unmount());
            thread::sleep(Duration::from_millis(50));
            assert!(!unmount.is_finished(), "unmount ran during a reconcile");

            release.send(()).unwrap();
            assert_eq!(unmount.join().unwrap(), Ok(MountState::Unmounted));
        });

        manager.stop_monitor();
        assert!(!recorder.overlapped.load(Ordering::SeqCst));
        assert_eq!(
            *recorder.log.lock().unwrap(),
            vec!["mount", "mounted", "unmount", "unmounted"]
        );
    }
}
