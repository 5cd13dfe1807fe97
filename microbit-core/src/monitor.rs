//! Background presence polling.
//!
//! A single thread samples the device tree once per [`POLL_INTERVAL`], turns
//! consecutive samples into [`PresenceEvent`]s, and reconciles the mount
//! state on every edge. Front-ends read the outcome from a shared
//! [`PresenceStatus`] on their own schedule; there is no event queue.
//!
//! [`POLL_INTERVAL`]: crate::config::POLL_INTERVAL

use crate::config::POLL_INTERVAL;
use crate::device::{DeviceProbe, DeviceState};
use crate::mount::{MountController, MountState, Mounter};
use log::{debug, info, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A controller shared between the monitor and the front-end. The mutex is
/// the single-writer guard for the mount point.
pub type SharedController<P, M> = Arc<Mutex<MountController<P, M>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    Attached,
    Detached,
}

/// Turns a stream of samples into edges.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    last: Option<DeviceState>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sample` and returns the edge it completes, if any.
    ///
    /// The very first sample counts as an edge from `Absent`. A device that
    /// reappears under a different block path between two samples is
    /// reported as `Attached`, since the new path still needs mounting.
    pub fn observe(&mut self, sample: &DeviceState) -> Option<PresenceEvent> {
        let previous = self.last.replace(sample.clone());
        match (previous.as_ref().unwrap_or(&DeviceState::Absent), sample) {
            (DeviceState::Absent, DeviceState::Present(_)) => Some(PresenceEvent::Attached),
            (DeviceState::Present(_), DeviceState::Absent) => Some(PresenceEvent::Detached),
            (DeviceState::Present(old), DeviceState::Present(new)) if old != new => {
                Some(PresenceEvent::Attached)
            }
            _ => None,
        }
    }
}

/// What the front-end sees of the monitor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceStatus {
    pub device: DeviceState,
    pub mount: MountState,
    /// The most recent edge, kept until the next one.
    pub last_event: Option<PresenceEvent>,
    /// Incremented on every edge, so a reader can tell whether anything
    /// happened since it last looked.
    pub event_count: u64,
    /// Completed polls.
    pub polls: u64,
}

impl Default for PresenceStatus {
    fn default() -> Self {
        Self {
            device: DeviceState::Absent,
            mount: MountState::Unmounted,
            last_event: None,
            event_count: 0,
            polls: 0,
        }
    }
}

/// One poll: probe, detect an edge, reconcile on it, publish.
///
/// The controller lock is held for the whole iteration so that a manual
/// mount toggle cannot interleave with a reconcile.
pub fn poll_once<P: DeviceProbe, M: Mounter>(
    controller: &Mutex<MountController<P, M>>,
    tracker: &mut PresenceTracker,
    status: &RwLock<PresenceStatus>,
) -> Option<PresenceEvent> {
    let mut controller = match controller.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let sample = controller.probe();
    let event = tracker.observe(&sample);
    if let Some(event) = event {
        info!("micro:bit {event:?}: {sample}");
        controller.reconcile(&sample);
    } else {
        debug!("Poll: {sample}, {}", controller.state());
    }

    let mut status = match status.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    status.device = sample;
    status.mount = controller.state().clone();
    if event.is_some() {
        status.last_event = event;
        status.event_count += 1;
    }
    status.polls += 1;
    event
}

/// Handle to the polling thread.
///
/// Stopping is cooperative: the thread finishes the poll it is in, including
/// any mount or unmount, before it exits. Dropping the handle stops it too.
pub struct PresenceMonitor {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PresenceMonitor {
    /// Starts polling every [`POLL_INTERVAL`].
    pub fn spawn<P, M>(
        controller: SharedController<P, M>,
        status: Arc<RwLock<PresenceStatus>>,
    ) -> io::Result<Self>
    where
        P: DeviceProbe + 'static,
        M: Mounter + 'static,
    {
        Self::spawn_with_interval(controller, status, POLL_INTERVAL)
    }

    pub(crate) fn spawn_with_interval<P, M>(
        controller: SharedController<P, M>,
        status: Arc<RwLock<PresenceStatus>>,
        interval: Duration,
    ) -> io::Result<Self>
    where
        P: DeviceProbe + 'static,
        M: Mounter + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();

        let handle = thread::Builder::new()
            .name("presence-monitor".into())
            .spawn(move || {
                let mut tracker = PresenceTracker::new();
                while r.load(Ordering::SeqCst) {
                    poll_once(&controller, &mut tracker, &status);

                    let deadline = Instant::now() + interval;
                    while r.load(Ordering::SeqCst) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::park_timeout(deadline - now);
                    }
                }
                debug!("Presence monitor stopped");
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Asks the thread to stop and waits for its current poll to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("Presence monitor thread panicked");
            }
        }
    }
}

impl Drop for PresenceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
