//! Camera sessions and shared burst state.
//!
//! A [`CameraSession`] is the per-device record created at attach time. A
//! [`BurstSession`] is the state of one in-flight burst: per-camera
//! trigger/capture counters, the timing table, retained frame payloads, and
//! the completion signaling the controller blocks on. It is owned by the
//! controller and shared with the frame event sink, which mutates it from
//! driver callback threads; every mutable field sits behind a mutex.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::timing::FrameTimeTable;
use crate::traits::{CameraDevice, CameraError, Result};

/// Acquire a mutex, recovering the data from a poisoned lock.
///
/// A panicking callback thread must not wedge the command thread, so
/// poisoning is treated as recoverable here.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One attached camera: the shared driver handle plus the attributes the
/// application derives from it once at startup.
pub struct CameraSession {
    index: usize,
    device: Arc<dyn CameraDevice>,
    serial: String,
    monochrome: bool,
}

impl CameraSession {
    /// Build a session record for the device at `index`.
    #[must_use]
    pub fn new(index: usize, device: Arc<dyn CameraDevice>) -> Self {
        let serial = device.serial_number();
        let monochrome = device.is_monochrome();
        Self {
            index,
            device,
            serial,
            monochrome,
        }
    }

    /// Camera index within the attached array.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The driver handle.
    #[must_use]
    pub fn device(&self) -> &Arc<dyn CameraDevice> {
        &self.device
    }

    /// Device serial number, captured at attach time.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Whether this sensor is monochrome.
    #[must_use]
    pub fn is_monochrome(&self) -> bool {
        self.monochrome
    }

    /// Export label for the sensor's color class.
    #[must_use]
    pub fn color_label(&self) -> &'static str {
        if self.monochrome {
            "BW"
        } else {
            "Color"
        }
    }
}

/// A frame payload retained for post-burst export.
#[derive(Debug, Clone)]
pub struct StoredFrame {
    /// Copied pixel bytes.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

#[derive(Debug, Default)]
struct Progress {
    triggered: usize,
    captured: usize,
    finished: bool,
    fault: Option<CameraError>,
}

#[derive(Debug, Default)]
struct CameraProgress {
    state: Mutex<Progress>,
    complete: Condvar,
}

/// Shared state of one burst.
///
/// Created fresh by the controller for every burst and handed to the frame
/// event sink, which advances it from driver callback threads. Counters and
/// the timing table are serialized by per-camera and table mutexes; the
/// controller awaits the per-camera condvars instead of polling grab status.
pub struct BurstSession {
    target: usize,
    epoch: Instant,
    cameras: Vec<CameraProgress>,
    table: Mutex<FrameTimeTable>,
    frames: Option<Vec<Mutex<Vec<Option<StoredFrame>>>>>,
}

impl BurstSession {
    /// Create the session for a burst of `target` frames on `cameras`
    /// cameras. When `retain_frames` is set, successful frame payloads are
    /// copied in for post-burst export.
    #[must_use]
    pub fn new(cameras: usize, target: usize, retain_frames: bool) -> Self {
        let frames = retain_frames.then(|| {
            (0..cameras)
                .map(|_| Mutex::new(vec![None; target]))
                .collect()
        });
        Self {
            target,
            epoch: Instant::now(),
            cameras: (0..cameras).map(|_| CameraProgress::default()).collect(),
            table: Mutex::new(FrameTimeTable::new(cameras, target)),
            frames,
        }
    }

    /// Burst frame target per camera.
    #[must_use]
    pub fn target(&self) -> usize {
        self.target
    }

    /// Number of cameras participating in the burst.
    #[must_use]
    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    /// Seconds elapsed on the host's monotonic clock since the burst epoch.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Record a fired trigger: bump the camera's trigger count and store the
    /// host-side fire time at `frame`.
    pub fn record_trigger(&self, camera: usize, frame: usize) {
        let seconds = self.elapsed_secs();
        if let Some(progress) = self.cameras.get(camera) {
            lock(&progress.state).triggered += 1;
        }
        lock(&self.table).record_host(camera, frame, seconds);
    }

    /// Store a device hardware timestamp, in seconds, at `frame`.
    pub fn record_device_time(&self, camera: usize, frame: usize, seconds: f64) {
        lock(&self.table).record_device(camera, frame, seconds);
    }

    /// Whether this session retains frame payloads for export.
    #[must_use]
    pub fn retains_frames(&self) -> bool {
        self.frames.is_some()
    }

    /// Copy a successful frame payload in for export, when retention is on.
    pub fn store_frame(&self, camera: usize, frame: usize, stored: StoredFrame) {
        let Some(frames) = &self.frames else {
            return;
        };
        if let Some(held) = frames.get(camera) {
            let mut held = lock(held);
            if let Some(slot) = held.get_mut(frame) {
                *slot = Some(stored);
            }
        }
    }

    /// Take the retained frames of one camera, leaving the slots empty.
    #[must_use]
    pub fn take_stored_frames(&self, camera: usize) -> Vec<Option<StoredFrame>> {
        self.frames
            .as_ref()
            .and_then(|frames| frames.get(camera))
            .map_or_else(Vec::new, |held| std::mem::take(&mut *lock(held)))
    }

    /// Frames captured so far on one camera.
    #[must_use]
    pub fn captured(&self, camera: usize) -> usize {
        self.cameras
            .get(camera)
            .map_or(0, |progress| lock(&progress.state).captured)
    }

    /// Triggers fired so far on one camera.
    #[must_use]
    pub fn triggered(&self, camera: usize) -> usize {
        self.cameras
            .get(camera)
            .map_or(0, |progress| lock(&progress.state).triggered)
    }

    /// Count one delivered frame. Marks the camera finished and signals the
    /// completion condvar when the target is reached. Returns the new count.
    pub fn advance_captured(&self, camera: usize) -> usize {
        let Some(progress) = self.cameras.get(camera) else {
            return 0;
        };
        let mut state = lock(&progress.state);
        state.captured += 1;
        if state.captured >= self.target {
            state.finished = true;
            progress.complete.notify_all();
        }
        state.captured
    }

    /// Park a fatal error for the controller and signal completion so the
    /// waiting side observes it immediately.
    pub fn record_fault(&self, camera: usize, error: CameraError) {
        let Some(progress) = self.cameras.get(camera) else {
            return;
        };
        let mut state = lock(&progress.state);
        log::error!("camera {camera}: burst fault: {error}");
        state.fault = Some(error);
        state.finished = true;
        progress.complete.notify_all();
    }

    /// Whether a camera has delivered its full target (or faulted).
    #[must_use]
    pub fn is_finished(&self, camera: usize) -> bool {
        self.cameras
            .get(camera)
            .is_some_and(|progress| lock(&progress.state).finished)
    }

    /// Block until a camera signals completion, with a bounded timeout.
    ///
    /// A fault recorded by the sink is re-raised here; an elapsed timeout
    /// maps to [`CameraError::BurstTimeout`].
    pub fn wait_camera_complete(&self, camera: usize, timeout: Duration) -> Result<()> {
        let Some(progress) = self.cameras.get(camera) else {
            return Ok(());
        };
        let deadline = Instant::now() + timeout;
        let mut state = lock(&progress.state);
        while !state.finished {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CameraError::BurstTimeout { camera, timeout });
            }
            let (next, _) = progress
                .complete
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        if let Some(fault) = state.fault.take() {
            return Err(fault);
        }
        Ok(())
    }

    /// Run a closure against the timing table.
    pub fn with_table<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&FrameTimeTable) -> T,
    {
        f(&lock(&self.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_captured_signals_completion_at_target() {
        let session = BurstSession::new(1, 2, false);
        assert!(!session.is_finished(0));

        session.advance_captured(0);
        assert!(!session.is_finished(0));

        session.advance_captured(0);
        assert!(session.is_finished(0));
        session
            .wait_camera_complete(0, Duration::from_millis(10))
            .expect("finished camera should complete immediately");
    }

    #[test]
    fn test_wait_times_out_when_never_finished() {
        let session = BurstSession::new(1, 3, false);
        let result = session.wait_camera_complete(0, Duration::from_millis(20));
        assert!(matches!(result, Err(CameraError::BurstTimeout { .. })));
    }

    #[test]
    fn test_fault_is_reraised_by_waiter() {
        let session = BurstSession::new(2, 3, false);
        session.record_fault(1, CameraError::TriggerTimeout { camera: 1 });

        let result = session.wait_camera_complete(1, Duration::from_millis(10));
        assert!(matches!(
            result,
            Err(CameraError::TriggerTimeout { camera: 1 })
        ));
    }

    #[test]
    fn test_trigger_records_host_time_and_count() {
        let session = BurstSession::new(1, 2, false);
        session.record_trigger(0, 0);
        assert_eq!(session.triggered(0), 1);
        let host = session.with_table(|table| table.host(0, 0));
        assert!(host.is_some());
    }

    #[test]
    fn test_frame_retention_is_opt_in() {
        let without = BurstSession::new(1, 1, false);
        without.store_frame(
            0,
            0,
            StoredFrame {
                data: vec![1, 2],
                width: 2,
                height: 1,
            },
        );
        assert!(without.take_stored_frames(0).is_empty());

        let with = BurstSession::new(1, 1, true);
        with.store_frame(
            0,
            0,
            StoredFrame {
                data: vec![1, 2],
                width: 2,
                height: 1,
            },
        );
        let stored = with.take_stored_frames(0);
        assert_eq!(stored.len(), 1);
        assert!(stored.first().and_then(Option::as_ref).is_some());
    }
}
