//! Frame event sink.
//!
//! Callback target the driver invokes once per delivered frame, on a thread
//! the driver owns. Outside a burst the frame is only forwarded toward the
//! preview display. During a burst the sink records the device timestamp,
//! fires the next software trigger itself, and advances the capture count —
//! the burst sustains its own trigger/capture loop from inside the callback,
//! so the frame rate is bounded by callback-to-trigger latency rather than a
//! fixed clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::machine::{GrabState, GrabStateCell};
use crate::session::{lock, BurstSession, StoredFrame};
use crate::traits::{CameraDevice, FrameSink, GrabResult};

/// Nanoseconds per second, for chunk timestamp conversion.
const NANOS_PER_SEC: f64 = 1e9;

/// The application's [`FrameSink`] implementation, registered with every
/// camera at attach time.
pub struct EventSink {
    state: Arc<GrabStateCell>,
    devices: Vec<Arc<dyn CameraDevice>>,
    burst: Mutex<Option<Arc<BurstSession>>>,
    trigger_wait: Duration,
}

impl EventSink {
    /// Build a sink reading the published state and re-triggering through
    /// the given device handles.
    #[must_use]
    pub fn new(
        state: Arc<GrabStateCell>,
        devices: Vec<Arc<dyn CameraDevice>>,
        trigger_wait: Duration,
    ) -> Self {
        Self {
            state,
            devices,
            burst: Mutex::new(None),
            trigger_wait,
        }
    }

    /// Install the session the next burst's callbacks will drive.
    pub fn begin_burst(&self, session: Arc<BurstSession>) {
        *lock(&self.burst) = Some(session);
    }

    fn active_burst(&self) -> Option<Arc<BurstSession>> {
        lock(&self.burst).clone()
    }

    /// Fire the trigger for `frame` on one camera, recording the host-side
    /// fire time. A trigger-ready timeout or trigger fault is parked in the
    /// session for the controller to re-raise.
    fn chain_next_trigger(
        &self,
        session: &BurstSession,
        camera_index: usize,
        device: &Arc<dyn CameraDevice>,
        frame: usize,
    ) {
        let armed = device
            .wait_for_trigger_ready(self.trigger_wait)
            .and_then(|()| device.execute_software_trigger());
        match armed {
            Ok(()) => {
                session.record_trigger(camera_index, frame);
                log::info!("camera {camera_index}: frame triggered    #{frame}");
            }
            Err(err) => session.record_fault(camera_index, err),
        }
    }
}

impl FrameSink for EventSink {
    fn on_frame_grabbed(&self, camera_index: usize, result: &GrabResult<'_>) {
        if self.state.load() != GrabState::Burst {
            // Preview frames go to the display only; counters stay untouched.
            log::debug!(
                "camera {camera_index}: preview frame {}x{}",
                result.width,
                result.height
            );
            return;
        }

        let Some(session) = self.active_burst() else {
            return;
        };
        let Some(device) = self.devices.get(camera_index) else {
            log::warn!("frame event from unknown camera {camera_index}");
            return;
        };

        let frame_index = session.captured(camera_index);
        if frame_index >= session.target() {
            log::warn!("camera {camera_index}: frame beyond burst target, dropped");
            return;
        }

        if result.succeeded() {
            log::info!("camera {camera_index}: frame grabbed      #{frame_index}");
            if let Some(nanos) = result.chunk_timestamp_ns {
                #[allow(clippy::cast_precision_loss)]
                let seconds = nanos as f64 / NANOS_PER_SEC;
                session.record_device_time(camera_index, frame_index, seconds);
            }
            if session.retains_frames() {
                session.store_frame(
                    camera_index,
                    frame_index,
                    StoredFrame {
                        data: result.data.to_vec(),
                        width: result.width,
                        height: result.height,
                    },
                );
            }
        } else {
            // Recoverable per frame: log the driver's description and move on.
            log::warn!(
                "camera {camera_index}: grab failed at frame {frame_index}: {}",
                result.error_description.unwrap_or("no description")
            );
        }

        let next = frame_index + 1;
        if next < session.target() {
            self.chain_next_trigger(&session, camera_index, device, next);
        }
        session.advance_captured(camera_index);
    }
}
