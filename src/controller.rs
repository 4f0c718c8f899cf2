//! Burst/preview controller.
//!
//! Issues start/stop-grabbing calls, pushes the shared gain/exposure
//! setpoints to every attached camera, and orchestrates timed bursts: fan
//! out the first software trigger per camera, let the frame event sink
//! chain the rest, then block on each camera's completion signal.

use std::sync::Arc;
use std::time::Duration;

use crate::export::ExportConfig;
use crate::session::{BurstSession, CameraSession};
use crate::sink::EventSink;
use crate::traits::{AcquisitionMode, GrabLimit, Result};
use crate::{export, timing};

/// Gain adjustment step in dB.
pub const GAIN_STEP_DB: f64 = 3.0;

/// Upper gain bound in dB.
pub const GAIN_MAX_DB: f64 = 23.79;

/// Value the gain resets to when a step would exceed [`GAIN_MAX_DB`].
///
/// Not a saturate-at-max: the overflow drops back one step below the
/// ceiling.
pub const GAIN_OVERFLOW_RESET_DB: f64 = 21.0;

/// Geometric exposure step, 2^0.25.
pub const EXPOSURE_STEP: f64 = 1.189_207_11;

/// Exposure multiplier applied to color (non-monochrome) sensors.
pub const COLOR_EXPOSURE_MULTIPLIER: f64 = 2.5;

/// Startup exposure in microseconds.
pub const DEFAULT_EXPOSURE_US: f64 = 10_000.0;

/// Startup gain in dB.
pub const DEFAULT_GAIN_DB: f64 = 0.0;

/// Frames per camera in a default burst.
pub const DEFAULT_BURST_TARGET: usize = 15;

/// Buffer pool size while previewing, independent of the burst target.
const PREVIEW_BUFFER_POOL: usize = 2;

/// Bound on each wait for trigger readiness.
const TRIGGER_READY_TIMEOUT: Duration = Duration::from_secs(1);

/// Fixed slack added to the burst completion bound.
const BURST_COMPLETION_MARGIN: Duration = Duration::from_secs(2);

/// Direction of a gain or exposure adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Increase the setpoint.
    Up,
    /// Decrease the setpoint.
    Down,
}

/// Coordinates all camera sessions through mode changes and parameter
/// pushes. Mode-changing operations are invoked only by the state machine.
pub struct Controller {
    sessions: Vec<CameraSession>,
    sink: Arc<EventSink>,
    gain_db: f64,
    exposure_us: f64,
    burst_target: usize,
    burst_counter: u32,
    export: Option<ExportConfig>,
    last_burst: Option<Arc<BurstSession>>,
}

impl Controller {
    /// Build a controller over the attached sessions.
    #[must_use]
    pub fn new(sessions: Vec<CameraSession>, sink: Arc<EventSink>) -> Self {
        Self {
            sessions,
            sink,
            gain_db: DEFAULT_GAIN_DB,
            exposure_us: DEFAULT_EXPOSURE_US,
            burst_target: DEFAULT_BURST_TARGET,
            burst_counter: 0,
            export: None,
            last_burst: None,
        }
    }

    /// Current shared gain setpoint in dB.
    #[must_use]
    pub fn gain_db(&self) -> f64 {
        self.gain_db
    }

    /// Current shared exposure setpoint in microseconds.
    #[must_use]
    pub fn exposure_us(&self) -> f64 {
        self.exposure_us
    }

    /// Frames per camera the next burst will capture.
    #[must_use]
    pub fn burst_target(&self) -> usize {
        self.burst_target
    }

    /// Override the burst frame target.
    pub fn set_burst_target(&mut self, target: usize) {
        self.burst_target = target;
    }

    /// Bursts completed so far in this run.
    #[must_use]
    pub fn burst_counter(&self) -> u32 {
        self.burst_counter
    }

    /// Enable post-burst raw export.
    pub fn set_export(&mut self, config: Option<ExportConfig>) {
        self.export = config;
    }

    /// The attached sessions.
    #[must_use]
    pub fn sessions(&self) -> &[CameraSession] {
        &self.sessions
    }

    /// The most recently run burst session, if any.
    #[must_use]
    pub fn last_burst(&self) -> Option<&Arc<BurstSession>> {
        self.last_burst.as_ref()
    }

    /// Exposure actually pushed to one session: the shared setpoint, scaled
    /// for color sensors.
    fn applied_exposure(&self, session: &CameraSession) -> f64 {
        if session.is_monochrome() {
            self.exposure_us
        } else {
            self.exposure_us * COLOR_EXPOSURE_MULTIPLIER
        }
    }

    /// Stop grabbing, reopen if needed, and push the current settings to
    /// one session.
    fn prepare_session(&self, session: &CameraSession) -> Result<()> {
        let device = session.device();
        if device.is_grabbing() {
            device.stop_grabbing()?;
        }
        if !device.is_open() {
            device.open()?;
        }
        device.disable_gain_auto()?;
        device.set_gain(self.gain_db)?;
        device.set_exposure(self.applied_exposure(session))?;
        Ok(())
    }

    /// Enter continuous free-running acquisition on every camera.
    pub fn start_preview(&mut self) -> Result<()> {
        log::info!("preview: start");
        for session in &self.sessions {
            self.prepare_session(session)?;
            let device = session.device();
            device.set_buffer_pool(PREVIEW_BUFFER_POOL)?;
            device.configure(AcquisitionMode::Continuous)?;
            device.start_grabbing(GrabLimit::Unbounded)?;
        }
        Ok(())
    }

    /// Stop grabbing on every camera. Idempotent.
    pub fn stop_preview(&mut self) -> Result<()> {
        for session in &self.sessions {
            let device = session.device();
            if device.is_grabbing() {
                device.stop_grabbing()?;
            }
        }
        Ok(())
    }

    /// Run one timed burst to completion.
    ///
    /// Arms every camera for software-triggered acquisition bounded to the
    /// burst target, fires the first trigger per camera, and waits for the
    /// completion signal the sink raises when the last frame lands. Any
    /// trigger-ready timeout is fatal and propagates.
    pub fn burst_grab(&mut self) -> Result<()> {
        let target = self.burst_target;
        if target == 0 {
            log::warn!("burst target is zero, nothing to grab");
            return Ok(());
        }
        log::info!(
            "burst: {target} frames on {} cameras",
            self.sessions.len()
        );

        for cam in &self.sessions {
            self.prepare_session(cam)?;
            let device = cam.device();
            device.set_buffer_pool(target)?;
            device.configure(AcquisitionMode::SoftwareTrigger)?;
            device.start_grabbing(GrabLimit::Frames(target))?;
        }

        // Install the session only once every camera is stopped and re-armed;
        // no frame can arrive before the first trigger, so a stale callback
        // from a previous burst can never land in this one.
        let session = Arc::new(BurstSession::new(
            self.sessions.len(),
            target,
            self.export.is_some(),
        ));
        self.sink.begin_burst(Arc::clone(&session));
        self.last_burst = Some(Arc::clone(&session));

        // Initial fan-out: one trigger per camera; the sink chains the rest.
        for cam in &self.sessions {
            let device = cam.device();
            device.wait_for_trigger_ready(TRIGGER_READY_TIMEOUT)?;
            device.execute_software_trigger()?;
            session.record_trigger(cam.index(), 0);
            log::info!("camera {}: frame triggered    #0", cam.index());
        }

        let timeout = Self::completion_timeout(target);
        for cam in &self.sessions {
            session.wait_camera_complete(cam.index(), timeout)?;
        }

        session.with_table(|table| Self::log_report(table));
        if let Some(config) = &self.export {
            let written = export::write_burst(config, &self.sessions, &session, self.burst_counter)?;
            log::info!("burst {}: exported {written} frames", self.burst_counter);
        }
        self.burst_counter += 1;
        Ok(())
    }

    /// Bound on waiting for one camera's burst completion: one trigger-ready
    /// allowance per frame plus fixed slack.
    fn completion_timeout(target: usize) -> Duration {
        TRIGGER_READY_TIMEOUT
            .saturating_mul(u32::try_from(target).unwrap_or(u32::MAX))
            .saturating_add(BURST_COMPLETION_MARGIN)
    }

    fn log_report(table: &timing::FrameTimeTable) {
        for line in table.report().lines() {
            log::info!("{line}");
        }
    }

    /// Step the shared gain and push it to every camera.
    ///
    /// Steps above [`GAIN_MAX_DB`] reset to [`GAIN_OVERFLOW_RESET_DB`]
    /// instead of saturating; steps below zero clamp to zero.
    pub fn gain_adjust(&mut self, direction: Direction) -> Result<()> {
        match direction {
            Direction::Up => {
                self.gain_db += GAIN_STEP_DB;
                if self.gain_db > GAIN_MAX_DB {
                    self.gain_db = GAIN_OVERFLOW_RESET_DB;
                }
            }
            Direction::Down => {
                self.gain_db -= GAIN_STEP_DB;
                if self.gain_db < 0.0 {
                    self.gain_db = 0.0;
                }
            }
        }
        for session in &self.sessions {
            session.device().set_gain(self.gain_db)?;
        }
        log::info!("camera gain: {} dB", self.gain_db);
        Ok(())
    }

    /// Step the shared exposure geometrically and push it to every camera,
    /// scaled for color sensors.
    pub fn exposure_adjust(&mut self, direction: Direction) -> Result<()> {
        match direction {
            Direction::Up => self.exposure_us *= EXPOSURE_STEP,
            Direction::Down => self.exposure_us /= EXPOSURE_STEP,
        }
        for session in &self.sessions {
            let applied = self.applied_exposure(session);
            session.device().set_exposure(applied)?;
            log::info!(
                "camera {} {} exposure: {applied} us",
                session.index(),
                session.color_label()
            );
        }
        Ok(())
    }

    /// No driver side effects; teardown runs as an external cleanup pass
    /// once the state machine reaches its terminal state.
    pub fn quit(&mut self) {
        log::info!("quit requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{GrabState, GrabStateCell};
    use crate::mock::MockCamera;
    use crate::traits::CameraDevice;
    use std::sync::Arc;

    fn rig(monochrome: &[bool]) -> Controller {
        let devices: Vec<Arc<dyn CameraDevice>> = monochrome
            .iter()
            .enumerate()
            .map(|(index, &mono)| {
                let camera: Arc<dyn CameraDevice> =
                    Arc::new(MockCamera::new(index).monochrome(mono));
                camera.open().expect("open should succeed");
                camera
            })
            .collect();
        let state = Arc::new(GrabStateCell::new(GrabState::Preview));
        let sink = Arc::new(EventSink::new(
            Arc::clone(&state),
            devices.clone(),
            Duration::from_secs(1),
        ));
        for device in &devices {
            device.register_sink(Arc::clone(&sink) as Arc<dyn crate::traits::FrameSink>);
            device.register_buffer_factory(Arc::new(crate::buffer::BufferFactory::new()));
        }
        let sessions = devices
            .iter()
            .enumerate()
            .map(|(index, device)| CameraSession::new(index, Arc::clone(device)))
            .collect();
        Controller::new(sessions, sink)
    }

    #[test]
    fn test_gain_ladder_resets_on_overflow() {
        let mut controller = rig(&[true]);
        // 0 -> 3 -> ... -> 21 are plain steps.
        for expected in [3.0, 6.0, 9.0, 12.0, 15.0, 18.0, 21.0] {
            controller
                .gain_adjust(Direction::Up)
                .expect("gain adjust should succeed");
            assert!((controller.gain_db() - expected).abs() < 1e-12);
        }
        // 21 + 3 = 24 exceeds 23.79 and resets to exactly 21.0.
        controller
            .gain_adjust(Direction::Up)
            .expect("gain adjust should succeed");
        assert!((controller.gain_db() - GAIN_OVERFLOW_RESET_DB).abs() < 1e-12);
        assert!(controller.gain_db() <= GAIN_MAX_DB);
    }

    #[test]
    fn test_gain_floor_saturates_at_zero() {
        let mut controller = rig(&[true]);
        controller
            .gain_adjust(Direction::Down)
            .expect("gain adjust should succeed");
        assert!((controller.gain_db() - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_gain_is_pushed_to_every_camera() {
        let mut controller = rig(&[true, false]);
        controller
            .gain_adjust(Direction::Up)
            .expect("gain adjust should succeed");
        for session in controller.sessions() {
            let applied = session.device().gain().expect("gain should be readable");
            assert!((applied - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_exposure_steps_are_reciprocal() {
        let mut controller = rig(&[true]);
        let original = controller.exposure_us();
        controller
            .exposure_adjust(Direction::Up)
            .expect("exposure adjust should succeed");
        controller
            .exposure_adjust(Direction::Down)
            .expect("exposure adjust should succeed");
        assert!((controller.exposure_us() - original).abs() < 1e-6);
    }

    #[test]
    fn test_color_sessions_get_scaled_exposure() {
        let mut controller = rig(&[true, false]);
        controller
            .exposure_adjust(Direction::Up)
            .expect("exposure adjust should succeed");

        let shared = controller.exposure_us();
        let sessions = controller.sessions();
        let mono = sessions
            .first()
            .expect("mono session should exist")
            .device()
            .exposure()
            .expect("exposure should be readable");
        let color = sessions
            .get(1)
            .expect("color session should exist")
            .device()
            .exposure()
            .expect("exposure should be readable");
        assert!((mono - shared).abs() < 1e-9);
        assert!((color - shared * COLOR_EXPOSURE_MULTIPLIER).abs() < 1e-9);
    }

    #[test]
    fn test_start_preview_begins_unbounded_grabbing() {
        let mut controller = rig(&[true]);
        controller
            .start_preview()
            .expect("start_preview should succeed");
        let device = Arc::clone(
            controller
                .sessions()
                .first()
                .expect("session should exist")
                .device(),
        );
        assert!(device.is_grabbing());

        controller
            .stop_preview()
            .expect("stop_preview should succeed");
        assert!(!device.is_grabbing());
        // Idempotent.
        controller
            .stop_preview()
            .expect("stop_preview should be idempotent");
    }
}
