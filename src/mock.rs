//! Simulated camera driver.
//!
//! Implements the [`CameraDevice`] boundary with a worker thread per camera
//! that plays the role of the vendor SDK's callback thread: it delivers
//! frames into the registered [`FrameSink`] either free-running (continuous
//! configuration) or one per software trigger (trigger configuration).
//! Frame buffers are drawn from the registered [`BufferFactory`] and
//! returned when grabbing stops.
//!
//! The binary's simulated mode and every test run against this driver;
//! failure injection covers the fatal paths (trigger-ready timeout, failed
//! grabs, missing chunk support).

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::buffer::{AcquisitionBuffer, BufferFactory};
use crate::session::lock;
use crate::traits::{
    AcquisitionMode, CameraDevice, CameraError, FrameSink, GrabLimit, GrabResult, GrabStatus,
    PixelFormat, Result,
};

/// Bytes per pixel of the simulated 12-bit sensor readout.
const BYTES_PER_PIXEL: usize = 2;

/// How often a waiting worker re-checks for stop requests.
const WORKER_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct CamState {
    // Configuration, set through the builder before the camera is shared.
    model: String,
    serial: String,
    monochrome: bool,
    chunk_supported: bool,
    width: u32,
    height: u32,
    frame_interval: Duration,
    capture_latency: Duration,
    ready_fail_at: Option<usize>,
    fail_grab_at: Option<usize>,

    // Runtime state.
    open: bool,
    gain_auto: bool,
    gain_db: f64,
    exposure_us: f64,
    pixel_format: Option<PixelFormat>,
    chunk_enabled: bool,
    pool_size: usize,
    mode: AcquisitionMode,
    grabbing: bool,
    stop_requested: bool,
    pending_triggers: usize,
    triggers_accepted: usize,
    limit: Option<usize>,
    delivered_in_grab: usize,
}

struct Inner {
    index: usize,
    epoch: Instant,
    state: Mutex<CamState>,
    cond: Condvar,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
    factory: Mutex<Option<Arc<BufferFactory>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Simulated camera standing in for one hardware device.
pub struct MockCamera {
    inner: Arc<Inner>,
}

impl MockCamera {
    /// Create a closed monochrome camera at `index` with default settings.
    #[must_use]
    pub fn new(index: usize) -> Self {
        let state = CamState {
            model: "MockCam-Mono".to_owned(),
            serial: format!("4000{index:04}"),
            monochrome: true,
            chunk_supported: true,
            width: 64,
            height: 48,
            frame_interval: Duration::from_millis(5),
            capture_latency: Duration::from_millis(1),
            ready_fail_at: None,
            fail_grab_at: None,
            open: false,
            gain_auto: true,
            gain_db: 0.0,
            exposure_us: 10_000.0,
            pixel_format: None,
            chunk_enabled: false,
            pool_size: 1,
            mode: AcquisitionMode::Continuous,
            grabbing: false,
            stop_requested: false,
            pending_triggers: 0,
            triggers_accepted: 0,
            limit: None,
            delivered_in_grab: 0,
        };
        Self {
            inner: Arc::new(Inner {
                index,
                epoch: Instant::now(),
                state: Mutex::new(state),
                cond: Condvar::new(),
                sink: Mutex::new(None),
                factory: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Set the sensor's color class.
    #[must_use]
    pub fn monochrome(self, value: bool) -> Self {
        {
            let mut state = lock(&self.inner.state);
            state.monochrome = value;
            if state.model.starts_with("MockCam-") {
                state.model = if value {
                    "MockCam-Mono".to_owned()
                } else {
                    "MockCam-Color".to_owned()
                };
            }
        }
        self
    }

    /// Override the model name.
    #[must_use]
    pub fn model(self, value: &str) -> Self {
        lock(&self.inner.state).model = value.to_owned();
        self
    }

    /// Override the serial number.
    #[must_use]
    pub fn serial(self, value: &str) -> Self {
        lock(&self.inner.state).serial = value.to_owned();
        self
    }

    /// Set the simulated sensor resolution.
    #[must_use]
    pub fn resolution(self, width: u32, height: u32) -> Self {
        let mut state = lock(&self.inner.state);
        state.width = width;
        state.height = height;
        drop(state);
        self
    }

    /// Remove chunk feature support, for the fatal-at-startup path.
    #[must_use]
    pub fn without_chunk_support(self) -> Self {
        lock(&self.inner.state).chunk_supported = false;
        self
    }

    /// Make the wait for trigger readiness time out once `count` triggers
    /// have been accepted.
    #[must_use]
    pub fn trigger_ready_failure_after(self, count: usize) -> Self {
        lock(&self.inner.state).ready_fail_at = Some(count);
        self
    }

    /// Deliver frame `index` of each grab as a failed grab.
    #[must_use]
    pub fn failed_grab_at(self, index: usize) -> Self {
        lock(&self.inner.state).fail_grab_at = Some(index);
        self
    }

    /// Set the free-running frame period.
    #[must_use]
    pub fn frame_interval(self, interval: Duration) -> Self {
        lock(&self.inner.state).frame_interval = interval;
        self
    }

    /// Set the trigger-to-delivery latency.
    #[must_use]
    pub fn capture_latency(self, latency: Duration) -> Self {
        lock(&self.inner.state).capture_latency = latency;
        self
    }

    /// Frames delivered by the current (or last finished) grab.
    #[must_use]
    pub fn delivered_frames(&self) -> usize {
        lock(&self.inner.state).delivered_in_grab
    }

    fn join_worker(&self) {
        if let Some(handle) = lock(&self.inner.worker).take() {
            if handle.join().is_err() {
                log::error!("camera {}: grab worker panicked", self.inner.index);
            }
        }
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.inner.state);
            state.stop_requested = true;
            self.inner.cond.notify_all();
        }
        self.join_worker();
    }
}

impl CameraDevice for MockCamera {
    fn open(&self) -> Result<()> {
        lock(&self.inner.state).open = true;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.stop_grabbing()?;
        lock(&self.inner.state).open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.inner.state).open
    }

    fn model_name(&self) -> String {
        lock(&self.inner.state).model.clone()
    }

    fn serial_number(&self) -> String {
        lock(&self.inner.state).serial.clone()
    }

    fn is_monochrome(&self) -> bool {
        lock(&self.inner.state).monochrome
    }

    fn set_pixel_format(&self, format: PixelFormat) -> Result<()> {
        lock(&self.inner.state).pixel_format = Some(format);
        Ok(())
    }

    fn disable_gain_auto(&self) -> Result<()> {
        lock(&self.inner.state).gain_auto = false;
        Ok(())
    }

    fn set_gain(&self, gain_db: f64) -> Result<()> {
        lock(&self.inner.state).gain_db = gain_db;
        Ok(())
    }

    fn gain(&self) -> Result<f64> {
        Ok(lock(&self.inner.state).gain_db)
    }

    fn set_exposure(&self, exposure_us: f64) -> Result<()> {
        lock(&self.inner.state).exposure_us = exposure_us;
        Ok(())
    }

    fn exposure(&self) -> Result<f64> {
        Ok(lock(&self.inner.state).exposure_us)
    }

    fn chunk_mode_supported(&self) -> bool {
        lock(&self.inner.state).chunk_supported
    }

    fn enable_chunk_timestamp(&self) -> Result<()> {
        let mut state = lock(&self.inner.state);
        if !state.chunk_supported {
            return Err(CameraError::Driver {
                camera: self.inner.index,
                description: "chunk mode is not supported".to_owned(),
            });
        }
        state.chunk_enabled = true;
        Ok(())
    }

    fn set_buffer_pool(&self, count: usize) -> Result<()> {
        lock(&self.inner.state).pool_size = count;
        Ok(())
    }

    fn register_sink(&self, sink: Arc<dyn FrameSink>) {
        *lock(&self.inner.sink) = Some(sink);
    }

    fn register_buffer_factory(&self, factory: Arc<BufferFactory>) {
        *lock(&self.inner.factory) = Some(factory);
    }

    fn configure(&self, mode: AcquisitionMode) -> Result<()> {
        lock(&self.inner.state).mode = mode;
        Ok(())
    }

    fn start_grabbing(&self, limit: GrabLimit) -> Result<()> {
        let index = self.inner.index;
        if lock(&self.inner.state).grabbing {
            return Err(CameraError::Driver {
                camera: index,
                description: "grabbing already in progress".to_owned(),
            });
        }
        // Reap the worker of a previous bounded grab that ran to its limit.
        self.join_worker();

        let sink = lock(&self.inner.sink)
            .clone()
            .ok_or_else(|| CameraError::Driver {
                camera: index,
                description: "no frame sink registered".to_owned(),
            })?;
        let factory = lock(&self.inner.factory)
            .clone()
            .ok_or_else(|| CameraError::Driver {
                camera: index,
                description: "no buffer factory registered".to_owned(),
            })?;

        let mut state = lock(&self.inner.state);
        if !state.open {
            return Err(CameraError::Driver {
                camera: index,
                description: "camera is not open".to_owned(),
            });
        }

        let frame_size = (state.width as usize) * (state.height as usize) * BYTES_PER_PIXEL;
        let pool_size = state.pool_size.max(1);
        let buffers = allocate_pool(&factory, pool_size, frame_size)?;

        state.grabbing = true;
        state.stop_requested = false;
        state.pending_triggers = 0;
        state.triggers_accepted = 0;
        state.delivered_in_grab = 0;
        state.limit = match limit {
            GrabLimit::Unbounded => None,
            GrabLimit::Frames(count) => Some(count),
        };
        let mode = state.mode;
        drop(state);

        let worker = GrabWorker {
            inner: Arc::clone(&self.inner),
            sink,
            factory,
            buffers,
        };
        let handle = thread::Builder::new()
            .name(format!("camera-{index}-grab"))
            .spawn(move || worker.run(mode))
            .map_err(CameraError::Io)?;
        *lock(&self.inner.worker) = Some(handle);
        Ok(())
    }

    fn stop_grabbing(&self) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            state.stop_requested = true;
            self.inner.cond.notify_all();
        }
        self.join_worker();
        let mut state = lock(&self.inner.state);
        state.grabbing = false;
        state.stop_requested = false;
        Ok(())
    }

    fn is_grabbing(&self) -> bool {
        lock(&self.inner.state).grabbing
    }

    fn wait_for_trigger_ready(&self, timeout: Duration) -> Result<()> {
        let camera = self.inner.index;
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.inner.state);
        loop {
            if !state.grabbing || state.mode != AcquisitionMode::SoftwareTrigger {
                return Err(CameraError::Driver {
                    camera,
                    description: "camera is not armed for software triggering".to_owned(),
                });
            }
            if state.ready_fail_at == Some(state.triggers_accepted) {
                return Err(CameraError::TriggerTimeout { camera });
            }
            let below_limit = state.limit.is_none_or(|limit| state.triggers_accepted < limit);
            if state.pending_triggers == 0 && below_limit {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CameraError::TriggerTimeout { camera });
            }
            let (next, _) = self
                .inner
                .cond
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    fn execute_software_trigger(&self) -> Result<()> {
        let mut state = lock(&self.inner.state);
        if !state.grabbing || state.mode != AcquisitionMode::SoftwareTrigger {
            return Err(CameraError::Driver {
                camera: self.inner.index,
                description: "software trigger while not armed".to_owned(),
            });
        }
        state.pending_triggers += 1;
        state.triggers_accepted += 1;
        self.inner.cond.notify_all();
        Ok(())
    }
}

fn allocate_pool(
    factory: &Arc<BufferFactory>,
    count: usize,
    frame_size: usize,
) -> Result<Vec<AcquisitionBuffer>> {
    let mut buffers = Vec::with_capacity(count);
    for _ in 0..count {
        match factory.allocate(frame_size) {
            Ok(buffer) => buffers.push(buffer),
            Err(err) => {
                // Unwind the partial pool before re-raising.
                release_pool(factory, buffers);
                return Err(err);
            }
        }
    }
    Ok(buffers)
}

fn release_pool(factory: &Arc<BufferFactory>, buffers: Vec<AcquisitionBuffer>) {
    for buffer in buffers {
        if let Err(err) = factory.free(buffer) {
            log::error!("failed to release pool buffer: {err}");
        }
    }
}

/// State owned by one grab's worker thread.
struct GrabWorker {
    inner: Arc<Inner>,
    sink: Arc<dyn FrameSink>,
    factory: Arc<BufferFactory>,
    buffers: Vec<AcquisitionBuffer>,
}

impl GrabWorker {
    fn run(mut self, mode: AcquisitionMode) {
        match mode {
            AcquisitionMode::Continuous => self.run_continuous(),
            AcquisitionMode::SoftwareTrigger => self.run_triggered(),
        }
        {
            let mut state = lock(&self.inner.state);
            state.grabbing = false;
            self.inner.cond.notify_all();
        }
        let buffers = std::mem::take(&mut self.buffers);
        release_pool(&self.factory, buffers);
    }

    fn run_continuous(&mut self) {
        let mut sequence = 0usize;
        loop {
            let interval = lock(&self.inner.state).frame_interval;
            if self.wait_or_stop(interval) {
                return;
            }
            self.deliver(sequence);
            sequence += 1;
            let state = lock(&self.inner.state);
            if state.limit.is_some_and(|limit| sequence >= limit) {
                return;
            }
        }
    }

    fn run_triggered(&mut self) {
        let mut sequence = 0usize;
        loop {
            {
                let mut state = lock(&self.inner.state);
                while state.pending_triggers == 0 && !state.stop_requested {
                    let (next, _) = self
                        .inner
                        .cond
                        .wait_timeout(state, WORKER_POLL)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = next;
                }
                if state.stop_requested {
                    return;
                }
                state.pending_triggers -= 1;
            }

            let latency = lock(&self.inner.state).capture_latency;
            if !latency.is_zero() {
                thread::sleep(latency);
            }
            self.deliver(sequence);
            sequence += 1;

            let state = lock(&self.inner.state);
            if state.limit.is_some_and(|limit| sequence >= limit) {
                return;
            }
        }
    }

    /// Sleep `duration`, returning early (true) when a stop is requested.
    fn wait_or_stop(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = lock(&self.inner.state);
        while !state.stop_requested {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (next, _) = self
                .inner
                .cond
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        true
    }

    fn deliver(&mut self, sequence: usize) {
        let (width, height, chunk_live, fail_at) = {
            let state = lock(&self.inner.state);
            (
                state.width,
                state.height,
                state.chunk_supported && state.chunk_enabled,
                state.fail_grab_at,
            )
        };

        let slot = sequence % self.buffers.len().max(1);
        let Some(buffer) = self.buffers.get_mut(slot) else {
            return;
        };
        #[allow(clippy::cast_possible_truncation)]
        let fill = (sequence & 0xFF) as u8;
        buffer.bytes_mut().fill(fill);

        let failed = fail_at == Some(sequence);
        #[allow(clippy::cast_possible_truncation)]
        let chunk_timestamp_ns =
            (chunk_live && !failed).then(|| self.inner.epoch.elapsed().as_nanos() as u64);

        let result = GrabResult {
            status: if failed {
                GrabStatus::Failed
            } else {
                GrabStatus::Succeeded
            },
            data: buffer.bytes(),
            buffer_context: buffer.context_id(),
            width,
            height,
            image_size: buffer.bytes().len(),
            chunk_timestamp_ns,
            error_description: failed.then_some("simulated grab failure"),
        };
        self.sink.on_frame_grabbed(self.inner.index, &result);

        lock(&self.inner.state).delivered_in_grab = sequence + 1;
    }
}

/// Build `count` simulated cameras, alternating monochrome and color
/// sensors the way a mixed rig would attach.
#[must_use]
pub fn simulated_rig(count: usize) -> Vec<Arc<dyn CameraDevice>> {
    (0..count)
        .map(|index| {
            let camera: Arc<dyn CameraDevice> =
                Arc::new(MockCamera::new(index).monochrome(index % 2 == 0));
            camera
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        frames: AtomicUsize,
        failures: AtomicUsize,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
            })
        }

        fn frames(&self) -> usize {
            self.frames.load(Ordering::SeqCst)
        }
    }

    impl FrameSink for CountingSink {
        fn on_frame_grabbed(&self, _camera_index: usize, result: &GrabResult<'_>) {
            if result.succeeded() {
                self.frames.fetch_add(1, Ordering::SeqCst);
            } else {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn armed_camera(sink: &Arc<CountingSink>) -> (MockCamera, Arc<BufferFactory>) {
        let camera = MockCamera::new(0)
            .frame_interval(Duration::from_millis(2))
            .capture_latency(Duration::from_millis(1));
        let factory = Arc::new(BufferFactory::new());
        camera.register_sink(Arc::clone(sink) as Arc<dyn FrameSink>);
        camera.register_buffer_factory(Arc::clone(&factory));
        camera.open().expect("open should succeed");
        (camera, factory)
    }

    #[test]
    fn test_continuous_grab_delivers_frames_until_stopped() {
        let sink = CountingSink::new();
        let (camera, _factory) = armed_camera(&sink);
        camera
            .configure(AcquisitionMode::Continuous)
            .expect("configure should succeed");
        camera
            .start_grabbing(GrabLimit::Unbounded)
            .expect("start should succeed");
        assert!(camera.is_grabbing());

        thread::sleep(Duration::from_millis(30));
        camera.stop_grabbing().expect("stop should succeed");
        assert!(!camera.is_grabbing());
        assert!(sink.frames() > 2, "expected several preview frames");
    }

    #[test]
    fn test_triggered_grab_delivers_one_frame_per_trigger() {
        let sink = CountingSink::new();
        let (camera, _factory) = armed_camera(&sink);
        camera
            .configure(AcquisitionMode::SoftwareTrigger)
            .expect("configure should succeed");
        camera
            .start_grabbing(GrabLimit::Frames(3))
            .expect("start should succeed");

        for _ in 0..3 {
            camera
                .wait_for_trigger_ready(Duration::from_secs(1))
                .expect("camera should become trigger ready");
            camera
                .execute_software_trigger()
                .expect("trigger should fire");
            // Wait for the frame to land before re-arming.
            let deadline = Instant::now() + Duration::from_secs(1);
            while camera.is_grabbing() && lock(&camera.inner.state).pending_triggers > 0 {
                assert!(Instant::now() < deadline, "frame never delivered");
                thread::sleep(Duration::from_millis(1));
            }
        }

        // Bounded grab stops on its own after the last frame.
        let deadline = Instant::now() + Duration::from_secs(1);
        while camera.is_grabbing() {
            assert!(Instant::now() < deadline, "bounded grab never finished");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink.frames(), 3);
        assert_eq!(camera.delivered_frames(), 3);
    }

    #[test]
    fn test_trigger_ready_timeout_injection() {
        let sink = CountingSink::new();
        let camera = MockCamera::new(1).trigger_ready_failure_after(0);
        let factory = Arc::new(BufferFactory::new());
        camera.register_sink(Arc::clone(&sink) as Arc<dyn FrameSink>);
        camera.register_buffer_factory(Arc::clone(&factory));
        camera.open().expect("open should succeed");
        camera
            .configure(AcquisitionMode::SoftwareTrigger)
            .expect("configure should succeed");
        camera
            .start_grabbing(GrabLimit::Frames(2))
            .expect("start should succeed");

        let result = camera.wait_for_trigger_ready(Duration::from_millis(50));
        assert!(matches!(
            result,
            Err(CameraError::TriggerTimeout { camera: 1 })
        ));
        camera.stop_grabbing().expect("stop should succeed");
    }

    #[test]
    fn test_pool_buffers_are_returned_on_stop() {
        let sink = CountingSink::new();
        let (camera, factory) = armed_camera(&sink);
        camera.set_buffer_pool(4).expect("pool should be set");
        camera
            .configure(AcquisitionMode::Continuous)
            .expect("configure should succeed");
        camera
            .start_grabbing(GrabLimit::Unbounded)
            .expect("start should succeed");
        assert_eq!(factory.live_count(), 4);

        camera.stop_grabbing().expect("stop should succeed");
        assert_eq!(factory.live_count(), 0);
        assert_eq!(factory.allocated_count(), factory.freed_count());
        factory.audit().expect("audit should pass");
    }

    #[test]
    fn test_start_requires_sink_and_factory() {
        let camera = MockCamera::new(0);
        camera.open().expect("open should succeed");
        let result = camera.start_grabbing(GrabLimit::Unbounded);
        assert!(matches!(result, Err(CameraError::Driver { .. })));
    }

    #[test]
    fn test_chunk_enable_fails_without_support() {
        let camera = MockCamera::new(0).without_chunk_support();
        camera.open().expect("open should succeed");
        assert!(!camera.chunk_mode_supported());
        assert!(camera.enable_chunk_timestamp().is_err());
    }

    #[test]
    fn test_failed_grab_injection_reports_description() {
        let sink = CountingSink::new();
        let (camera, _factory) = armed_camera(&sink);
        let camera = camera.failed_grab_at(0);
        camera
            .configure(AcquisitionMode::Continuous)
            .expect("configure should succeed");
        camera
            .start_grabbing(GrabLimit::Frames(2))
            .expect("start should succeed");

        let deadline = Instant::now() + Duration::from_secs(1);
        while camera.is_grabbing() {
            assert!(Instant::now() < deadline, "bounded grab never finished");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink.failures.load(Ordering::SeqCst), 1);
        assert_eq!(sink.frames(), 1);
    }
}
