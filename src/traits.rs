//! Core traits and types for the camera driver boundary.
//!
//! The real acquisition hardware lives behind a vendor SDK that owns its own
//! callback threads. Everything the rest of the crate needs from that SDK is
//! expressed here as two capability traits: [`CameraDevice`] for control-plane
//! operations and [`FrameSink`] for frame delivery.

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::BufferFactory;

/// Pixel format selected per camera at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 12-bit monochrome.
    Mono12,
    /// 12-bit Bayer mosaic (GB phase), used by color sensors.
    BayerGB12,
}

/// Acquisition configuration installed before grabbing starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Free-running continuous acquisition, used for live preview.
    Continuous,
    /// One frame per software trigger, used for timed bursts.
    SoftwareTrigger,
}

/// Frame-count bound passed to [`CameraDevice::start_grabbing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabLimit {
    /// Grab until explicitly stopped.
    Unbounded,
    /// Grab exactly this many frames, then stop.
    Frames(usize),
}

/// Completion status of a single delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStatus {
    /// The frame was captured and its buffer holds valid pixel data.
    Succeeded,
    /// The driver reported a failed grab; see the error description.
    Failed,
}

/// A single delivered frame, borrowed from the driver for the duration of
/// the callback.
///
/// The buffer bytes belong to the driver's pool; a sink that needs the data
/// past the callback must copy it.
#[derive(Debug)]
pub struct GrabResult<'a> {
    /// Whether the grab succeeded.
    pub status: GrabStatus,
    /// Raw pixel bytes for this frame.
    pub data: &'a [u8],
    /// Context id of the pool buffer holding the data.
    pub buffer_context: u64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Payload size in bytes.
    pub image_size: usize,
    /// Hardware timestamp chunk in nanoseconds, when the camera delivered one.
    pub chunk_timestamp_ns: Option<u64>,
    /// Driver-supplied description accompanying a failed grab.
    pub error_description: Option<&'a str>,
}

impl GrabResult<'_> {
    /// Whether this frame completed successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == GrabStatus::Succeeded
    }
}

/// Error type for acquisition operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// No camera present at startup.
    #[error("no camera present")]
    NoDevices,

    /// The attached device cannot deliver chunk timestamps.
    #[error("camera {camera} does not support chunk features")]
    ChunkUnsupported {
        /// Index of the offending camera.
        camera: usize,
    },

    /// A wait for trigger readiness exceeded its bound.
    #[error("timed out waiting for trigger ready on camera {camera}")]
    TriggerTimeout {
        /// Index of the camera that never became ready.
        camera: usize,
    },

    /// A burst did not signal completion within its bound.
    #[error("burst did not complete within {timeout:?} on camera {camera}")]
    BurstTimeout {
        /// Index of the camera that never finished.
        camera: usize,
        /// The completion bound that was exceeded.
        timeout: Duration,
    },

    /// Any other driver-reported failure during a parameter or grab call.
    #[error("camera {camera} driver fault: {description}")]
    Driver {
        /// Index of the camera the driver complained about.
        camera: usize,
        /// Driver-supplied description.
        description: String,
    },

    /// An acquisition buffer could not be allocated.
    #[error("failed to allocate {size} byte acquisition buffer: {reason}")]
    BufferAllocation {
        /// Requested size in bytes.
        size: usize,
        /// Allocator-supplied reason.
        reason: String,
    },

    /// A buffer was returned to a factory that never issued it.
    #[error("buffer context {context} has no live allocation")]
    UnknownBufferContext {
        /// The unmatched context id.
        context: u64,
    },

    /// Buffers were still live when the factory was audited at teardown.
    #[error("{live} acquisition buffers still live at teardown")]
    BufferLeak {
        /// Number of unreturned buffers.
        live: u64,
    },

    /// I/O error (frame export, command input).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for acquisition operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Control-plane operations of one attached camera.
///
/// Handles are internally synchronized the way vendor SDK handles are, so
/// every method takes `&self` and implementations must be safe to call from
/// both the command thread and driver callback threads.
pub trait CameraDevice: Send + Sync {
    /// Open the device. Reopening an open device is a no-op.
    fn open(&self) -> Result<()>;

    /// Stop any grabbing and close the device.
    fn close(&self) -> Result<()>;

    /// Whether the device is currently open.
    fn is_open(&self) -> bool;

    /// Device model name.
    fn model_name(&self) -> String;

    /// Device serial number.
    fn serial_number(&self) -> String;

    /// Whether the sensor is monochrome (as opposed to Bayer color).
    fn is_monochrome(&self) -> bool;

    /// Select the pixel format.
    fn set_pixel_format(&self, format: PixelFormat) -> Result<()>;

    /// Switch automatic gain control off.
    fn disable_gain_auto(&self) -> Result<()>;

    /// Set analog gain in dB.
    fn set_gain(&self, gain_db: f64) -> Result<()>;

    /// Read back the applied gain in dB.
    fn gain(&self) -> Result<f64>;

    /// Set exposure time in microseconds.
    fn set_exposure(&self, exposure_us: f64) -> Result<()>;

    /// Read back the applied exposure in microseconds.
    fn exposure(&self) -> Result<f64>;

    /// Whether the device supports chunk features at all.
    fn chunk_mode_supported(&self) -> bool;

    /// Enable the per-frame hardware timestamp chunk.
    fn enable_chunk_timestamp(&self) -> Result<()>;

    /// Size the driver-side buffer pool.
    fn set_buffer_pool(&self, count: usize) -> Result<()>;

    /// Register the frame event sink. Must be called before grabbing starts.
    fn register_sink(&self, sink: Arc<dyn FrameSink>);

    /// Register the buffer factory backing this device's pool allocations.
    fn register_buffer_factory(&self, factory: Arc<BufferFactory>);

    /// Install an acquisition configuration.
    fn configure(&self, mode: AcquisitionMode) -> Result<()>;

    /// Start asynchronous grabbing with the given frame-count bound.
    fn start_grabbing(&self, limit: GrabLimit) -> Result<()>;

    /// Stop grabbing. Idempotent.
    fn stop_grabbing(&self) -> Result<()>;

    /// Whether an acquisition is currently running.
    fn is_grabbing(&self) -> bool;

    /// Block until the camera can accept the next software trigger.
    ///
    /// Returns [`CameraError::TriggerTimeout`] when the bound elapses first;
    /// by policy that error is fatal to the run.
    fn wait_for_trigger_ready(&self, timeout: Duration) -> Result<()>;

    /// Fire one software trigger.
    fn execute_software_trigger(&self) -> Result<()>;
}

/// Callback target for delivered frames.
///
/// Invoked by the driver on a thread it owns, once per completed frame,
/// successful or not.
pub trait FrameSink: Send + Sync {
    /// Handle one delivered frame from the camera at `camera_index`.
    fn on_frame_grabbed(&self, camera_index: usize, result: &GrabResult<'_>);
}
