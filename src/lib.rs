//! Burst-Capture: multi-camera preview and timed burst acquisition
//!
//! This library coordinates acquisition from one or more imaging sensors
//! behind an external camera driver, switching between live preview and
//! precisely-timed software-triggered bursts while recording per-frame
//! host and hardware timestamps. The driver boundary is trait-based, so
//! the same acquisition stack runs against real hardware or the simulated
//! driver used for tests.

pub mod app;
pub mod buffer;
pub mod command;
pub mod controller;
pub mod export;
pub mod machine;
pub mod mock;
pub mod session;
pub mod sink;
pub mod timing;
pub mod traits;

pub use app::{App, AppConfig};
pub use buffer::BufferFactory;
pub use controller::Controller;
pub use machine::{Action, GrabState, StateMachine};
pub use session::{BurstSession, CameraSession};
pub use sink::EventSink;
pub use timing::FrameTimeTable;
pub use traits::{
    CameraDevice, CameraError, FrameSink, GrabResult, GrabStatus, PixelFormat, Result,
};
