//! Application wiring: attach cameras, run the command loop, tear down.
//!
//! Startup mirrors the acquisition rig's bring-up order: enumerate, open,
//! classify each sensor and set its pixel format, verify chunk timestamp
//! support (fatal when absent), register the buffer factory and the frame
//! event sink, then hand control to the state machine. All fatal errors
//! propagate to the caller; the binary maps them to a non-zero exit.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crate::command::parse_key;
use crate::controller::Controller;
use crate::export::ExportConfig;
use crate::machine::{Action, GrabState, GrabStateCell, StateMachine};
use crate::session::CameraSession;
use crate::sink::EventSink;
use crate::buffer::BufferFactory;
use crate::traits::{CameraDevice, CameraError, FrameSink, PixelFormat, Result};

/// Bound on trigger-ready waits issued from the frame event sink.
const SINK_TRIGGER_WAIT: Duration = Duration::from_secs(1);

/// Run configuration for [`App::bootstrap`].
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Override for the burst frame target; `None` keeps the default.
    pub burst_target: Option<usize>,
    /// Post-burst raw export; `None` disables it.
    pub export: Option<ExportConfig>,
}

/// The assembled acquisition application.
pub struct App {
    machine: StateMachine,
    devices: Vec<Arc<dyn CameraDevice>>,
    factories: Vec<Arc<BufferFactory>>,
}

impl App {
    /// Attach every enumerated device and wire up the acquisition stack.
    ///
    /// Fails with [`CameraError::NoDevices`] when `devices` is empty and
    /// with [`CameraError::ChunkUnsupported`] when any camera cannot
    /// deliver hardware timestamps.
    pub fn bootstrap(devices: Vec<Arc<dyn CameraDevice>>, config: AppConfig) -> Result<Self> {
        if devices.is_empty() {
            return Err(CameraError::NoDevices);
        }

        let state = Arc::new(GrabStateCell::new(GrabState::Start));
        let sink = Arc::new(EventSink::new(
            Arc::clone(&state),
            devices.clone(),
            SINK_TRIGGER_WAIT,
        ));

        let mut sessions = Vec::with_capacity(devices.len());
        let mut factories = Vec::with_capacity(devices.len());
        for (index, device) in devices.iter().enumerate() {
            device.open()?;

            let format = if device.is_monochrome() {
                PixelFormat::Mono12
            } else {
                PixelFormat::BayerGB12
            };
            device.set_pixel_format(format)?;

            if !device.chunk_mode_supported() {
                return Err(CameraError::ChunkUnsupported { camera: index });
            }
            device.enable_chunk_timestamp()?;

            let factory = Arc::new(BufferFactory::new());
            device.register_buffer_factory(Arc::clone(&factory));
            device.register_sink(Arc::clone(&sink) as Arc<dyn FrameSink>);
            factories.push(factory);

            log::info!("using device {}", device.model_name());
            sessions.push(CameraSession::new(index, Arc::clone(device)));
        }

        let mut controller = Controller::new(sessions, sink);
        if let Some(target) = config.burst_target {
            controller.set_burst_target(target);
        }
        controller.set_export(config.export);

        Ok(Self {
            machine: StateMachine::new(controller, state),
            devices,
            factories,
        })
    }

    /// The state machine, for dispatching actions directly.
    pub fn machine_mut(&mut self) -> &mut StateMachine {
        &mut self.machine
    }

    /// The state machine, for inspection.
    #[must_use]
    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Run the command loop: the initial dispatch that enters preview, then
    /// one action per input byte until quit.
    pub fn run<R: Read>(&mut self, input: R) -> Result<()> {
        self.machine.dispatch(Action::NoAction)?;

        for byte in input.bytes() {
            let key = char::from(byte?);
            let action = parse_key(key);
            self.machine.dispatch(action)?;
            if action == Action::Quit {
                break;
            }
        }
        Ok(())
    }

    /// External cleanup pass after the machine reaches its terminal state:
    /// stop and close every device, then audit the buffer factories.
    pub fn teardown(&mut self) -> Result<()> {
        for device in &self.devices {
            if device.is_grabbing() {
                device.stop_grabbing()?;
            }
            device.close()?;
        }
        for factory in &self.factories {
            factory.audit()?;
        }
        log::info!("teardown complete");
        Ok(())
    }

    /// The per-camera buffer factories, for lifecycle audits in tests.
    #[must_use]
    pub fn factories(&self) -> &[Arc<BufferFactory>] {
        &self.factories
    }
}
