//! Burst-capture binary driving the simulated camera rig.

use std::io;

use burst_capture::{mock, App, AppConfig};

/// Cameras attached in simulated mode.
const CAMERA_COUNT: usize = 2;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        log::error!("an exception occurred: {err}");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> burst_capture::Result<()> {
    let devices = mock::simulated_rig(CAMERA_COUNT);
    let mut app = App::bootstrap(devices, AppConfig::default())?;

    let stdin = io::stdin();
    app.run(stdin.lock())?;
    app.teardown()
}
