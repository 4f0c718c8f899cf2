//! Per-camera frame timing records.
//!
//! Each burst keeps two clocks per frame: the host-side instant the trigger
//! was fired (monotonic, relative to the burst epoch) and the camera's own
//! hardware timestamp delivered as a chunk. Both are stored in seconds.
//! The table is sized to the burst target up front and overwritten by the
//! next burst rather than appended to.

use std::fmt::Write as _;

/// Timing record for one frame of one camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRecord {
    /// Frame sequence index within the burst.
    pub sequence: usize,
    /// Host trigger-fire time in seconds since the burst epoch.
    pub host_time: Option<f64>,
    /// Device hardware time in seconds, converted from the nanosecond
    /// chunk counter.
    pub device_time: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct CameraTimes {
    host: Vec<Option<f64>>,
    device: Vec<Option<f64>>,
}

/// Ordered log of (host, device) timestamp pairs per camera.
#[derive(Debug, Clone, Default)]
pub struct FrameTimeTable {
    target: usize,
    cameras: Vec<CameraTimes>,
}

impl FrameTimeTable {
    /// Create a table for `cameras` cameras, sized to `target` frames each.
    #[must_use]
    pub fn new(cameras: usize, target: usize) -> Self {
        let mut table = Self::default();
        table.reset(cameras, target);
        table
    }

    /// Resize for a new burst, discarding all previous records.
    pub fn reset(&mut self, cameras: usize, target: usize) {
        self.target = target;
        self.cameras = (0..cameras)
            .map(|_| CameraTimes {
                host: vec![None; target],
                device: vec![None; target],
            })
            .collect();
    }

    /// Burst frame target this table is sized for.
    #[must_use]
    pub fn target(&self) -> usize {
        self.target
    }

    /// Record the host-side trigger time for a frame, in seconds.
    pub fn record_host(&mut self, camera: usize, frame: usize, seconds: f64) {
        match self
            .cameras
            .get_mut(camera)
            .and_then(|times| times.host.get_mut(frame))
        {
            Some(slot) => *slot = Some(seconds),
            None => log::warn!("host time for camera {camera} frame {frame} out of range"),
        }
    }

    /// Record the device-side hardware time for a frame, in seconds.
    pub fn record_device(&mut self, camera: usize, frame: usize, seconds: f64) {
        match self
            .cameras
            .get_mut(camera)
            .and_then(|times| times.device.get_mut(frame))
        {
            Some(slot) => *slot = Some(seconds),
            None => log::warn!("device time for camera {camera} frame {frame} out of range"),
        }
    }

    /// Host timestamp of a frame, if recorded.
    #[must_use]
    pub fn host(&self, camera: usize, frame: usize) -> Option<f64> {
        self.cameras
            .get(camera)
            .and_then(|times| times.host.get(frame))
            .copied()
            .flatten()
    }

    /// Device timestamp of a frame, if recorded.
    #[must_use]
    pub fn device(&self, camera: usize, frame: usize) -> Option<f64> {
        self.cameras
            .get(camera)
            .and_then(|times| times.device.get(frame))
            .copied()
            .flatten()
    }

    /// Number of device timestamps recorded for a camera.
    #[must_use]
    pub fn device_count(&self, camera: usize) -> usize {
        self.cameras
            .get(camera)
            .map_or(0, |times| times.device.iter().flatten().count())
    }

    /// Full record for one frame of one camera.
    #[must_use]
    pub fn record(&self, camera: usize, frame: usize) -> Option<FrameRecord> {
        if frame >= self.target || camera >= self.cameras.len() {
            return None;
        }
        Some(FrameRecord {
            sequence: frame,
            host_time: self.host(camera, frame),
            device_time: self.device(camera, frame),
        })
    }

    /// Consecutive-frame deltas `(host, device)` in seconds, for frame
    /// `frame` relative to `frame - 1`.
    ///
    /// Returns `None` for frame 0 or when either pair is incomplete.
    #[must_use]
    pub fn delta(&self, camera: usize, frame: usize) -> Option<(f64, f64)> {
        let previous = frame.checked_sub(1)?;
        let host = self.host(camera, frame)? - self.host(camera, previous)?;
        let device = self.device(camera, frame)? - self.device(camera, previous)?;
        Some((host, device))
    }

    /// Render the per-interval delta table printed after each burst.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = String::new();
        for frame in 1..self.target {
            let _ = write!(out, "interval {:>2}:", frame - 1);
            for camera in 0..self.cameras.len() {
                match self.delta(camera, frame) {
                    Some((host, device)) => {
                        let _ = write!(
                            out,
                            "  camera #{camera}: {host:.6} s  cam time: {device:.6} s"
                        );
                    }
                    None => {
                        let _ = write!(out, "  camera #{camera}: incomplete");
                    }
                }
            }
            out.push('\n');
        }
        out
    }
}
