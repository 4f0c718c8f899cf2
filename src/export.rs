//! Raw frame export.
//!
//! After a successful burst the retained frame payloads can be written out
//! as raw binary files, one per frame, named with the configured label, the
//! camera's color class, the frame dimensions, the camera serial number,
//! the burst counter, and the frame index. Disabled by default.

use std::fs;
use std::path::PathBuf;

use crate::session::{BurstSession, CameraSession};
use crate::traits::Result;

/// Where and under what label burst frames are written.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Leading component of every exported file name.
    pub label: String,
    /// Directory the files are written into.
    pub directory: PathBuf,
}

/// File name for one exported frame.
fn frame_file_name(
    label: &str,
    session: &CameraSession,
    width: u32,
    height: u32,
    burst: u32,
    frame: usize,
) -> String {
    format!(
        "{label}-{}-{width}X{height}-{}-{burst}-{frame}.raw",
        session.color_label(),
        session.serial()
    )
}

/// Write every retained frame of the burst to disk.
///
/// Frames the sink did not retain (failed grabs) are skipped. Returns the
/// number of files written.
pub fn write_burst(
    config: &ExportConfig,
    sessions: &[CameraSession],
    burst: &BurstSession,
    burst_counter: u32,
) -> Result<usize> {
    let mut written = 0;
    for session in sessions {
        let frames = burst.take_stored_frames(session.index());
        for (frame_index, stored) in frames.into_iter().enumerate() {
            let Some(stored) = stored else { continue };
            let name = frame_file_name(
                &config.label,
                session,
                stored.width,
                stored.height,
                burst_counter,
                frame_index,
            );
            let path = config.directory.join(name);
            fs::write(&path, &stored.data)?;
            log::debug!("wrote {}", path.display());
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCamera;
    use crate::session::StoredFrame;
    use crate::traits::CameraDevice;
    use std::sync::Arc;

    fn session(index: usize, monochrome: bool) -> CameraSession {
        let device: Arc<dyn CameraDevice> =
            Arc::new(MockCamera::new(index).monochrome(monochrome));
        CameraSession::new(index, device)
    }

    #[test]
    fn test_file_name_embeds_all_fields() {
        let session = session(0, true);
        let name = frame_file_name("Burst", &session, 64, 48, 3, 7);
        assert!(name.starts_with("Burst-BW-64X48-"));
        assert!(name.ends_with("-3-7.raw"));
        assert!(name.contains(session.serial()));
    }

    #[test]
    fn test_write_burst_skips_missing_frames() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let config = ExportConfig {
            label: "Burst".to_owned(),
            directory: dir.path().to_path_buf(),
        };
        let sessions = vec![session(0, false)];

        let burst = BurstSession::new(1, 3, true);
        burst.store_frame(
            0,
            0,
            StoredFrame {
                data: vec![0xAB; 16],
                width: 4,
                height: 2,
            },
        );
        burst.store_frame(
            0,
            2,
            StoredFrame {
                data: vec![0xCD; 16],
                width: 4,
                height: 2,
            },
        );

        let written =
            write_burst(&config, &sessions, &burst, 0).expect("export should succeed");
        assert_eq!(written, 2);

        let entries = fs::read_dir(dir.path())
            .expect("read_dir should succeed")
            .count();
        assert_eq!(entries, 2);
    }

    #[test]
    fn test_exported_bytes_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let config = ExportConfig {
            label: "Cal".to_owned(),
            directory: dir.path().to_path_buf(),
        };
        let sessions = vec![session(0, true)];

        let burst = BurstSession::new(1, 1, true);
        let payload = vec![1u8, 2, 3, 4];
        burst.store_frame(
            0,
            0,
            StoredFrame {
                data: payload.clone(),
                width: 2,
                height: 1,
            },
        );

        write_burst(&config, &sessions, &burst, 5).expect("export should succeed");
        let path = dir
            .path()
            .join(frame_file_name("Cal", sessions.first().expect("session"), 2, 1, 5, 0));
        let bytes = fs::read(path).expect("exported file should exist");
        assert_eq!(bytes, payload);
    }
}
