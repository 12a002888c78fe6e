//! Artifact persistence: one file per frame, raw buffer contents.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use twincam_camera::FrameBuffer;
use twincam_types::{artifact_name, monotonic_ms, SessionId};

/// Write one frame under `<dir>/<session>-<monotonic_ms>.<ext>`.
///
/// The file is created at open, written once, closed at end of write.
/// Consecutive frames can land within the same millisecond; the stamp is
/// bumped until the name is free so no artifact is overwritten.
pub fn write_artifact(
    dir: &Path,
    session: &SessionId,
    frame: &FrameBuffer,
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let mut stamp_ms = monotonic_ms();
    let path = loop {
        let candidate = dir.join(artifact_name(session, stamp_ms, frame.pixel_format));
        if !candidate.exists() {
            break candidate;
        }
        stamp_ms += 1;
    };
    let mut file = File::create(&path)?;
    file.write_all(&frame.data)?;
    Ok(path)
}
