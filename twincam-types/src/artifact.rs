use crate::{PixelFormat, SessionId};

/// File name of one persisted frame: `<session>-<monotonic_ms>.<ext>`.
pub fn artifact_name(session: &SessionId, stamp_ms: i64, format: PixelFormat) -> String {
    format!("{}-{}.{}", session, stamp_ms, format.file_extension())
}

/// Parse an artifact file name back to `(session, monotonic_ms, format)`.
///
/// Session ids may themselves contain `-`, so the timestamp is taken from
/// the right.
pub fn parse_artifact_name(name: &str) -> Option<(SessionId, i64, PixelFormat)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let format = PixelFormat::from_extension(ext)?;
    let (session, stamp) = stem.rsplit_once('-')?;
    let stamp_ms: i64 = stamp.parse().ok()?;
    let session: SessionId = session.parse().ok()?;
    Some((session, stamp_ms, format))
}

#[test]
fn name_round_trip() {
    let session: SessionId = "bench-3".parse().unwrap();
    for format in [
        PixelFormat::Jpeg,
        PixelFormat::Rgb565,
        PixelFormat::Gray8,
        PixelFormat::Yuv422,
    ] {
        let name = artifact_name(&session, 123456, format);
        let (s, ms, f) = parse_artifact_name(&name).unwrap();
        assert_eq!(s, session);
        assert_eq!(ms, 123456);
        assert_eq!(f, format);
    }
}

#[test]
fn rejects_foreign_names() {
    assert!(parse_artifact_name("frame.png").is_none());
    assert!(parse_artifact_name("noseparator.jpg").is_none());
    assert!(parse_artifact_name("s-notanumber.jpg").is_none());
}
