use std::time::Instant;

lazy_static::lazy_static! {
    static ref PROCESS_EPOCH: Instant = Instant::now();
}

/// Microseconds of local monotonic time.
///
/// The origin is the first call in this process. These values are what the
/// sync protocol exchanges; they are never comparable across hosts except
/// through the measured disparity.
pub fn monotonic_us() -> i64 {
    PROCESS_EPOCH.elapsed().as_micros() as i64
}

/// Milliseconds of local monotonic time, used for artifact timestamps.
pub fn monotonic_ms() -> i64 {
    monotonic_us() / 1000
}

#[test]
fn monotonic_is_monotonic() {
    let a = monotonic_us();
    let b = monotonic_us();
    assert!(b >= a);
    assert_eq!(monotonic_ms(), monotonic_us() / 1000);
}
