//! One-way trip time and clock-disparity measurement.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

use twincam_types::{monotonic_us, SyncMetrics};

use crate::{Error, Result};

/// Per-attempt reply deadline. Short on purpose: a ping that takes longer
/// than this is useless as a timing sample anyway.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// One successful ping: our send and receive stamps plus the peer's echoed
/// monotonic microseconds.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSample {
    pub send_us: i64,
    pub recv_us: i64,
    pub peer_us: i64,
}

/// Reduce samples to [SyncMetrics]: arithmetic means of RTT/2 and of
/// `(send + rtt/2) - peer`, the latter assuming the peer stamped its reply
/// at approximately the midpoint of the round trip.
pub fn metrics_from_samples(samples: &[ProbeSample]) -> Option<SyncMetrics> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as i64;
    let mut trip_sum = 0i64;
    let mut disparity_sum = 0i64;
    for sample in samples {
        let trip = (sample.recv_us - sample.send_us) / 2;
        trip_sum += trip;
        disparity_sum += sample.send_us + trip - sample.peer_us;
    }
    Some(SyncMetrics {
        one_way_trip_us: trip_sum / n,
        cpu_disparity_us: disparity_sum / n,
    })
}

/// Run one probe session of `pings` datagrams against `target`.
///
/// Each datagram carries our current monotonic microseconds as a decimal
/// string; the peer echoes its own. Malformed replies are discarded. The
/// socket is fresh per session and reused across the pings within it; no
/// state survives the session.
pub async fn probe_clock(
    target: &str,
    pings: u32,
    per_attempt_timeout: Duration,
) -> Result<SyncMetrics> {
    let sock = UdpSocket::bind("0.0.0.0:0").await?;
    sock.connect(target).await?;

    let mut buf = [0u8; 64];
    let mut samples = Vec::with_capacity(pings as usize);
    for i in 0..pings {
        let send_us = monotonic_us();
        if let Err(err) = sock.send(send_us.to_string().as_bytes()).await {
            warn!("probe ping {i}: send failed: {err}");
            continue;
        }
        match timeout(per_attempt_timeout, sock.recv(&mut buf)).await {
            Err(_) => debug!("probe ping {i}: timed out"),
            Ok(Err(err)) => warn!("probe ping {i}: recv failed: {err}"),
            Ok(Ok(n)) => {
                let recv_us = monotonic_us();
                let parsed = std::str::from_utf8(&buf[..n])
                    .ok()
                    .and_then(|text| text.trim().parse::<i64>().ok());
                match parsed {
                    Some(peer_us) => samples.push(ProbeSample {
                        send_us,
                        recv_us,
                        peer_us,
                    }),
                    None => debug!("probe ping {i}: malformed reply"),
                }
            }
        }
    }
    debug!("probe: {} of {pings} pings answered", samples.len());
    metrics_from_samples(&samples).ok_or(Error::NoReply)
}
