//! Master-side control client: `READY` polling and the `START` trigger.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

use twincam_types::wire::{SyncReply, SyncRequest};

use crate::{Error, Result};

/// A connected datagram client for the slave's sync port.
pub struct SlaveControl {
    sock: UdpSocket,
}

impl SlaveControl {
    pub async fn connect(target: &str) -> Result<SlaveControl> {
        let sock = UdpSocket::bind("0.0.0.0:0").await?;
        sock.connect(target).await?;
        Ok(SlaveControl { sock })
    }

    /// Poll `READY` until the slave answers `OK` (armed and idle) or
    /// `total_timeout` elapses. `NO`, garbage, and silence all just mean
    /// "ask again at the next poll interval".
    pub async fn await_ready(
        &self,
        total_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + total_timeout;
        loop {
            self.sock.send(&SyncRequest::Ready.encode()).await?;
            let mut buf = [0u8; 64];
            let mut got_reply = false;
            match timeout(poll_interval, self.sock.recv(&mut buf)).await {
                Ok(Ok(n)) => {
                    got_reply = true;
                    match SyncReply::parse(&buf[..n]) {
                        Some(SyncReply::Ok) => return Ok(()),
                        reply => debug!("slave not ready yet: {reply:?}"),
                    }
                }
                Ok(Err(err)) => warn!("READY recv failed: {err}"),
                Err(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            if got_reply {
                // A fast NO should not turn the poll loop into a busy loop.
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    /// Send `START <delay>`; anything but `ACK` within the per-attempt
    /// deadline triggers a retry, up to `retries` attempts total.
    pub async fn fire(
        &self,
        start_delay_us: i64,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<()> {
        let msg = SyncRequest::Start(Some(start_delay_us)).encode();
        for attempt in 1..=retries.max(1) {
            self.sock.send(&msg).await?;
            let mut buf = [0u8; 64];
            match timeout(retry_delay, self.sock.recv(&mut buf)).await {
                Ok(Ok(n)) => match SyncReply::parse(&buf[..n]) {
                    Some(SyncReply::Ack) => return Ok(()),
                    reply => warn!("START attempt {attempt}: unexpected reply {reply:?}"),
                },
                Ok(Err(err)) => warn!("START attempt {attempt}: recv failed: {err}"),
                Err(_) => debug!("START attempt {attempt}: no reply"),
            }
        }
        Err(Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Scripted responder: answers `READY` with `NO` the first `ready_nos`
    /// times, then `OK`; drops the first `start_drops` `START` datagrams,
    /// then answers `ACK`.
    async fn spawn_scripted(ready_nos: u32, start_drops: u32) -> SocketAddr {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = sock.local_addr().unwrap();
        let readys = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(AtomicU32::new(0));
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while let Ok((n, peer)) = sock.recv_from(&mut buf).await {
                match SyncRequest::parse(&buf[..n]) {
                    Some(SyncRequest::Ready) => {
                        let seen = readys.fetch_add(1, Ordering::SeqCst);
                        let reply = if seen < ready_nos {
                            SyncReply::No
                        } else {
                            SyncReply::Ok
                        };
                        let _ = sock.send_to(&reply.encode(), peer).await;
                    }
                    Some(SyncRequest::Start(_)) => {
                        let seen = starts.fetch_add(1, Ordering::SeqCst);
                        if seen >= start_drops {
                            let _ = sock.send_to(&SyncReply::Ack.encode(), peer).await;
                        }
                    }
                    _ => {}
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn ready_polls_through_refusals() {
        let addr = spawn_scripted(2, 0).await;
        let control = SlaveControl::connect(&addr.to_string()).await.unwrap();
        control
            .await_ready(Duration::from_secs(2), Duration::from_millis(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ready_times_out_against_silence() {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = sock.local_addr().unwrap();
        let control = SlaveControl::connect(&addr.to_string()).await.unwrap();
        let err = control
            .await_ready(Duration::from_millis(100), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn fire_retries_through_two_losses() {
        let addr = spawn_scripted(0, 2).await;
        let control = SlaveControl::connect(&addr.to_string()).await.unwrap();
        control
            .fire(50_000, 3, Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fire_gives_up_when_retries_exhausted() {
        let addr = spawn_scripted(0, 2).await;
        let control = SlaveControl::connect(&addr.to_string()).await.unwrap();
        let err = control
            .fire(50_000, 2, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }
}
