//! Slave-side sync server and the capture slot it gates.

use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use twincam_types::wire::{SyncReply, SyncRequest};
use twincam_types::{monotonic_us, CaptureRequest};

use crate::Result;

#[derive(Default)]
struct SlotState {
    ready: bool,
    in_progress: bool,
    request: Option<CaptureRequest>,
}

/// The slave's single armed-capture slot.
///
/// `ready` means prepared and waiting for `START`; `in_progress` means the
/// engine is pulling or persisting frames. The two are never true together.
/// The mutex is held only across these quick transitions, never across
/// camera work.
#[derive(Default)]
pub struct CaptureSlot {
    inner: Mutex<SlotState>,
}

impl CaptureSlot {
    pub fn new() -> CaptureSlot {
        CaptureSlot::default()
    }

    /// Arm with `request`. Refused while armed or capturing.
    pub fn try_arm(&self, request: CaptureRequest) -> bool {
        let mut st = self.inner.lock().unwrap();
        if st.ready || st.in_progress {
            return false;
        }
        st.request = Some(request);
        st.ready = true;
        true
    }

    /// Armed and idle?
    pub fn is_armed(&self) -> bool {
        let st = self.inner.lock().unwrap();
        st.ready && !st.in_progress
    }

    /// Armed or capturing?
    pub fn is_busy(&self) -> bool {
        let st = self.inner.lock().unwrap();
        st.ready || st.in_progress
    }

    /// Transition `ready` to `in_progress`, yielding the armed request.
    pub fn begin_fire(&self) -> Option<CaptureRequest> {
        let mut st = self.inner.lock().unwrap();
        if !st.ready || st.in_progress {
            return None;
        }
        st.ready = false;
        st.in_progress = true;
        st.request.take()
    }

    pub fn finish_fire(&self) {
        let mut st = self.inner.lock().unwrap();
        st.in_progress = false;
    }

    /// Drop a pending arm without firing.
    pub fn disarm(&self) {
        let mut st = self.inner.lock().unwrap();
        st.ready = false;
        st.request = None;
    }

    /// `(ready, in_progress)` for status reporting.
    pub fn snapshot(&self) -> (bool, bool) {
        let st = self.inner.lock().unwrap();
        (st.ready, st.in_progress)
    }
}

/// Command handed from the sync server to the capture engine after `ACK`.
#[derive(Debug)]
pub struct FireCommand {
    pub delay_us: i64,
    /// `monotonic_us` at `START` receipt. The capture deadline is relative
    /// to receipt, not to engine pickup.
    pub received_at_us: i64,
    pub request: CaptureRequest,
}

/// Single cooperative receiver for the sync port.
///
/// Dispatch per datagram: `READY` answers the slot's armed state, a bare
/// decimal is the clock-probe echo, `START <delay>` flips the slot and
/// launches the engine, everything else draws `ERR`. The `ACK` is sent
/// before the launch command so the master's measured round trip never
/// includes capture setup cost.
pub async fn sync_server(
    sock: UdpSocket,
    slot: Arc<CaptureSlot>,
    fire_tx: mpsc::Sender<FireCommand>,
) -> Result<()> {
    let mut buf = [0u8; 256];
    loop {
        let (n, peer) = sock.recv_from(&mut buf).await?;
        let received_at_us = monotonic_us();
        match SyncRequest::parse(&buf[..n]) {
            Some(SyncRequest::Ready) => {
                let reply = if slot.is_armed() {
                    SyncReply::Ok
                } else {
                    SyncReply::No
                };
                sock.send_to(&reply.encode(), peer).await?;
            }
            Some(SyncRequest::Start(Some(delay_us))) if delay_us >= 0 => {
                match slot.begin_fire() {
                    Some(request) => {
                        sock.send_to(&SyncReply::Ack.encode(), peer).await?;
                        let cmd = FireCommand {
                            delay_us,
                            received_at_us,
                            request,
                        };
                        if fire_tx.send(cmd).await.is_err() {
                            warn!("capture engine gone; dropping START");
                            slot.finish_fire();
                        }
                    }
                    None => {
                        sock.send_to(&SyncReply::No.encode(), peer).await?;
                    }
                }
            }
            Some(SyncRequest::Start(_)) => {
                sock.send_to(&SyncReply::No.encode(), peer).await?;
            }
            Some(SyncRequest::Echo(_)) => {
                let reply = SyncReply::Time(monotonic_us()).encode();
                sock.send_to(&reply, peer).await?;
            }
            None => {
                debug!("unrecognized datagram from {peer}");
                sock.send_to(&SyncReply::Err.encode(), peer).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use twincam_types::{FrameSize, PixelFormat};

    fn request() -> CaptureRequest {
        CaptureRequest {
            session: "s".parse().unwrap(),
            frame_count: 1,
            frame_size: FrameSize::Vga,
            pixel_format: PixelFormat::Jpeg,
            safety_margin_us: None,
            sensor_params: BTreeMap::new(),
        }
    }

    #[test]
    fn slot_never_ready_and_in_progress() {
        let slot = Arc::new(CaptureSlot::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let slot = slot.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    match i % 3 {
                        0 => {
                            let _ = slot.try_arm(request());
                        }
                        1 => {
                            if slot.begin_fire().is_some() {
                                let (ready, in_progress) = slot.snapshot();
                                assert!(!(ready && in_progress));
                                slot.finish_fire();
                            }
                        }
                        _ => {
                            let (ready, in_progress) = slot.snapshot();
                            assert!(!(ready && in_progress));
                        }
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn begin_fire_requires_armed() {
        let slot = CaptureSlot::new();
        assert!(slot.begin_fire().is_none());
        assert!(slot.try_arm(request()));
        assert!(!slot.try_arm(request()));
        assert!(slot.begin_fire().is_some());
        // In progress now: no re-arm, no re-fire.
        assert!(!slot.try_arm(request()));
        assert!(slot.begin_fire().is_none());
        slot.finish_fire();
        assert!(slot.try_arm(request()));
    }

    async fn spawn_server() -> (
        std::net::SocketAddr,
        Arc<CaptureSlot>,
        mpsc::Receiver<FireCommand>,
    ) {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = sock.local_addr().unwrap();
        let slot = Arc::new(CaptureSlot::new());
        let (fire_tx, fire_rx) = mpsc::channel(1);
        tokio::spawn(sync_server(sock, slot.clone(), fire_tx));
        (addr, slot, fire_rx)
    }

    async fn exchange(addr: std::net::SocketAddr, msg: &[u8]) -> Vec<u8> {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sock.connect(addr).await.unwrap();
        sock.send(msg).await.unwrap();
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(std::time::Duration::from_secs(1), sock.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn dispatch_table() {
        let (addr, slot, mut fire_rx) = spawn_server().await;

        // Unarmed: READY -> NO, START -> NO.
        assert_eq!(exchange(addr, b"READY").await, b"NO");
        assert_eq!(exchange(addr, b"START 1000").await, b"NO");

        // Clock echo answers with a decimal.
        let echoed = exchange(addr, b"123456").await;
        assert!(String::from_utf8(echoed).unwrap().parse::<i64>().is_ok());

        // Garbage draws ERR.
        assert_eq!(exchange(addr, b"FLASH ON").await, b"ERR");

        // Armed: READY -> OK; negative and malformed STARTs refused.
        assert!(slot.try_arm(request()));
        assert_eq!(exchange(addr, b"READY").await, b"OK");
        assert_eq!(exchange(addr, b"START -5").await, b"NO");
        assert_eq!(exchange(addr, b"START soon").await, b"NO");
        assert!(slot.is_armed());

        // Valid START: ACK, slot in progress, engine gets the command.
        assert_eq!(exchange(addr, b"START 2500").await, b"ACK");
        let cmd = fire_rx.recv().await.unwrap();
        assert_eq!(cmd.delay_us, 2500);
        assert_eq!(slot.snapshot(), (false, true));

        // While capturing: READY -> NO, second START -> NO.
        assert_eq!(exchange(addr, b"READY").await, b"NO");
        assert_eq!(exchange(addr, b"START 1").await, b"NO");
    }
}
