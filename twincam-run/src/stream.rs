//! Stream supervision and the MJPEG fan-out.
//!
//! The supervisor's flags are single-writer atomics; the streaming loop
//! reads them between frames and tolerates values one frame stale. The
//! capture path quiesces the loop through [StreamSupervisor::disable] and
//! [StreamSupervisor::await_quiescence].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use twincam_camera::{CameraPipeline, CameraState, SensorDriver};

pub struct StreamSupervisor {
    enabled: AtomicBool,
    stop_requested: AtomicBool,
    busy: AtomicBool,
}

impl StreamSupervisor {
    pub fn new(enabled: bool) -> Arc<StreamSupervisor> {
        Arc::new(StreamSupervisor {
            enabled: AtomicBool::new(enabled),
            stop_requested: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        })
    }

    pub fn enable(&self) {
        self.stop_requested.store(false, Ordering::Release);
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn stop_pending(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the loop's in-progress indicator to clear,
    /// then proceed regardless: the camera is about to be reinitialized
    /// anyway.
    pub async fn await_quiescence(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_busy() {
            if tokio::time::Instant::now() >= deadline {
                warn!("stream did not quiesce within {timeout:?}; proceeding");
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn enter_frame(&self) {
        self.busy.store(true, Ordering::Release);
    }

    fn leave_frame(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Fan-out of encoded stream frames to connected HTTP clients. Slow or
/// absent clients never block the loop; they lag and drop.
#[derive(Clone)]
pub struct FrameBroadcaster {
    tx: broadcast::Sender<Bytes>,
}

impl FrameBroadcaster {
    pub fn new() -> FrameBroadcaster {
        let (tx, _rx) = broadcast::channel(4);
        FrameBroadcaster { tx }
    }

    pub fn publish(&self, frame: Bytes) {
        // An Err just means nobody is watching.
        let _ = self.tx.send(frame);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }
}

impl Default for FrameBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// The streaming loop.
///
/// Checks the enabled flag between frames, exits the frame path immediately
/// on a pending stop, and only touches the camera through `try_lock`: while
/// a capture holds the pipeline the loop just idles.
pub async fn stream_task<D: SensorDriver>(
    supervisor: Arc<StreamSupervisor>,
    camera: Arc<Mutex<CameraPipeline<D>>>,
    broadcaster: FrameBroadcaster,
    frame_interval: Duration,
) {
    loop {
        if !supervisor.is_enabled() || supervisor.stop_pending() {
            tokio::time::sleep(Duration::from_millis(20)).await;
            continue;
        }
        supervisor.enter_frame();
        let frame = match camera.try_lock() {
            Ok(mut cam) if matches!(cam.state(), CameraState::Streaming(_)) => {
                match cam.pull_frame() {
                    Ok(mut fb) => {
                        let data = Bytes::from(std::mem::take(&mut fb.data));
                        cam.return_frame(fb);
                        Some(data)
                    }
                    Err(err) => {
                        debug!("stream frame pull failed: {err}");
                        None
                    }
                }
            }
            _ => None,
        };
        supervisor.leave_frame();
        if let Some(data) = frame {
            broadcaster.publish(data);
        }
        tokio::time::sleep(frame_interval).await;
    }
}

const MJPEG_BOUNDARY: &str = "twincamframe";

/// An HTTP response streaming the broadcaster's frames as
/// `multipart/x-mixed-replace` MJPEG. Lagging clients skip frames.
pub fn mjpeg_response(broadcaster: &FrameBroadcaster) -> axum::response::Response {
    use axum::response::IntoResponse;

    let rx = broadcaster.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    let header = format!(
                        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                        frame.len()
                    );
                    let mut part = Vec::with_capacity(header.len() + frame.len() + 2);
                    part.extend_from_slice(header.as_bytes());
                    part.extend_from_slice(&frame);
                    part.extend_from_slice(b"\r\n");
                    return Some((Ok::<_, std::convert::Infallible>(Bytes::from(part)), rx));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("stream client lagged, skipped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    (
        [(
            http::header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
        )],
        axum::body::Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use twincam_camera::mock::MockSensor;
    use twincam_types::{FrameSize, PixelFormat};

    #[tokio::test]
    async fn quiescence_clears_when_not_busy() {
        let sup = StreamSupervisor::new(true);
        sup.disable();
        // Not busy: returns promptly.
        let started = std::time::Instant::now();
        sup.await_quiescence(Duration::from_secs(2)).await;
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!sup.is_enabled());
        assert!(sup.stop_pending());
        sup.enable();
        assert!(sup.is_enabled());
        assert!(!sup.stop_pending());
    }

    #[tokio::test]
    async fn loop_skips_camera_held_by_capture() {
        let (sensor, ctl) = MockSensor::new();
        let mut pipeline = CameraPipeline::new(sensor, 0);
        pipeline
            .initialize(PixelFormat::Jpeg, FrameSize::Vga)
            .unwrap();
        pipeline.mark_streaming();
        let camera = Arc::new(Mutex::new(pipeline));
        let sup = StreamSupervisor::new(true);
        let broadcaster = FrameBroadcaster::new();
        tokio::spawn(stream_task(
            sup.clone(),
            camera.clone(),
            broadcaster.clone(),
            Duration::from_millis(5),
        ));

        // Loop pulls frames while the camera is free.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pulled = ctl
            .ops()
            .iter()
            .filter(|op| **op == twincam_camera::mock::SensorOp::Frame)
            .count();
        assert!(pulled > 0);

        // Capture takes the camera: the loop stops pulling.
        let guard = camera.lock().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        ctl.clear_ops();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ctl.ops().is_empty());
        drop(guard);
    }
}
