//! The `ACK` datagram leaves the slave before the first capture frame is
//! pulled, and the first pull lands at the requested slave-local delay.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use twincam_camera::mock::{MockSensor, SensorOp};
use twincam_camera::CameraPipeline;
use twincam_run::config::SyncConfig;
use twincam_run::engine::CaptureEngine;
use twincam_run::stream::StreamSupervisor;
use twincam_sync::{sync_server, CaptureSlot};
use twincam_types::{monotonic_us, FrameSize, PixelFormat};

#[tokio::test(flavor = "multi_thread")]
async fn ack_precedes_first_frame_pull() {
    let dir = tempfile::tempdir().unwrap();
    let (sensor, ctl) = MockSensor::new();
    let mut pipeline = CameraPipeline::new(sensor, 0);
    pipeline
        .initialize(PixelFormat::Jpeg, FrameSize::Vga)
        .unwrap();
    pipeline.mark_streaming();
    let camera = Arc::new(Mutex::new(pipeline));

    // No stream task: every recorded Frame op belongs to the capture.
    let supervisor = StreamSupervisor::new(false);
    let slot = Arc::new(CaptureSlot::new());
    let sync_cfg = SyncConfig {
        drop_frames: 0,
        ..SyncConfig::default()
    };
    let engine = Arc::new(CaptureEngine::new(
        camera,
        supervisor.clone(),
        slot.clone(),
        sync_cfg,
        dir.path().to_path_buf(),
        FrameSize::Vga,
    ));
    let (fire_tx, fire_rx) = mpsc::channel(1);
    tokio::spawn(engine.clone().run(fire_rx));

    let server_sock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server_sock.local_addr().unwrap();
    tokio::spawn(sync_server(server_sock, slot.clone(), fire_tx));

    let params = [
        ("session", "ord"),
        ("frame_count", "2"),
        ("framesize", "vga"),
        ("pixel_format", "jpeg"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    engine.prepare(&params).await.unwrap();
    assert!(slot.is_armed());
    ctl.clear_ops();

    let sock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sock.connect(server_addr).await.unwrap();
    let sent_at = monotonic_us();
    sock.send(b"START 30000").await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(1), sock.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"ACK");
    let ack_at = monotonic_us();

    support::wait_slot_idle(&slot).await;

    let frame_stamps: Vec<i64> = ctl
        .stamped_ops()
        .into_iter()
        .filter(|(_, op)| *op == SensorOp::Frame)
        .map(|(stamp, _)| stamp)
        .collect();
    assert_eq!(frame_stamps.len(), 2);
    // ACK (observed at receipt, later than its send completion) came first.
    assert!(
        frame_stamps[0] > ack_at,
        "first pull at {} but ACK seen at {ack_at}",
        frame_stamps[0]
    );
    // And the pull waited out the slave-local delay.
    assert!(frame_stamps[0] >= sent_at + 30_000);
    assert!(
        frame_stamps[0] < sent_at + 300_000,
        "first pull {}us after START",
        frame_stamps[0] - sent_at
    );
    assert!(supervisor.is_enabled());
}
