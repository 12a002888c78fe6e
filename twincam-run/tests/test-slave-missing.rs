//! Sync-failure policy: with `allow_slave_missing` the master captures
//! alone and sends no `START`; without it the request fails and the camera
//! still restores.

mod support;

use http::StatusCode;

use twincam_camera::mock::MockSensor;
use twincam_camera::CameraState;
use twincam_run::config::MasterConfig;
use twincam_run::master::start_master;
use twincam_types::FrameSize;

#[tokio::test(flavor = "multi_thread")]
async fn probe_failure_with_allowance_captures_alone() {
    let dir = tempfile::tempdir().unwrap();
    // Slave answers READY but never the clock probe: sync is unusable.
    let scripted = support::spawn_scripted_slave(true, false, u32::MAX).await;
    let prepare_stub = support::spawn_prepare_stub().await;

    let (sensor, _ctl) = MockSensor::new();
    let mut cfg = support::test_config(dir.path());
    cfg.sync.allow_slave_missing = true;
    cfg.master = Some(MasterConfig {
        slave_http: format!("http://{prepare_stub}"),
        slave_sync: scripted.addr.to_string(),
    });
    let master = start_master(cfg, sensor).await.unwrap();

    let (status, body) = support::http_get(
        master.http_addr,
        "/capture?session=solo&frame_count=2&framesize=vga&pixel_format=jpeg",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    assert_eq!(support::artifact_names(dir.path()).len(), 2);
    // The slave was written off after the failed probe: no START went out.
    assert_eq!(scripted.starts_received(), 0);
    assert_eq!(
        master.camera.lock().await.state(),
        CameraState::Streaming(FrameSize::Vga)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn probe_failure_without_allowance_fails_and_restores() {
    let dir = tempfile::tempdir().unwrap();
    let scripted = support::spawn_scripted_slave(true, false, u32::MAX).await;
    let prepare_stub = support::spawn_prepare_stub().await;

    let (sensor, _ctl) = MockSensor::new();
    let mut cfg = support::test_config(dir.path());
    cfg.master = Some(MasterConfig {
        slave_http: format!("http://{prepare_stub}"),
        slave_sync: scripted.addr.to_string(),
    });
    let master = start_master(cfg, sensor).await.unwrap();

    let (status, body) = support::http_get(
        master.http_addr,
        "/capture?session=s&frame_count=2&framesize=vga&pixel_format=jpeg",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "udp sync failed");

    // No frames persisted, no START sent, camera back in the default.
    assert!(support::artifact_names(dir.path()).is_empty());
    assert_eq!(scripted.starts_received(), 0);
    assert_eq!(
        master.camera.lock().await.state(),
        CameraState::Streaming(FrameSize::Vga)
    );
    assert!(master.supervisor.is_enabled());
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_slave_without_allowance_reports_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing answers: prepare is refused at connect, READY would time out.
    let (sensor, _ctl) = MockSensor::new();
    let mut cfg = support::test_config(dir.path());
    cfg.master = Some(MasterConfig {
        slave_http: "http://127.0.0.1:9".to_string(),
        slave_sync: "127.0.0.1:9".to_string(),
    });
    let master = start_master(cfg, sensor).await.unwrap();

    let (status, body) = support::http_get(
        master.http_addr,
        "/capture?session=s&frame_count=1&framesize=vga&pixel_format=jpeg",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "slave not ready");
    assert!(support::artifact_names(dir.path()).is_empty());
    assert_eq!(
        master.camera.lock().await.state(),
        CameraState::Streaming(FrameSize::Vga)
    );
}
