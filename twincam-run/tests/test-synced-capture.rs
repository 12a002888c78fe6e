//! End-to-end happy path: master and slave in-process over loopback.

mod support;

use http::StatusCode;

use twincam_camera::mock::{MockSensor, SensorOp};
use twincam_run::config::MasterConfig;
use twincam_run::{master::start_master, slave::start_slave};
use twincam_types::{parse_artifact_name, PixelFormat};

#[tokio::test(flavor = "multi_thread")]
async fn synchronized_capture_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let master_dir = dir.path().join("master");
    let slave_dir = dir.path().join("slave");

    let (slave_sensor, slave_ctl) = MockSensor::new();
    let slave = start_slave(support::test_config(&slave_dir), slave_sensor)
        .await
        .unwrap();

    let (master_sensor, master_ctl) = MockSensor::new();
    let mut master_cfg = support::test_config(&master_dir);
    master_cfg.master = Some(MasterConfig {
        slave_http: format!("http://{}", slave.http_addr),
        slave_sync: format!("127.0.0.1:{}", slave.sync_addr.port()),
    });
    let master = start_master(master_cfg, master_sensor).await.unwrap();

    let state_before = master.camera.lock().await.state();

    let (status, body) = support::http_get(
        master.http_addr,
        "/capture?session=s&frame_count=3&framesize=vga&pixel_format=jpeg&cpu_time_to_start=50&brightness=2",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    // Three master artifacts named s-<ms>.jpg.
    let names = support::artifact_names(&master_dir);
    assert_eq!(names.len(), 3, "master artifacts: {names:?}");
    for name in &names {
        let (session, _stamp_ms, format) = parse_artifact_name(name).unwrap();
        assert_eq!(session.as_str(), "s");
        assert_eq!(format, PixelFormat::Jpeg);
    }

    // The slave fired its own three frames.
    support::wait_slot_idle(&slave.slot).await;
    let slave_names = support::artifact_names(&slave_dir);
    assert_eq!(slave_names.len(), 3, "slave artifacts: {slave_names:?}");

    // Sensor tuning reached both drivers.
    let tuned = |ops: &[SensorOp]| {
        ops.iter()
            .any(|op| *op == SensorOp::SetParameter("brightness".to_string(), "2".to_string()))
    };
    assert!(tuned(&master_ctl.ops()));
    assert!(tuned(&slave_ctl.ops()));

    // Restore idempotence: both ends are back in the streaming default.
    assert_eq!(master.camera.lock().await.state(), state_before);
    assert!(master.supervisor.is_enabled());
    assert_eq!(slave.camera.lock().await.state(), state_before);
    assert!(slave.supervisor.is_enabled());

    // Status endpoints answer on both ends.
    let (status, body) = support::http_get(master.http_addr, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"master\""));
    let (status, body) = support::http_get(slave.http_addr, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"slave\""));
}
