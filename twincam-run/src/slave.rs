//! Slave endpoint assembly: camera bring-up, stream task, capture engine,
//! UDP sync server, HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use twincam_camera::{CameraPipeline, SensorDriver};
use twincam_sync::{sync_server, CaptureSlot};
use twincam_types::PixelFormat;

use crate::config::Config;
use crate::engine::CaptureEngine;
use crate::http_slave::{slave_router, SlaveAppState};
use crate::stream::{stream_task, FrameBroadcaster, StreamSupervisor};

const STREAM_FRAME_INTERVAL: Duration = Duration::from_millis(100);

pub struct SlaveParts<D: SensorDriver> {
    pub http_addr: SocketAddr,
    pub sync_addr: SocketAddr,
    pub slot: Arc<CaptureSlot>,
    pub camera: Arc<Mutex<CameraPipeline<D>>>,
    pub supervisor: Arc<StreamSupervisor>,
}

/// Bring up the whole slave task set. Returns once both listeners are
/// bound; the tasks run until the process exits.
pub async fn start_slave<D: SensorDriver + 'static>(
    cfg: Config,
    driver: D,
) -> anyhow::Result<SlaveParts<D>> {
    let supervisor = StreamSupervisor::new(true);
    let mut pipeline = CameraPipeline::new(driver, cfg.sync.drop_frames);
    pipeline.initialize(PixelFormat::Jpeg, cfg.stream_framesize)?;
    pipeline.warm_up()?;
    pipeline.mark_streaming();
    let camera = Arc::new(Mutex::new(pipeline));

    let broadcaster = FrameBroadcaster::new();
    tokio::spawn(stream_task(
        supervisor.clone(),
        camera.clone(),
        broadcaster.clone(),
        STREAM_FRAME_INTERVAL,
    ));

    let slot = Arc::new(CaptureSlot::new());
    let engine = Arc::new(CaptureEngine::new(
        camera.clone(),
        supervisor.clone(),
        slot.clone(),
        cfg.sync.clone(),
        cfg.capture_dir.clone(),
        cfg.stream_framesize,
    ));
    let (fire_tx, fire_rx) = mpsc::channel(1);
    tokio::spawn(engine.clone().run(fire_rx));

    let sync_sock = tokio::net::UdpSocket::bind(("0.0.0.0", cfg.sync.port)).await?;
    let sync_addr = sync_sock.local_addr()?;
    info!("sync server on udp {sync_addr}");
    let server_slot = slot.clone();
    tokio::spawn(async move {
        if let Err(err) = sync_server(sync_sock, server_slot, fire_tx).await {
            error!("sync server failed: {err}");
        }
    });

    let state = SlaveAppState {
        engine,
        slot: slot.clone(),
        camera: camera.clone(),
        broadcaster,
    };
    let listener = tokio::net::TcpListener::bind(&cfg.http.listen).await?;
    let http_addr = listener.local_addr()?;
    info!("slave HTTP on {http_addr}");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, slave_router(state)).await {
            error!("HTTP server failed: {err}");
        }
    });

    Ok(SlaveParts {
        http_addr,
        sync_addr,
        slot,
        camera,
        supervisor,
    })
}

/// Binary entry point: start everything and park until interrupted.
pub async fn run_slave<D: SensorDriver + 'static>(cfg: Config, driver: D) -> anyhow::Result<()> {
    let parts = start_slave(cfg, driver).await?;
    info!(
        "slave up; prepare endpoint http://{}/prepare, sync on udp {}",
        parts.http_addr, parts.sync_addr
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
