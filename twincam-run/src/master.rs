//! Master endpoint assembly: camera bring-up, stream task, capture task,
//! HTTP server.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info};

use twincam_camera::{CameraPipeline, SensorDriver};
use twincam_types::PixelFormat;

use crate::config::Config;
use crate::http_master::{master_router, MasterAppState};
use crate::orchestrator::{spawn_orchestrator, CaptureHandle};
use crate::stream::{stream_task, FrameBroadcaster, StreamSupervisor};

/// Stream loop pacing.
const STREAM_FRAME_INTERVAL: Duration = Duration::from_millis(100);

pub struct MasterParts<D: SensorDriver> {
    pub http_addr: SocketAddr,
    pub capture: CaptureHandle,
    pub camera: Arc<Mutex<CameraPipeline<D>>>,
    pub supervisor: Arc<StreamSupervisor>,
}

/// Bring up the whole master task set. Returns once the HTTP listener is
/// bound; the tasks run until the process exits.
pub async fn start_master<D: SensorDriver + 'static>(
    cfg: Config,
    driver: D,
) -> anyhow::Result<MasterParts<D>> {
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

    let capture = spawn_orchestrator(camera.clone(), supervisor.clone(), &cfg);

    let state = MasterAppState {
        capture: capture.clone(),
        camera: camera.clone(),
        broadcaster,
        last_outcome: Arc::new(RwLock::new(None)),
    };
    let listener = tokio::net::TcpListener::bind(&cfg.http.listen).await?;
    let http_addr = listener.local_addr()?;
    info!("master HTTP on {http_addr}");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, master_router(state)).await {
            error!("HTTP server failed: {err}");
        }
    });

    Ok(MasterParts {
        http_addr,
        capture,
        camera,
        supervisor,
    })
}

/// Binary entry point: start everything and park until interrupted.
pub async fn run_master<D: SensorDriver + 'static>(cfg: Config, driver: D) -> anyhow::Result<()> {
    let parts = start_master(cfg, driver).await?;
    info!(
        "master up; capture endpoint http://{}/capture",
        parts.http_addr
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
