//! The master's capture sequencer.
//!
//! Requests enter through a bounded queue; a single consumer task drives
//! each one through the phase machine below and returns a
//! [CaptureOutcome] over the requester's oneshot. The restore step runs on
//! every path out of the machine, so the camera always ends back in the
//! JPEG streaming default.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use twincam_camera::{CameraPipeline, SensorDriver};
use twincam_sync::{probe_clock, wait_until_us, SlaveControl, DEFAULT_PROBE_TIMEOUT};
use twincam_types::{
    monotonic_us, CaptureOutcome, CaptureRequest, FrameSize, PixelFormat, StartDelays, SyncMetrics,
};

use crate::config::{Config, MasterConfig, SyncConfig};
use crate::http_client::PrepareClient;
use crate::persist::write_artifact;
use crate::stream::StreamSupervisor;

/// Capture failure kinds. The `Display` strings are the wire-visible
/// diagnostics handed back to HTTP clients.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera init failed")]
    CameraInit,
    #[error("slave not ready")]
    SlaveNotReady,
    #[error("udp sync failed")]
    UdpSyncFailed,
    #[error("slave start failed")]
    SlaveStartFailed,
    #[error("capture busy")]
    Busy,
    #[error("capture timeout")]
    Timeout,
}

struct CaptureJob {
    request: CaptureRequest,
    outcome_tx: oneshot::Sender<CaptureOutcome>,
    /// Queue slot, held until the job completes.
    _slot: OwnedSemaphorePermit,
}

/// Producer handle onto the capture queue.
#[derive(Clone)]
pub struct CaptureHandle {
    slots: Arc<Semaphore>,
    depth: usize,
    tx: mpsc::Sender<CaptureJob>,
}

impl CaptureHandle {
    /// Enqueue and wait for completion.
    ///
    /// The bound counts queued plus running captures; a producer that finds
    /// every slot taken fails fast with [CaptureError::Busy] and does not
    /// disturb the in-flight sequence.
    pub async fn submit(&self, request: CaptureRequest) -> Result<CaptureOutcome, CaptureError> {
        let permit = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| CaptureError::Busy)?;
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let job = CaptureJob {
            request,
            outcome_tx,
            _slot: permit,
        };
        if self.tx.send(job).await.is_err() {
            return Err(CaptureError::Timeout);
        }
        outcome_rx.await.map_err(|_| CaptureError::Timeout)
    }

    /// True when no capture is queued or running.
    pub fn idle(&self) -> bool {
        self.slots.available_permits() == self.depth
    }
}

/// Phases of one capture, in consumer order. `Restore` is not listed: it
/// runs unconditionally after the machine exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    QuiesceStream,
    PrepareSlave,
    WaitSettle,
    ReconfigCamera,
    ApplySensor,
    Warmup,
    AwaitSlaveReady,
    ClockProbe,
    SkipSync,
    Fire,
    SpinToDeadline,
    Record,
}

struct CaptureCtx<D: SensorDriver> {
    request: CaptureRequest,
    /// Exclusive camera ownership for the duration of the sequence.
    camera: Option<OwnedMutexGuard<CameraPipeline<D>>>,
    control: Option<SlaveControl>,
    metrics: SyncMetrics,
    /// Set once the slave is established as unreachable (prepare failed,
    /// READY timed out, or the probe drew no replies). From then on no
    /// `START` is sent and the master captures alone.
    slave_absent: bool,
    deadline_us: i64,
    artifacts: Vec<PathBuf>,
}

pub struct Orchestrator<D: SensorDriver> {
    camera: Arc<Mutex<CameraPipeline<D>>>,
    supervisor: Arc<StreamSupervisor>,
    sync: SyncConfig,
    master: Option<MasterConfig>,
    capture_dir: PathBuf,
    stream_framesize: FrameSize,
}

/// Start the single consumer task and hand back the producer side.
pub fn spawn_orchestrator<D: SensorDriver + 'static>(
    camera: Arc<Mutex<CameraPipeline<D>>>,
    supervisor: Arc<StreamSupervisor>,
    cfg: &Config,
) -> CaptureHandle {
    let depth = cfg.sync.queue_depth.max(1);
    let (tx, rx) = mpsc::channel(depth);
    let handle = CaptureHandle {
        slots: Arc::new(Semaphore::new(depth)),
        depth,
        tx,
    };
    let orchestrator = Orchestrator {
        camera,
        supervisor,
        sync: cfg.sync.clone(),
        master: cfg.master.clone(),
        capture_dir: cfg.capture_dir.clone(),
        stream_framesize: cfg.stream_framesize,
    };
    tokio::spawn(orchestrator.run(rx));
    handle
}

impl<D: SensorDriver + 'static> Orchestrator<D> {
    async fn run(self, mut rx: mpsc::Receiver<CaptureJob>) {
        while let Some(job) = rx.recv().await {
            let session = job.request.session.clone();
            info!("capture {session}: accepted");
            let outcome = self.run_capture(job.request).await;
            if outcome.ok {
                info!("capture {session}: done, {} artifacts", outcome.artifacts.len());
            } else {
                warn!("capture {session}: failed: {}", outcome.message);
            }
            // The requester may have dropped its interest; the sequence
            // completed regardless.
            let _ = job.outcome_tx.send(outcome);
        }
    }

    async fn run_capture(&self, request: CaptureRequest) -> CaptureOutcome {
        let mut ctx = CaptureCtx {
            request,
            camera: None,
            control: None,
            metrics: SyncMetrics::ZERO,
            slave_absent: self.master.is_none(),
            deadline_us: 0,
            artifacts: Vec::new(),
        };
        let mut phase = Phase::QuiesceStream;
        let result = loop {
            debug!("capture phase {phase:?}");
            match self.step(&mut ctx, phase).await {
                Ok(Some(next)) => phase = next,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.restore(&mut ctx).await;
        match result {
            Ok(()) => CaptureOutcome {
                ok: true,
                message: "OK".to_string(),
                artifacts: std::mem::take(&mut ctx.artifacts),
            },
            Err(err) => CaptureOutcome::failure(err.to_string()),
        }
    }

    /// One transition. `Ok(None)` leaves the machine successfully.
    async fn step(
        &self,
        ctx: &mut CaptureCtx<D>,
        phase: Phase,
    ) -> Result<Option<Phase>, CaptureError> {
        match phase {
            Phase::QuiesceStream => {
                self.supervisor.disable();
                self.supervisor
                    .await_quiescence(Duration::from_secs(2))
                    .await;
                ctx.camera = Some(self.camera.clone().lock_owned().await);
                Ok(Some(Phase::PrepareSlave))
            }

            Phase::PrepareSlave => {
                if let Some(master) = &self.master {
                    let client = PrepareClient::new(&master.slave_http);
                    if let Err(err) = client.prepare(&ctx.request).await {
                        warn!("slave prepare failed: {err}");
                        if !self.sync.allow_slave_missing {
                            return Err(CaptureError::SlaveNotReady);
                        }
                        ctx.slave_absent = true;
                    }
                }
                Ok(Some(Phase::WaitSettle))
            }

            Phase::WaitSettle => {
                if !ctx.slave_absent {
                    tokio::time::sleep(self.sync.prepare_settle()).await;
                }
                Ok(Some(Phase::ReconfigCamera))
            }

            Phase::ReconfigCamera => {
                // Always a full reinit to the requested format/size, even
                // when only the size differs from the streaming default.
                let cam = ctx.camera.as_mut().expect("camera taken in quiesce");
                cam.reinitialize(ctx.request.pixel_format, ctx.request.frame_size)
                    .map_err(|err| {
                        error!("camera reconfig failed: {err}");
                        CaptureError::CameraInit
                    })?;
                cam.mark_prepared();
                Ok(Some(Phase::ApplySensor))
            }

            Phase::ApplySensor => {
                let cam = ctx.camera.as_mut().expect("camera taken in quiesce");
                for (name, value) in &ctx.request.sensor_params {
                    if let Err(err) = cam.set_parameter(name, value) {
                        warn!("sensor parameter {name}={value} rejected: {err}");
                    }
                }
                Ok(Some(Phase::Warmup))
            }

            Phase::Warmup => {
                let cam = ctx.camera.as_mut().expect("camera taken in quiesce");
                cam.drop_frames(self.sync.drop_frames)
                    .map_err(|err| {
                        error!("warm-up failed: {err}");
                        CaptureError::CameraInit
                    })?;
                Ok(Some(Phase::AwaitSlaveReady))
            }

            Phase::AwaitSlaveReady => {
                if ctx.slave_absent {
                    return Ok(Some(Phase::SkipSync));
                }
                let master = self.master.as_ref().expect("slave_absent covers no-master");
                let outcome = match SlaveControl::connect(&master.slave_sync).await {
                    Ok(control) => {
                        let ready = control
                            .await_ready(self.sync.ready_timeout(), self.sync.ready_poll())
                            .await;
                        ctx.control = Some(control);
                        ready
                    }
                    Err(err) => Err(err),
                };
                match outcome {
                    Ok(()) => Ok(Some(Phase::ClockProbe)),
                    Err(err) => {
                        warn!("slave not ready: {err}");
                        if !self.sync.allow_slave_missing {
                            return Err(CaptureError::SlaveNotReady);
                        }
                        ctx.slave_absent = true;
                        Ok(Some(Phase::SkipSync))
                    }
                }
            }

            Phase::ClockProbe => {
                let master = self.master.as_ref().expect("checked in await-ready");
                match probe_clock(
                    &master.slave_sync,
                    self.sync.probe_pings,
                    DEFAULT_PROBE_TIMEOUT,
                )
                .await
                {
                    Ok(metrics) => {
                        info!(
                            "link: trip {}us, disparity {}us",
                            metrics.one_way_trip_us, metrics.cpu_disparity_us
                        );
                        ctx.metrics = metrics;
                        Ok(Some(Phase::Fire))
                    }
                    Err(err) => {
                        warn!("clock probe failed: {err}");
                        if !self.sync.allow_slave_missing {
                            return Err(CaptureError::UdpSyncFailed);
                        }
                        ctx.slave_absent = true;
                        Ok(Some(Phase::SkipSync))
                    }
                }
            }

            Phase::SkipSync => {
                ctx.metrics = SyncMetrics::ZERO;
                Ok(Some(Phase::Fire))
            }

            Phase::Fire => {
                let safety_us = ctx
                    .request
                    .safety_margin_us
                    .unwrap_or_else(|| self.sync.safety_margin_us());
                let delays = StartDelays::compute(safety_us, &ctx.metrics);
                debug!(
                    "delays: slave {}us, master {}us",
                    delays.slave_delay_us, delays.master_delay_us
                );
                if !ctx.slave_absent {
                    let control = ctx.control.as_ref().expect("set in await-ready");
                    if let Err(err) = control
                        .fire(
                            delays.slave_delay_us,
                            self.sync.start_retries,
                            self.sync.start_retry_delay(),
                        )
                        .await
                    {
                        warn!("START not acknowledged: {err}");
                        if !self.sync.allow_slave_missing {
                            return Err(CaptureError::SlaveStartFailed);
                        }
                        ctx.slave_absent = true;
                    }
                }
                // Computed after the ACK so the deadline shares the clock
                // the metrics were measured against.
                ctx.deadline_us = monotonic_us() + delays.master_delay_us;
                Ok(Some(Phase::SpinToDeadline))
            }

            Phase::SpinToDeadline => {
                wait_until_us(ctx.deadline_us).await;
                Ok(Some(Phase::Record))
            }

            Phase::Record => {
                let cam = ctx.camera.as_mut().expect("camera taken in quiesce");
                let mut dropped = 0u32;
                for _ in 0..ctx.request.frame_count {
                    match cam.pull_frame() {
                        Ok(frame) => {
                            match write_artifact(&self.capture_dir, &ctx.request.session, &frame) {
                                Ok(path) => ctx.artifacts.push(path),
                                Err(err) => {
                                    warn!("artifact write failed: {err}");
                                    dropped += 1;
                                }
                            }
                            cam.return_frame(frame);
                        }
                        Err(err) => {
                            warn!("frame pull failed: {err}");
                            dropped += 1;
                        }
                    }
                }
                if ctx.artifacts.is_empty() {
                    error!("all {dropped} frames failed");
                    return Err(CaptureError::Timeout);
                }
                if dropped > 0 {
                    warn!("{dropped} of {} frames dropped", ctx.request.frame_count);
                }
                Ok(None)
            }
        }
    }

    /// Unconditional return to the JPEG streaming default, on every path
    /// out of the machine, then release the camera to the stream loop.
    async fn restore(&self, ctx: &mut CaptureCtx<D>) {
        if let Some(cam) = ctx.camera.as_mut() {
            match cam.reinitialize(PixelFormat::Jpeg, self.stream_framesize) {
                Ok(()) => {
                    if let Err(err) = cam.drop_frames(self.sync.drop_frames) {
                        warn!("post-restore warm-up failed: {err}");
                    }
                    cam.mark_streaming();
                }
                Err(err) => error!("camera restore failed: {err}"),
            }
        }
        ctx.camera = None;
        ctx.control = None;
        self.supervisor.enable();
    }
}
