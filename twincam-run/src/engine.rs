//! The slave's prepared-then-armed capture executor.
//!
//! Two phases. *Prepare* arrives over HTTP with the same parameter set the
//! master accepted, quiesces local streaming, configures the camera, and
//! arms the [CaptureSlot]. *Fire* arrives as a [FireCommand] from the sync
//! server task once `START <delay>` was acknowledged; the engine sleeps to
//! the slave-local deadline, pulls and persists the frames, and restores
//! streaming.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use twincam_camera::{CameraPipeline, SensorDriver};
use twincam_sync::{wait_until_us, CaptureSlot, FireCommand};
use twincam_types::{CaptureRequest, FrameSize, PixelFormat, RequestError};

use crate::config::SyncConfig;
use crate::persist::write_artifact;
use crate::stream::StreamSupervisor;

#[derive(thiserror::Error, Debug)]
pub enum PrepareError {
    /// Already armed or capturing.
    #[error("busy")]
    Busy,
    #[error(transparent)]
    BadRequest(#[from] RequestError),
    #[error("camera init failed")]
    CameraInit,
}

pub struct CaptureEngine<D: SensorDriver> {
    camera: Arc<Mutex<CameraPipeline<D>>>,
    supervisor: Arc<StreamSupervisor>,
    slot: Arc<CaptureSlot>,
    sync: SyncConfig,
    capture_dir: PathBuf,
    stream_framesize: FrameSize,
}

impl<D: SensorDriver> CaptureEngine<D> {
    pub fn new(
        camera: Arc<Mutex<CameraPipeline<D>>>,
        supervisor: Arc<StreamSupervisor>,
        slot: Arc<CaptureSlot>,
        sync: SyncConfig,
        capture_dir: PathBuf,
        stream_framesize: FrameSize,
    ) -> CaptureEngine<D> {
        CaptureEngine {
            camera,
            supervisor,
            slot,
            sync,
            capture_dir,
            stream_framesize,
        }
    }

    pub fn slot(&self) -> &Arc<CaptureSlot> {
        &self.slot
    }

    /// Arm for one capture. Streaming stays quiesced until the capture has
    /// fired (or the arm is dropped); the camera is left fully configured
    /// so `START` only has to wait out its delay.
    pub async fn prepare(&self, params: &BTreeMap<String, String>) -> Result<(), PrepareError> {
        let request = CaptureRequest::from_params(params)?;
        if self.slot.is_busy() {
            return Err(PrepareError::Busy);
        }
        info!("prepare {}: {:?} {:?}", request.session, request.pixel_format, request.frame_size);

        self.supervisor.disable();
        self.supervisor
            .await_quiescence(Duration::from_secs(2))
            .await;

        let mut cam = self.camera.lock().await;
        cam.mark_idle();
        // Raw targets need the full DMA reconfiguration; a JPEG target only
        // moves the size within the already-configured format.
        let configured = if request.pixel_format != PixelFormat::Jpeg {
            cam.reinitialize(request.pixel_format, request.frame_size)
        } else {
            cam.set_size_within_format(request.frame_size)
        };
        if let Err(err) = configured {
            error!("prepare: camera reconfig failed: {err}");
            self.restore_streaming(&mut cam);
            return Err(PrepareError::CameraInit);
        }
        for (name, value) in &request.sensor_params {
            if let Err(err) = cam.set_parameter(name, value) {
                warn!("sensor parameter {name}={value} rejected: {err}");
            }
        }
        if let Err(err) = cam.drop_frames(self.sync.drop_frames) {
            warn!("prepare warm-up failed: {err}");
        }
        cam.mark_prepared();
        drop(cam);

        if !self.slot.try_arm(request) {
            // Lost a race with a concurrent prepare.
            let mut cam = self.camera.lock().await;
            self.restore_streaming(&mut cam);
            return Err(PrepareError::Busy);
        }
        Ok(())
    }

    /// Consume [FireCommand]s for the life of the process.
    pub async fn run(self: Arc<Self>, mut fire_rx: mpsc::Receiver<FireCommand>) {
        while let Some(cmd) = fire_rx.recv().await {
            self.fire(cmd).await;
        }
    }

    async fn fire(&self, cmd: FireCommand) {
        // The delay is slave-local time from START receipt, not from
        // engine pickup.
        let deadline_us = cmd.received_at_us + cmd.delay_us;
        let request = cmd.request;
        info!("firing {} after {}us", request.session, cmd.delay_us);

        let mut cam = self.camera.lock().await;
        wait_until_us(deadline_us).await;

        let mut persisted = 0u32;
        let mut dropped = 0u32;
        for _ in 0..request.frame_count {
            match cam.pull_frame() {
                Ok(frame) => {
                    match write_artifact(&self.capture_dir, &request.session, &frame) {
                        Ok(path) => {
                            debug!("persisted {}", path.display());
                            persisted += 1;
                        }
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
        if persisted == 0 {
            error!("capture {}: no frames persisted ({dropped} failed)", request.session);
        } else {
            info!("capture {}: {persisted} frames ({dropped} dropped)", request.session);
        }

        self.restore_streaming(&mut cam);
        drop(cam);
        self.slot.finish_fire();
    }

    /// Back to the JPEG streaming default. A raw-format capture needs the
    /// full reinit; a JPEG capture only flips the state back over.
    fn restore_streaming(&self, cam: &mut CameraPipeline<D>) {
        let state = cam.state();
        if !state.is_live() || state.pixel_format() != Some(PixelFormat::Jpeg) {
            if let Err(err) = cam.reinitialize(PixelFormat::Jpeg, self.stream_framesize) {
                error!("camera restore failed: {err}");
                return;
            }
            if let Err(err) = cam.drop_frames(self.sync.drop_frames) {
                warn!("post-restore warm-up failed: {err}");
            }
        }
        cam.mark_streaming();
        self.supervisor.enable();
    }
}
