//! The master's HTTP front-end: capture, status, sensor control, stream.
//!
//! Handlers are thin producers into the capture queue; mutual exclusion
//! lives in the single consumer task, not here.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use http::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;

use twincam_camera::{CameraPipeline, SensorDriver};
use twincam_types::{CaptureOutcome, CaptureRequest};

use crate::orchestrator::{CaptureError, CaptureHandle};
use crate::stream::{mjpeg_response, FrameBroadcaster};

pub struct MasterAppState<D: SensorDriver> {
    pub capture: CaptureHandle,
    pub camera: Arc<Mutex<CameraPipeline<D>>>,
    pub broadcaster: FrameBroadcaster,
    pub last_outcome: Arc<RwLock<Option<CaptureOutcome>>>,
}

impl<D: SensorDriver> Clone for MasterAppState<D> {
    fn clone(&self) -> Self {
        MasterAppState {
            capture: self.capture.clone(),
            camera: self.camera.clone(),
            broadcaster: self.broadcaster.clone(),
            last_outcome: self.last_outcome.clone(),
        }
    }
}

pub fn master_router<D: SensorDriver + 'static>(state: MasterAppState<D>) -> Router {
    Router::new()
        .route("/capture", get(capture_handler::<D>))
        .route("/status", get(status_handler::<D>))
        .route("/control", get(control_handler::<D>))
        .route("/stream", get(stream_handler::<D>))
        .with_state(state)
}

/// Blocks until the capture completes (or is rejected as busy).
async fn capture_handler<D: SensorDriver + 'static>(
    State(state): State<MasterAppState<D>>,
    Query(params): Query<BTreeMap<String, String>>,
) -> (StatusCode, String) {
    let request = match CaptureRequest::from_params(&params) {
        Ok(request) => request,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()),
    };
    match state.capture.submit(request).await {
        Err(CaptureError::Busy) => (StatusCode::CONFLICT, CaptureError::Busy.to_string()),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        Ok(outcome) => {
            *state.last_outcome.write().unwrap() = Some(outcome.clone());
            if outcome.ok {
                (StatusCode::OK, "OK".to_string())
            } else {
                (StatusCode::INTERNAL_SERVER_ERROR, outcome.message)
            }
        }
    }
}

async fn status_handler<D: SensorDriver + 'static>(
    State(state): State<MasterAppState<D>>,
) -> Json<serde_json::Value> {
    let camera_state = match state.camera.try_lock() {
        Ok(cam) => format!("{:?}", cam.state()),
        Err(_) => "busy".to_string(),
    };
    let last_outcome = state.last_outcome.read().unwrap().clone();
    Json(serde_json::json!({
        "role": "master",
        "capture_in_progress": !state.capture.idle(),
        "camera_state": camera_state,
        "last_outcome": last_outcome,
    }))
}

#[derive(Debug, Deserialize)]
struct ControlQuery {
    var: String,
    val: String,
}

/// Sensor-register update outside a capture. Refused while the capture
/// task owns the camera.
async fn control_handler<D: SensorDriver + 'static>(
    State(state): State<MasterAppState<D>>,
    Query(query): Query<ControlQuery>,
) -> (StatusCode, String) {
    match state.camera.try_lock() {
        Ok(mut cam) => match cam.set_parameter(&query.var, &query.val) {
            Ok(()) => (StatusCode::OK, "OK".to_string()),
            Err(err) => (StatusCode::BAD_REQUEST, err.to_string()),
        },
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "camera busy".to_string()),
    }
}

async fn stream_handler<D: SensorDriver + 'static>(
    State(state): State<MasterAppState<D>>,
) -> Response {
    mjpeg_response(&state.broadcaster)
}
