//! The slave's HTTP front-end: prepare, status, stream.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use percent_encoding::percent_decode_str;
use tokio::sync::Mutex;

use twincam_camera::{CameraPipeline, SensorDriver};
use twincam_sync::CaptureSlot;

use crate::engine::{CaptureEngine, PrepareError};
use crate::stream::{mjpeg_response, FrameBroadcaster};

pub struct SlaveAppState<D: SensorDriver> {
    pub engine: Arc<CaptureEngine<D>>,
    pub slot: Arc<CaptureSlot>,
    pub camera: Arc<Mutex<CameraPipeline<D>>>,
    pub broadcaster: FrameBroadcaster,
}

impl<D: SensorDriver> Clone for SlaveAppState<D> {
    fn clone(&self) -> Self {
        SlaveAppState {
            engine: self.engine.clone(),
            slot: self.slot.clone(),
            camera: self.camera.clone(),
            broadcaster: self.broadcaster.clone(),
        }
    }
}

pub fn slave_router<D: SensorDriver + 'static>(state: SlaveAppState<D>) -> Router {
    Router::new()
        .route("/prepare", post(prepare_handler::<D>))
        .route("/status", get(status_handler::<D>))
        .route("/stream", get(stream_handler::<D>))
        .with_state(state)
}

/// Decode an `application/x-www-form-urlencoded` body.
fn parse_form(body: &str) -> BTreeMap<String, String> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |raw: &str| {
                percent_decode_str(&raw.replace('+', " "))
                    .decode_utf8()
                    .ok()
                    .map(|c| c.into_owned())
            };
            Some((decode(name)?, decode(value)?))
        })
        .collect()
}

/// Capture parameters arrive in the URL query or a form body.
async fn prepare_handler<D: SensorDriver + 'static>(
    State(state): State<SlaveAppState<D>>,
    Query(query): Query<BTreeMap<String, String>>,
    body: String,
) -> (StatusCode, String) {
    let params = if query.is_empty() {
        parse_form(&body)
    } else {
        query
    };
    match state.engine.prepare(&params).await {
        Ok(()) => (StatusCode::OK, "OK".to_string()),
        Err(PrepareError::Busy) => (StatusCode::CONFLICT, "busy".to_string()),
        Err(PrepareError::BadRequest(err)) => (StatusCode::BAD_REQUEST, err.to_string()),
        Err(PrepareError::CameraInit) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "camera init failed".to_string())
        }
    }
}

async fn status_handler<D: SensorDriver + 'static>(
    State(state): State<SlaveAppState<D>>,
) -> Json<serde_json::Value> {
    let (armed, in_progress) = state.slot.snapshot();
    let camera_state = match state.camera.try_lock() {
        Ok(cam) => format!("{:?}", cam.state()),
        Err(_) => "busy".to_string(),
    };
    Json(serde_json::json!({
        "role": "slave",
        "armed": armed,
        "in_progress": in_progress,
        "camera_state": camera_state,
    }))
}

async fn stream_handler<D: SensorDriver + 'static>(
    State(state): State<SlaveAppState<D>>,
) -> Response {
    mjpeg_response(&state.broadcaster)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_decoding() {
        let params = parse_form("session=s-1&frame_count=3&wb+mode=sunny%20day&flag");
        assert_eq!(params.get("session").unwrap(), "s-1");
        assert_eq!(params.get("frame_count").unwrap(), "3");
        assert_eq!(params.get("wb mode").unwrap(), "sunny day");
        assert_eq!(params.get("flag").unwrap(), "");
    }
}
