//! Core type definitions for the twincam synchronized capture pair.
//!
//! Everything the master and slave endpoints exchange or persist is defined
//! here: capture parameters, the UDP sync wire protocol, clock-sync metrics
//! and the start-delay computation, and the on-disk artifact naming scheme.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

mod artifact;
mod clock;
mod format;
mod session_id;
pub mod wire;

pub use artifact::{artifact_name, parse_artifact_name};
pub use clock::{monotonic_ms, monotonic_us};
pub use format::{FrameSize, PixelFormat};
pub use session_id::{SessionId, SessionIdError, MAX_SESSION_ID_LEN};

/// Default UDP port for the sync protocol (probe echo, READY, START).
pub const DEFAULT_SYNC_PORT: u16 = 65;

/// Maximum length of the diagnostic string in a [CaptureOutcome].
pub const MAX_DIAGNOSTIC_LEN: usize = 63;

/// Parameters of one synchronized capture.
///
/// Created when a request is accepted (HTTP capture request on the master,
/// HTTP prepare on the slave) and immutable from then on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub session: SessionId,
    pub frame_count: u32,
    pub frame_size: FrameSize,
    pub pixel_format: PixelFormat,
    /// Override of the configured safety margin, in microseconds.
    pub safety_margin_us: Option<i64>,
    /// Sensor tuning key/value pairs, applied verbatim to the sensor driver.
    pub sensor_params: BTreeMap<String, String>,
}

/// Names of the HTTP parameters consumed by [CaptureRequest::from_params].
/// Anything else in the parameter map is treated as sensor tuning.
const PARAM_SESSION: &str = "session";
const PARAM_FRAME_COUNT: &str = "frame_count";
const PARAM_FRAMESIZE: &str = "framesize";
const PARAM_PIXEL_FORMAT: &str = "pixel_format";
const PARAM_TIME_TO_START: &str = "cpu_time_to_start";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("missing parameter \"{0}\"")]
    Missing(&'static str),
    #[error("invalid value \"{value}\" for parameter \"{name}\"")]
    Invalid { name: &'static str, value: String },
    #[error("frame_count must be at least 1")]
    ZeroFrameCount,
    #[error(transparent)]
    Session(#[from] SessionIdError),
}

impl CaptureRequest {
    /// Build a request from an HTTP query/form parameter map.
    ///
    /// Recognized keys are `session`, `frame_count`, `framesize`,
    /// `pixel_format` and the optional `cpu_time_to_start` (milliseconds,
    /// converted to the safety-margin override). All remaining keys are
    /// collected as sensor tuning parameters.
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<CaptureRequest, RequestError> {
        fn required<'a>(
            params: &'a BTreeMap<String, String>,
            name: &'static str,
        ) -> Result<&'a str, RequestError> {
            params
                .get(name)
                .map(|v| v.as_str())
                .ok_or(RequestError::Missing(name))
        }

        let session: SessionId = required(params, PARAM_SESSION)?.parse()?;

        let frame_count: u32 = {
            let raw = required(params, PARAM_FRAME_COUNT)?;
            raw.parse().map_err(|_| RequestError::Invalid {
                name: PARAM_FRAME_COUNT,
                value: raw.to_string(),
            })?
        };
        if frame_count == 0 {
            return Err(RequestError::ZeroFrameCount);
        }

        let frame_size: FrameSize = {
            let raw = required(params, PARAM_FRAMESIZE)?;
            raw.parse().map_err(|_| RequestError::Invalid {
                name: PARAM_FRAMESIZE,
                value: raw.to_string(),
            })?
        };

        let pixel_format: PixelFormat = {
            let raw = required(params, PARAM_PIXEL_FORMAT)?;
            raw.parse().map_err(|_| RequestError::Invalid {
                name: PARAM_PIXEL_FORMAT,
                value: raw.to_string(),
            })?
        };

        let safety_margin_us = match params.get(PARAM_TIME_TO_START) {
            None => None,
            Some(raw) => {
                let ms: i64 = raw.parse().map_err(|_| RequestError::Invalid {
                    name: PARAM_TIME_TO_START,
                    value: raw.clone(),
                })?;
                Some(ms * 1000)
            }
        };

        let sensor_params = params
            .iter()
            .filter(|(k, _)| {
                !matches!(
                    k.as_str(),
                    PARAM_SESSION
                        | PARAM_FRAME_COUNT
                        | PARAM_FRAMESIZE
                        | PARAM_PIXEL_FORMAT
                        | PARAM_TIME_TO_START
                )
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(CaptureRequest {
            session,
            frame_count,
            frame_size,
            pixel_format,
            safety_margin_us,
            sensor_params,
        })
    }
}

/// Result of one capture, returned synchronously to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOutcome {
    pub ok: bool,
    /// Short diagnostic, truncated to [MAX_DIAGNOSTIC_LEN] bytes.
    pub message: String,
    pub artifacts: Vec<PathBuf>,
}

impl CaptureOutcome {
    pub fn success(artifacts: Vec<PathBuf>) -> Self {
        CaptureOutcome {
            ok: true,
            message: "OK".to_string(),
            artifacts,
        }
    }

    pub fn failure<S: Into<String>>(message: S) -> Self {
        let mut message = message.into();
        if message.len() > MAX_DIAGNOSTIC_LEN {
            let mut end = MAX_DIAGNOSTIC_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        CaptureOutcome {
            ok: false,
            message,
            artifacts: Vec::new(),
        }
    }
}

/// Link measurements from one clock-probe session.
///
/// Both fields are zero when no probe succeeded, otherwise the arithmetic
/// mean over all successful samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetrics {
    /// One-way network latency in microseconds, estimated as RTT/2.
    pub one_way_trip_us: i64,
    /// Signed master-minus-slave monotonic clock offset in microseconds.
    /// Positive means the master clock is ahead.
    pub cpu_disparity_us: i64,
}

impl SyncMetrics {
    pub const ZERO: SyncMetrics = SyncMetrics {
        one_way_trip_us: 0,
        cpu_disparity_us: 0,
    };
}

/// The two start-delay budgets for one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartDelays {
    /// How long the master waits after `ACK`, in master-local time.
    pub master_delay_us: i64,
    /// The delay delivered inside `START <delay>`, in slave-local time.
    pub slave_delay_us: i64,
}

impl StartDelays {
    /// Compute both delays from the safety overhead and the probe metrics.
    ///
    /// At the instant the slave receives `START`, `trip` microseconds of
    /// transit have already passed since the master sent it, and the slave
    /// clock reads `disparity` microseconds behind the master's. The master
    /// deadline absorbs both so that `master_now + master_delay` and
    /// `slave_now_at_recv + slave_delay` name the same physical instant up
    /// to probe noise.
    pub fn compute(safety_us: i64, metrics: &SyncMetrics) -> StartDelays {
        StartDelays {
            master_delay_us: (safety_us + metrics.one_way_trip_us + metrics.cpu_disparity_us)
                .max(0),
            slave_delay_us: safety_us,
        }
    }
}
