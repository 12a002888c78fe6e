//! HTTP client for the slave's prepare endpoint.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tracing::debug;

use twincam_types::CaptureRequest;

const PREPARE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum PrepareHttpError {
    #[error("http error `{0}`")]
    Http(#[from] http::Error),
    #[error("hyper error `{0}`")]
    Hyper(#[from] hyper::Error),
    #[error("hyper-util error `{0}`")]
    HyperUtil(#[from] hyper_util::client::legacy::Error),
    #[error("bad prepare URL `{0}`")]
    BadUrl(String),
    #[error("prepare request timed out")]
    Timeout,
    #[error("request not successful. status code: `{0}`")]
    RequestFailed(http::StatusCode),
}

/// Posts the capture parameters to the slave before any UDP handshake.
#[derive(Clone, Debug)]
pub struct PrepareClient {
    base: String,
}

impl PrepareClient {
    /// `base` is the slave's HTTP base URL, e.g. `http://10.0.0.2:8080`.
    pub fn new(base: &str) -> PrepareClient {
        PrepareClient {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn encode_form(request: &CaptureRequest) -> String {
        let mut pairs: Vec<(String, String)> = vec![
            ("session".to_string(), request.session.to_string()),
            ("frame_count".to_string(), request.frame_count.to_string()),
            ("framesize".to_string(), request.frame_size.to_string()),
            (
                "pixel_format".to_string(),
                request.pixel_format.to_string(),
            ),
        ];
        for (name, value) in &request.sensor_params {
            pairs.push((name.clone(), value.clone()));
        }
        pairs
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(name, NON_ALPHANUMERIC),
                    utf8_percent_encode(value, NON_ALPHANUMERIC)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    pub async fn prepare(&self, request: &CaptureRequest) -> Result<(), PrepareHttpError> {
        let url = format!("{}/prepare", self.base);
        let uri: hyper::Uri = url
            .parse()
            .map_err(|_| PrepareHttpError::BadUrl(url.clone()))?;
        let body = Self::encode_form(request);
        debug!("prepare {url}: {body}");
        let http_request = hyper::Request::post(uri)
            .header(
                http::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(Full::new(Bytes::from(body)))?;
        let client = Client::builder(TokioExecutor::new()).build_http();
        let response = tokio::time::timeout(PREPARE_TIMEOUT, client.request(http_request))
            .await
            .map_err(|_| PrepareHttpError::Timeout)??;
        if !response.status().is_success() {
            return Err(PrepareHttpError::RequestFailed(response.status()));
        }
        Ok(())
    }
}
