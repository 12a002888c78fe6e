#![allow(dead_code)]

//! Shared helpers for the endpoint integration tests: loopback-tuned
//! configs, a small HTTP client, and scripted sync-port peers.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::net::UdpSocket;

use twincam_run::config::{Config, HttpConfig, SyncConfig};

/// Config tuned for loopback tests: ephemeral ports, short waits, one
/// warm-up frame.
pub fn test_config(capture_dir: &Path) -> Config {
    Config {
        capture_dir: capture_dir.to_path_buf(),
        http: HttpConfig {
            listen: "127.0.0.1:0".to_string(),
        },
        sync: SyncConfig {
            port: 0,
            drop_frames: 1,
            prepare_settle_ms: 50,
            ready_timeout_ms: 1000,
            ready_poll_ms: 50,
            start_retry_delay_ms: 50,
            ..SyncConfig::default()
        },
        ..Config::default()
    }
}

pub async fn http_get(addr: SocketAddr, path_and_query: &str) -> (http::StatusCode, String) {
    let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let uri: hyper::Uri = format!("http://{addr}{path_and_query}").parse().unwrap();
    let request = hyper::Request::get(uri)
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = client.request(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

pub async fn http_post(addr: SocketAddr, path: &str, form: &str) -> (http::StatusCode, String) {
    let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let uri: hyper::Uri = format!("http://{addr}{path}").parse().unwrap();
    let request = hyper::Request::post(uri)
        .header(
            http::header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        )
        .body(Full::new(Bytes::from(form.to_string())))
        .unwrap();
    let response = client.request(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

/// Sorted artifact file names in `dir` (empty when the dir does not exist).
pub fn artifact_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().and_then(|e| e.file_name().into_string().ok()))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// A scripted UDP peer standing in for a slave sync server. Records every
/// datagram it receives.
pub struct ScriptedSlave {
    pub addr: SocketAddr,
    pub received: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSlave {
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn starts_received(&self) -> usize {
        self.received()
            .iter()
            .filter(|d| d.starts_with("START"))
            .count()
    }
}

/// `answer_ready`: reply `OK` to `READY`. `answer_echo`: answer clock
/// probes. `drop_starts`: swallow that many `START`s before `ACK`ing.
pub async fn spawn_scripted_slave(
    answer_ready: bool,
    answer_echo: bool,
    drop_starts: u32,
) -> ScriptedSlave {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = sock.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();
    tokio::spawn(async move {
        let mut starts_seen = 0u32;
        let mut buf = [0u8; 256];
        while let Ok((n, peer)) = sock.recv_from(&mut buf).await {
            let text = String::from_utf8_lossy(&buf[..n]).into_owned();
            log.lock().unwrap().push(text.clone());
            if text.starts_with("READY") {
                if answer_ready {
                    let _ = sock.send_to(b"OK", peer).await;
                }
            } else if text.starts_with("START") {
                starts_seen += 1;
                if starts_seen > drop_starts {
                    let _ = sock.send_to(b"ACK", peer).await;
                }
            } else if text.trim().parse::<i64>().is_ok() && answer_echo {
                let reply = twincam_types::monotonic_us().to_string();
                let _ = sock.send_to(reply.as_bytes(), peer).await;
            }
        }
    });
    ScriptedSlave { addr, received }
}

/// Minimal HTTP stub accepting every prepare request.
pub async fn spawn_prepare_stub() -> SocketAddr {
    use axum::routing::post;
    let app = axum::Router::new().route("/prepare", post(|| async { "OK" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Poll until the slot is neither armed nor firing, panicking after 5 s.
pub async fn wait_slot_idle(slot: &twincam_sync::CaptureSlot) {
    for _ in 0..500 {
        if slot.snapshot() == (false, false) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("capture slot never went idle");
}
