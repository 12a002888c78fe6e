//! TOML configuration for both endpoints.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use twincam_types::{FrameSize, DEFAULT_SYNC_PORT};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory the capture artifacts are written to.
    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,
    /// Frame size of the JPEG streaming default.
    #[serde(default = "default_stream_framesize")]
    pub stream_framesize: FrameSize,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Present on the master only: where the slave lives.
    #[serde(default)]
    pub master: Option<MasterConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            capture_dir: default_capture_dir(),
            stream_framesize: default_stream_framesize(),
            http: HttpConfig::default(),
            sync: SyncConfig::default(),
            master: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// UDP port of the sync protocol.
    #[serde(default = "default_sync_port")]
    pub port: u16,
    /// Base safety overhead `S` for the start-delay computation.
    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: i64,
    /// Pings per clock-probe session.
    #[serde(default = "default_probe_pings")]
    pub probe_pings: u32,
    /// Warm-up frames discarded after every camera reconfiguration.
    #[serde(default = "default_drop_frames")]
    pub drop_frames: u32,
    /// Fixed wait after the HTTP prepare before reconfiguring the camera.
    #[serde(default = "default_prepare_settle_ms")]
    pub prepare_settle_ms: u64,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_ready_poll_ms")]
    pub ready_poll_ms: u64,
    /// Total `START` send attempts.
    #[serde(default = "default_start_retries")]
    pub start_retries: u32,
    #[serde(default = "default_start_retry_delay_ms")]
    pub start_retry_delay_ms: u64,
    /// Fall through sync failures and capture alone.
    #[serde(default)]
    pub allow_slave_missing: bool,
    /// Capture queue bound: queued plus running.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl SyncConfig {
    pub fn safety_margin_us(&self) -> i64 {
        self.safety_margin_ms * 1000
    }

    pub fn prepare_settle(&self) -> Duration {
        Duration::from_millis(self.prepare_settle_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    pub fn start_retry_delay(&self) -> Duration {
        Duration::from_millis(self.start_retry_delay_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            port: default_sync_port(),
            safety_margin_ms: default_safety_margin_ms(),
            probe_pings: default_probe_pings(),
            drop_frames: default_drop_frames(),
            prepare_settle_ms: default_prepare_settle_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            ready_poll_ms: default_ready_poll_ms(),
            start_retries: default_start_retries(),
            start_retry_delay_ms: default_start_retry_delay_ms(),
            allow_slave_missing: false,
            queue_depth: default_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterConfig {
    /// Base URL of the slave's HTTP server, e.g. `http://10.0.0.2:8080`.
    pub slave_http: String,
    /// Address of the slave's UDP sync port, e.g. `10.0.0.2:65`.
    pub slave_sync: String,
}

fn default_capture_dir() -> PathBuf {
    PathBuf::from("captures")
}

fn default_stream_framesize() -> FrameSize {
    FrameSize::Vga
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_sync_port() -> u16 {
    DEFAULT_SYNC_PORT
}

fn default_safety_margin_ms() -> i64 {
    1
}

fn default_probe_pings() -> u32 {
    4
}

fn default_drop_frames() -> u32 {
    twincam_camera::DEFAULT_WARMUP_FRAMES
}

fn default_prepare_settle_ms() -> u64 {
    3000
}

fn default_ready_timeout_ms() -> u64 {
    5000
}

fn default_ready_poll_ms() -> u64 {
    500
}

fn default_start_retries() -> u32 {
    3
}

fn default_start_retry_delay_ms() -> u64 {
    100
}

fn default_queue_depth() -> usize {
    1
}

pub fn parse_config_file(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let cfg: Config = toml::from_str(&contents)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(cfg)
}
