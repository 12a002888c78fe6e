//! The twincam endpoints.
//!
//! [orchestrator] is the master's capture sequencer; [engine] the slave's
//! prepared-then-armed executor. Both share the [stream] supervisor, the
//! HTTP front-ends, and [persist]. [master] and [slave] assemble the full
//! task sets the two binaries run.

pub mod config;
pub mod engine;
pub mod http_client;
pub mod http_master;
pub mod http_slave;
pub mod master;
pub mod orchestrator;
pub mod persist;
pub mod slave;
pub mod stream;

pub use config::{parse_config_file, Config};
pub use orchestrator::{spawn_orchestrator, CaptureError, CaptureHandle};

/// Process bootstrap shared by both binaries: environment from `.env`,
/// then the tracing subscriber with a project default filter.
pub fn twincam_start() {
    dotenv::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(
            "twincam_run=info,twincam_sync=info,twincam_camera=info,twincam_master=info,twincam_slave=info,warn",
        )
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
