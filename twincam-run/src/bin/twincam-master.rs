use clap::Parser;

use twincam_camera::mock::MockSensor;
use twincam_run::{master::run_master, parse_config_file, twincam_start};

/// Master endpoint of the twincam synchronized capture pair.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct MasterArgs {
    /// TOML configuration file.
    config_file: std::path::PathBuf,

    /// Override of the base safety margin, in milliseconds.
    #[arg(long, env = "CAPSEQ_SYNC_SAFETY_MS")]
    safety_margin_ms: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    twincam_start();
    let args = MasterArgs::parse();
    let mut cfg = parse_config_file(&args.config_file)?;
    if let Some(ms) = args.safety_margin_ms {
        cfg.sync.safety_margin_ms = ms;
    }

    // The simulated sensor stands in behind the SensorDriver seam; a real
    // imager backend plugs in there.
    let (driver, _ctl) = MockSensor::new();
    run_master(cfg, driver).await
}
