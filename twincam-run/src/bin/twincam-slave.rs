use clap::Parser;

use twincam_camera::mock::MockSensor;
use twincam_run::{parse_config_file, slave::run_slave, twincam_start};

/// Slave endpoint of the twincam synchronized capture pair.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct SlaveArgs {
    /// TOML configuration file.
    config_file: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    twincam_start();
    let args = SlaveArgs::parse();
    let cfg = parse_config_file(&args.config_file)?;

    // The simulated sensor stands in behind the SensorDriver seam; a real
    // imager backend plugs in there.
    let (driver, _ctl) = MockSensor::new();
    run_slave(cfg, driver).await
}
