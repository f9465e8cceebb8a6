// src/main.rs

mod annotation;
mod calibration;
mod config;
mod coordinate;
mod mapping;
mod output;
mod overlay;
mod session;
mod timestamp;
mod types;
mod video;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use calibration::Calibration;
use config::{CliArgs, Config};
use mapping::{RegionClassifier, SpatialMapper};
use session::Session;

fn main() {
    let args = CliArgs::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e:#}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!("coopmap={}", config.logging.level))
        .init();

    info!("🐔 Coop coordinate mapper starting");

    match run(&config) {
        Ok(stats) => {
            info!("\n📊 Session report:");
            info!("  Frames displayed: {}", stats.frames_displayed);
            info!("  Coordinates recorded: {}", stats.coordinates_recorded);
            info!("  Coordinates cleared: {}", stats.coordinates_cleared);
            info!("  Annotations saved: {}", stats.annotations_saved);
            info!("  Screencaps saved: {}", stats.screencaps_saved);
        }
        Err(e) => {
            error!(
                os = std::env::consts::OS,
                arch = std::env::consts::ARCH,
                "Session failed: {e:#}"
            );
            eprintln!("An error occurred; please follow the support instructions in the README.");
            std::process::exit(1);
        }
    }
}

fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = Config::load(&args.config)?;
    config.apply_cli(args);
    config.validate()?;
    Ok(config)
}

fn run(config: &Config) -> Result<session::SessionStats> {
    let mapper = if config.mapping.three_d {
        let calibration = Calibration::load(&config.mapping.calibration_path)?;
        Some(SpatialMapper::new(RegionClassifier::new(calibration.zones)))
    } else {
        info!("3D mapping disabled; recording pixel coordinates only");
        None
    };

    let mut session = Session::new(config, mapper)?;
    let result = session.run();
    // Video resources go away on every exit path, failure included.
    session.shutdown();
    result
}
