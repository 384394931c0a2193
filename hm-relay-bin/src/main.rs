mod logger;

use clap::Parser;
use hm_relay_core::HmRelay;
use hm_relay_models::constants::{DEFAULT_BROKERS_FILE, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// hm-relay - bidirectional MQTT bridge for home-energy storage devices.
///
/// Mirrors control traffic between the user's broker and the vendor cloud
/// brokers so the mobile application and local home automation stay
/// functional against the same devices.
#[derive(Parser)]
#[command(name = "hm-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MQTT relay for home-energy storage devices", long_about = None)]
struct Cli {
    /// Relay configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Broker catalog file
    #[arg(short, long, env = "BROKERS_PATH", default_value = DEFAULT_BROKERS_FILE)]
    brokers: PathBuf,

    /// Log filter (level or tracing directive)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logger::init(&cli.log_level) {
        eprintln!("logger init failed: {e}");
        return ExitCode::FAILURE;
    }

    match HmRelay::init(&cli.config, &cli.brokers).await {
        Ok(relay) => match relay.run().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "relay failed");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}
