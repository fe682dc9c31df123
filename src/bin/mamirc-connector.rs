//! mamirc-connector — owns the IRC sockets and the event journal.
//!
//! Usage: `mamirc-connector <backend-config.json>`

use mamirc::config::ConnectorConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(config_path), None) = (args.next(), args.next()) else {
        eprintln!("Usage: mamirc-connector <backend-config.json>");
        std::process::exit(1);
    };

    let config = ConnectorConfig::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        control_port = config.control_port,
        journal = %config.journal_file.display(),
        "Starting mamirc-connector"
    );

    tokio::select! {
        result = mamirc::connector::run(config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    }
}
