//! mamirc-processor — session state, window projection, and the web API.
//!
//! Usage: `mamirc-processor <processor-config.json>`

use mamirc::config::{self, ProcessorConfig};
use mamirc::processor::{http, link, scheduler, Processor};
use std::sync::Arc;
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
        eprintln!("Usage: mamirc-processor <processor-config.json>");
        std::process::exit(1);
    };

    let config = ProcessorConfig::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;
    let profiles = config::load_profiles(&config.user_config_file).map_err(|e| {
        error!(path = %config.user_config_file.display(), error = %e,
            "Failed to load user profiles");
        e
    })?;

    info!(
        control_port = config.control_port,
        http_port = config.http_port,
        profiles = profiles.len(),
        "Starting mamirc-processor"
    );

    let processor = Arc::new(Processor::new(profiles, config.user_config_file.clone()));
    processor.set_scheduler(scheduler::spawn_scheduler(Arc::clone(&processor)));

    let http_server = tokio::spawn(http::run_http_server(
        config.http_port,
        config.http_password.clone(),
        Arc::clone(&processor),
    ));

    let result = tokio::select! {
        result = link::run_link(
            config.control_port,
            &config.control_password,
            Arc::clone(&processor),
        ) => {
            if let Err(e) = &result {
                error!(error = %e, "Connector link ended");
            }
            result.map_err(anyhow::Error::from)
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    processor.terminate();
    http_server.abort();
    result
}
