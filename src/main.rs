use std::sync::{Arc, Mutex};

use anyhow::{Error, Result, anyhow};
use api_telemetry::{api::run_api_server, clients::recorder::ApiRecorder, config::Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    let recorder = Arc::new(Mutex::new(ApiRecorder::with_limits(
        config.capture_raw_bodies,
        config.recorder_limits(),
    )));

    run_api_server(config, recorder, Vec::new())
        .await
        .map_err(|e| anyhow!("Diagnostics server failed: {}", e))?;

    Ok(())
}
