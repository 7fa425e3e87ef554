// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk print gateway service.
//
// Entry point. Initialises logging, loads and validates the device
// configuration, registers every device with the print engine, and runs
// until Ctrl-C.
//
// Usage: spoolwerk [CONFIG.json]

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};

use spoolwerk_core::config::GatewayConfig;
use spoolwerk_core::error::Result;
use spoolwerk_print::PrintEngine;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Spoolwerk starting");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gateway stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let explicit = std::env::args_os().nth(1).map(PathBuf::from);
    let config = GatewayConfig::load(explicit.as_deref())?;
    config.validate()?;

    let engine = PrintEngine::start(config.engine.clone());
    for device in config.devices {
        engine.register_from_config(device)?;
    }

    for id in engine.devices() {
        let state = engine.device_state(&id)?;
        info!(
            device = %id,
            status = %state.status,
            last_error = state.last_error.as_deref().unwrap_or(""),
            "device registered"
        );
    }

    info!("gateway running, press Ctrl-C to stop");
    let signal = tokio::signal::ctrl_c().await;
    engine.shutdown().await;
    signal?;

    info!("Spoolwerk stopped");
    Ok(())
}
