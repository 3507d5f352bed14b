use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod console;
mod frame;
#[cfg(test)]
mod mock;
mod port;
mod proto;
mod rx;
mod session;
mod slcan;
mod stats;
mod tx;

use cli::{ConfigError, SessionConfig};

fn main() -> Result<ExitCode> {
    let args = cli::Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Rejected before any port is touched.
    let cfg = SessionConfig::from_cli(&args)?;
    tracing::debug!("config: {:?}", cfg);

    let mgmt_path = resolve(&cfg.signature, &cfg.mgmt_location)?;
    let vcan_path = resolve(&cfg.signature, &cfg.vcan_location)?;

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl+C handler")?;

    let timing = session::Timing::default();
    let mgmt = port::open_port(&mgmt_path, port::MGMT_BAUD, timing.settle)
        .with_context(|| format!("opening management port {}", mgmt_path))?;

    let report = session::run(
        &cfg,
        &timing,
        mgmt,
        || port::open_port(&vcan_path, port::VCAN_BAUD, timing.bus_timeout),
        &stop,
        &mut session::print_frame,
    );

    // the session has logged the cause; only the exit status is left to set
    Ok(if report.end.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn resolve(signature: &str, location: &str) -> Result<String> {
    match port::find_device_port(signature, Some(location))? {
        Some(path) => Ok(path),
        None => Err(ConfigError::DeviceNotFound {
            signature: signature.to_string(),
            location: location.to_string(),
        }
        .into()),
    }
}
