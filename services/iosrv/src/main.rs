//! CPCOE I/O Service
//!
//! Polls CPCOE universal I/O modules over Modbus RTU and reports every channel.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use errors::IoSrvResult;
use iosrv::bootstrap::{self, Args};
use iosrv::{IoService, IoSrvConfig, ReadingSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("iosrv failed: {}", e);
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(e.exit_code());
    }
    Ok(())
}

async fn run(args: Args) -> IoSrvResult<()> {
    // Config first: it carries the log settings
    let config = IoSrvConfig::load(&args.config)?;
    bootstrap::initialize_logging(&args, &config)?;
    info!(
        "Config loaded: {} ({} devices)",
        args.config.display(),
        config.devices.len()
    );

    let descriptors = config.descriptors()?;

    // Validation mode: validate and exit
    if args.validate {
        for descriptor in &descriptors {
            print!("{}", bootstrap::describe_plan(descriptor));
        }
        info!("Validation completed successfully");
        return Ok(());
    }

    info!(
        "Starting {} v{}: {} devices, {}ms interval",
        bootstrap::SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
        descriptors.len(),
        config.poll_interval_ms
    );

    let shutdown = CancellationToken::new();
    let service = IoService::start_rtu(
        &descriptors,
        config.poller_config(),
        ReadingSink::stdout(args.json_readings),
        shutdown.clone(),
    );

    let signals = common::cancel_on_shutdown(shutdown.clone());
    shutdown.cancelled().await;
    bootstrap::join_signal_listener(signals).await;
    info!("Stopping devices");

    let stats = service.stop().await?;
    info!(
        "Stopped: {} readings, {} faults",
        stats.readings, stats.faults
    );
    Ok(())
}
