//! Modbus RTU polling daemon.
//!
//! Polls the devices of one serial line and prints value reports to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use rtulink_common::{Format, LoggingConfig, ValueReport};
use rtulink_modbus::{Connector, ConnectorConfig, PollScheduler, RtuTransport, SerialEngine};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Modbus RTU polling daemon.
#[derive(Parser, Debug)]
#[command(name = "rtulink-modbus")]
#[command(about = "Polls Modbus RTU devices on a serial line")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "rtulink.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration, print it with defaults filled in and exit
    /// without opening the port.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = ConnectorConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    rtulink_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting rtulink-modbus");
    info!("Loaded configuration from {:?}", args.config);

    if args.check {
        info!(devices = config.devices.len(), "Configuration is valid");
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let transport = RtuTransport::open(&config.serial)
        .with_context(|| format!("Failed to open serial port {}", config.serial.port))?;

    let engine = SerialEngine::new(transport, config.engine.settings());
    let mut connector = Connector::new(engine);

    for device in &config.devices {
        if let Err(e) = connector.initialize_device(device) {
            error!(device = %device.name, error = %e, "Failed to initialize device");
        }
    }

    let reports = config
        .reports
        .enabled
        .then(|| tokio::spawn(print_reports(connector.subscribe(), config.reports.format)));

    let scheduler = PollScheduler::new(connector, config.engine.idle_delay());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    info!(devices = config.devices.len(), "Poll loop running");
    scheduler.run(shutdown_rx).await;

    // Dropping the connector closes the report channel
    drop(scheduler);
    if let Some(task) = reports {
        let _ = task.await;
    }

    info!("rtulink-modbus stopped");
    Ok(())
}

/// Write every report to stdout: one JSON object per line, or raw CBOR.
async fn print_reports(mut rx: broadcast::Receiver<ValueReport>, format: Format) {
    let mut stdout = tokio::io::stdout();

    loop {
        let report = match rx.recv().await {
            Ok(report) => report,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Report printer lagging, reports dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let mut bytes = match rtulink_common::encode(&report, format) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode report: {}", e);
                continue;
            }
        };
        if format == Format::Json {
            bytes.push(b'\n');
        }

        if let Err(e) = stdout.write_all(&bytes).await {
            error!("Failed to write report: {}", e);
            break;
        }
        let _ = stdout.flush().await;
    }
}
