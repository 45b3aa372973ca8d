//! dcm-collector entry point: config, transport selection, collection loop.

mod app;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};

use app::cli::{filter_for, Args};
use app::logging::{init_tracing, set_filter};
use dcm_platform_collector::config::load_config;
use dcm_platform_collector::{connect, Collector, HostMetrics, Snapshot};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Priority: 1. --log-level flag, 2. LOG_LEVEL env, 3. config file, 4. default (info)
    let explicit_level = args.log_level.clone().or_else(|| std::env::var("LOG_LEVEL").ok());
    let initial = match explicit_level.as_deref() {
        Some(level) => filter_for(level).unwrap_or_else(|| {
            eprintln!(
                "Invalid log level '{}'. Using INFO. Valid levels: TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL",
                level
            );
            "info"
        }),
        None => "info",
    };
    init_tracing(initial);

    let config = load_config(args.config.as_deref()).await?;
    if explicit_level.is_none() {
        match filter_for(&config.log_level) {
            Some(filter) => set_filter(filter)?,
            None => warn!("Invalid log level '{}' in config, keeping INFO", config.log_level),
        }
    }

    info!(
        "Starting dcm-collector v{} (mode {:?}, protocol {})",
        env!("CARGO_PKG_VERSION"),
        config.ipmi.mode,
        config.ipmi.protocol
    );

    let transport = connect(&config.transport_options());
    let collector = Arc::new(Collector::new(transport, config.hosts(), config.collector_options()));
    collector.initialize().await;

    if args.metrics {
        for name in collector.metric_names() {
            println!("{}", serde_json::to_string(&name)?);
        }
        return Ok(());
    }

    if args.once {
        let metrics = collector.collect().await.context("Collection failed")?;
        print_report(&collector.snapshot(), &metrics)?;
        return Ok(());
    }

    let period = Duration::from_secs_f64(config.collector.update_interval);
    let loop_collector = Arc::clone(&collector);
    let collection = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        let mut first = true;
        loop {
            ticker.tick().await;
            if !first && loop_collector.options().collect_health {
                loop_collector.refresh_health().await;
            }
            first = false;

            match loop_collector.collect().await {
                Ok(metrics) => {
                    if let Err(e) = print_report(&loop_collector.snapshot(), &metrics) {
                        error!("Failed to write report: {}", e);
                    }
                }
                Err(e) => error!("Collection failed: {}", e),
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        result = collection => {
            if let Err(e) = result {
                error!("Collection task ended: {}", e);
            }
        }
    }

    info!("Collector shutdown complete");
    Ok(())
}

/// One JSON line per host.
fn print_report(snapshot: &Snapshot, metrics: &HostMetrics) -> Result<()> {
    let timestamp = chrono::Local::now().to_rfc3339();
    for host in snapshot.hosts() {
        let line = json!({
            "timestamp": timestamp,
            "source": host,
            "metrics": metrics.get(&host),
            "inventory": snapshot.inventory.get(&host).map(|i| i.to_metrics()),
            "health": snapshot.health.get(&host).map(|h| h.to_metrics()),
        });
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}
