//! Vehicle Guard - Main Entry Point

use anyhow::{Context, Result};

use vehicle_guard_core::constants;
use vehicle_guard_core::logic::config::MonitorConfig;
use vehicle_guard_core::logic::orchestrator::Monitor;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(constants::DEFAULT_LOG_FILTER))
        .init();

    log::info!("Starting {} v{}...", constants::APP_NAME, constants::APP_VERSION);

    let config = MonitorConfig::load().context("loading configuration")?;
    log::info!(
        "Tick {:?}, metrics {:?}, refit {:?}, learning {}",
        config.tick_interval(),
        config.metrics_interval(),
        config.refit_interval(),
        if config.policy.learning_enabled { "on" } else { "off" }
    );

    let monitor = Monitor::from_config(config).context("building monitor")?;
    let handle = monitor.start().context("starting monitor loops")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    runtime.block_on(async {
        let shutdown = handle.shutdown_signal();
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                }
            }
            _ = shutdown.notified() => {}
        }
    });

    let summary = handle.shutdown_and_join();
    log::info!(
        "Stopped after {} ticks ({:?}): {} anomaly ticks, {} bus messages published, {} dropped",
        summary.ticks,
        summary.uptime,
        summary.metrics.anomaly_ticks,
        summary.bus.published,
        summary.bus.dropped
    );
    Ok(())
}
