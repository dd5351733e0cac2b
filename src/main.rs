//! RPM gateway - radiation portal monitor message decoder
//!
//! Reads the portal line protocol from a serial port or a serial-to-Ethernet
//! converter, decodes it into typed events and publishes them over MQTT.
//!
//! Module structure:
//! - `domain/` - Wire types, events, decode errors
//! - `io/` - External interfaces (framer, sources, MQTT, Prometheus)
//! - `services/` - Classifier, occupancy tracker, emitters, reader task
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use rpm_gateway::infra::{Config, Metrics};
use rpm_gateway::io::{create_egress_channel, open_source, LogPublisher, MqttPublisher, Publisher};
use rpm_gateway::services::{PortalDriver, WorkerExit};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// RPM gateway - radiation portal monitor decoder
#[derive(Parser, Debug)]
#[command(name = "rpm-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug for occupancy detail, trace for every line
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!(git_hash = %env!("GIT_HASH"), "rpm-gateway starting");

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&std::env::args().collect::<Vec<_>>()),
    };

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        source = %config.source_description(),
        max_line_len = %config.max_line_len(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_egress = %config.mqtt_egress_enabled(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = rpm_gateway::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    // Periodic metrics log; the only caller that starts a new interval
    let reporter_metrics = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            reporter_metrics.report().log();
        }
    });

    let mut egress_task = None;
    let publisher: Arc<dyn Publisher> = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) =
            create_egress_channel(1000, config.site_id().to_string(), metrics.clone());

        let mqtt = MqttPublisher::new(&config, egress_rx);
        let mqtt_shutdown = shutdown_rx.clone();
        egress_task = Some(tokio::spawn(mqtt.run(mqtt_shutdown)));

        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs().max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                metrics_egress.send_metrics(&metrics_for_egress.snapshot());
            }
        });

        Arc::new(egress_sender)
    } else {
        info!("mqtt_egress_disabled_logging_events");
        Arc::new(LogPublisher)
    };

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        shutdown_tx.send_replace(true);
    });

    run_portal(&config, publisher, metrics, &mut shutdown_rx).await;

    if let Some(task) = egress_task {
        // Give the publisher a moment to drain queued occupancies
        if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
            warn!("mqtt_egress_drain_timeout");
        }
    }

    info!("rpm-gateway shutdown complete");
    Ok(())
}

/// Connect, decode until the stream ends or fails, then reconnect after the
/// configured delay. Returns once shutdown is signalled.
async fn run_portal(
    config: &Config,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<Metrics>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut first_attempt = true;

    loop {
        if *shutdown.borrow() {
            return;
        }
        if !first_attempt {
            metrics.record_reconnect();
        }
        first_attempt = false;

        let opened = tokio::select! {
            opened = open_source(config) => opened,
            _ = shutdown.wait_for(|stop| *stop) => return,
        };

        match opened {
            Ok(stream) => {
                metrics.set_connected(true);
                let mut driver = PortalDriver::start(
                    stream,
                    publisher.clone(),
                    metrics.clone(),
                    config.max_line_len(),
                );

                // Forward shutdown to this connection's reader
                let stop = driver.stop_handle();
                let mut driver_shutdown = shutdown.clone();
                let forwarder = tokio::spawn(async move {
                    if driver_shutdown.wait_for(|stop| *stop).await.is_ok() {
                        stop.stop();
                    }
                });

                let exit = driver.join().await;
                forwarder.abort();
                metrics.set_connected(false);

                match exit {
                    Ok(WorkerExit::Stopped) => return,
                    Ok(WorkerExit::StreamClosed) => warn!("portal_stream_ended"),
                    Err(e) => error!(error = %e, "portal_reader_failed"),
                }
            }
            Err(e) => {
                warn!(
                    error = %format!("{e:#}"),
                    source = %config.source_description(),
                    "portal_source_open_failed"
                );
            }
        }

        info!(delay_ms = %config.reconnect_delay().as_millis(), "portal_reconnect_scheduled");
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay()) => {}
            _ = shutdown.wait_for(|stop| *stop) => return,
        }
    }
}
