//! Prometheus metrics HTTP endpoint
//!
//! Exposes gateway metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::domain::events::EventKind;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_stream_metrics(&mut output, site_id, &summary);
    write_event_metrics(&mut output, site_id, &summary);
    write_occupancy_metrics(&mut output, site_id, &summary);
    write_histogram(
        &mut output,
        "rpm_line_latency_us",
        "Per-line decode and publish latency in microseconds (current interval)",
        site_id,
        &summary.lat_buckets,
        summary.avg_latency_us,
    );

    output
}

fn write_stream_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "rpm_connected",
        "1 while the portal stream is open",
        MetricType::Gauge,
        site,
        u64::from(summary.connected),
    );
    write_metric(
        output,
        "rpm_lines_total",
        "Lines read from the portal",
        MetricType::Counter,
        site,
        summary.lines_total,
    );
    write_metric(
        output,
        "rpm_malformed_total",
        "Messages rejected for a missing or invalid field",
        MetricType::Counter,
        site,
        summary.malformed_total,
    );
    write_metric(
        output,
        "rpm_unknown_codes_total",
        "Lines with a code outside the protocol",
        MetricType::Counter,
        site,
        summary.unknown_total,
    );
    write_metric(
        output,
        "rpm_setup_codes_total",
        "Setup messages received",
        MetricType::Counter,
        site,
        summary.setup_total,
    );
    write_metric(
        output,
        "rpm_stream_failures_total",
        "Portal stream read failures",
        MetricType::Counter,
        site,
        summary.stream_failures_total,
    );
    write_metric(
        output,
        "rpm_reconnects_total",
        "Portal reconnect attempts",
        MetricType::Counter,
        site,
        summary.reconnects_total,
    );
    write_metric(
        output,
        "rpm_publish_dropped_total",
        "Egress messages dropped on a full or closed channel",
        MetricType::Counter,
        site,
        summary.publish_dropped_total,
    );
}

fn write_event_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let name = "rpm_events_total";
    let _ = writeln!(output, "# HELP {name} Events published by kind");
    let _ = writeln!(output, "# TYPE {name} counter");
    for kind in EventKind::ALL {
        let _ = writeln!(
            output,
            "{name}{{site=\"{site}\",kind=\"{}\"}} {}",
            kind.as_str(),
            summary.events_of(kind)
        );
    }
}

fn write_occupancy_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "rpm_occupancies_total",
        "Closed occupancy intervals",
        MetricType::Counter,
        site,
        summary.occupancies_total,
    );
    write_metric(
        output,
        "rpm_alarm_occupancies_total",
        "Closed occupancy intervals with any alarm",
        MetricType::Counter,
        site,
        summary.alarm_occupancies_total,
    );
    write_metric(
        output,
        "rpm_gamma_alarm_occupancies_total",
        "Closed occupancy intervals with a gamma alarm",
        MetricType::Counter,
        site,
        summary.gamma_alarm_occupancies_total,
    );
    write_metric(
        output,
        "rpm_neutron_alarm_occupancies_total",
        "Closed occupancy intervals with a neutron alarm",
        MetricType::Counter,
        site,
        summary.neutron_alarm_occupancies_total,
    );
    write_metric(
        output,
        "rpm_idle_closes_total",
        "Occupancy end messages received with no open interval",
        MetricType::Counter,
        site,
        summary.idle_closes_total,
    );
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &site_id),
        ),
        (&Method::GET, "/health") => {
            if metrics.is_connected() {
                response(StatusCode::OK, "text/plain", "ok")
            } else {
                response(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "portal disconnected")
            }
        }
        _ => response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    })
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
