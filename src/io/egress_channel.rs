//! Publisher contract and the typed channel feeding the MQTT publisher
//!
//! The reader task must never wait on a subscriber, so every publish is a
//! `try_send` into a bounded channel. When the channel is full the message is
//! dropped and counted.

use crate::domain::error::DecodeError;
use crate::domain::events::{epoch_ms, EventKind, PortalEvent};
use crate::infra::metrics::{Metrics, MetricsSummary};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Receives decoded events and per-message errors from the reader task.
///
/// Implementations must not block: the reader calls these inline, once per
/// event, in line order.
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, event: PortalEvent);

    fn report_error(&self, error: &DecodeError);
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish(&self, event: PortalEvent) {
        (**self).publish(event)
    }

    fn report_error(&self, error: &DecodeError) {
        (**self).report_error(error)
    }
}

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Decoded portal event, already serialized
    Event(EventPayload),
    /// Per-message decode error
    Error(ErrorPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Serialized portal event
#[derive(Debug)]
pub struct EventPayload {
    pub kind: EventKind,
    pub json: String,
}

/// Envelope for portal events on the wire
#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    site: &'a str,
    event: &'a PortalEvent,
}

/// Payload for decode errors
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub error: String,
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub connected: bool,
    pub lines_total: u64,
    pub lines_per_sec: f64,
    pub events_total: u64,
    pub occupancies_total: u64,
    pub alarm_occupancies_total: u64,
    pub malformed_total: u64,
    pub unknown_total: u64,
    pub stream_failures_total: u64,
    pub publish_dropped_total: u64,
    pub avg_latency_us: u64,
    pub lat_p99_us: u64,
}

impl MetricsPayload {
    pub fn from_summary(summary: &MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            connected: summary.connected,
            lines_total: summary.lines_total,
            lines_per_sec: summary.lines_per_sec,
            events_total: summary.events_total(),
            occupancies_total: summary.occupancies_total,
            alarm_occupancies_total: summary.alarm_occupancies_total,
            malformed_total: summary.malformed_total,
            unknown_total: summary.unknown_total,
            stream_failures_total: summary.stream_failures_total,
            publish_dropped_total: summary.publish_dropped_total,
            avg_latency_us: summary.avg_latency_us,
            lat_p99_us: summary.lat_p99_us,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across producers. Non-blocking: if the channel is
/// full, messages are dropped and counted in metrics.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
    metrics: Arc<Metrics>,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String, metrics: Arc<Metrics>) -> Self {
        Self { tx, site_id, metrics }
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: &MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        self.send(EgressMessage::Metrics(payload));
    }

    fn send(&self, msg: EgressMessage) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.metrics.record_publish_dropped(),
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_publish_dropped();
                warn!("egress_channel_closed");
            }
        }
    }
}

impl Publisher for EgressSender {
    fn publish(&self, event: PortalEvent) {
        let envelope = EventEnvelope { site: &self.site_id, event: &event };
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, kind = %event.kind().as_str(), "egress_serialize_failed");
                return;
            }
        };
        self.send(EgressMessage::Event(EventPayload { kind: event.kind(), json }));
    }

    fn report_error(&self, error: &DecodeError) {
        let payload =
            ErrorPayload { site: Some(self.site_id.clone()), ts: epoch_ms(), error: error.to_string() };
        self.send(EgressMessage::Error(payload));
    }
}

/// Publisher that only logs, used when MQTT egress is disabled
#[derive(Clone, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, event: PortalEvent) {
        match &event {
            PortalEvent::Occupancy(occupancy) => info!(
                alarmed = %occupancy.alarmed(),
                occupancy_count = %occupancy.occupancy_count,
                start_time = %occupancy.start_time,
                end_time = %occupancy.end_time,
                gamma_alarm = %occupancy.gamma_alarm,
                neutron_alarm = %occupancy.neutron_alarm,
                "portal_occupancy"
            ),
            PortalEvent::Gamma(reading) | PortalEvent::Neutron(reading) => debug!(
                channel = %reading.channel.as_str(),
                state = %reading.alarm_state.label(reading.channel),
                counts = ?reading.counts.0,
                "portal_reading"
            ),
            other => debug!(kind = %other.kind().as_str(), json = %other.to_json(), "portal_event"),
        }
    }

    fn report_error(&self, error: &DecodeError) {
        warn!(error = %error, "portal_message_rejected");
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
    metrics: Arc<Metrics>,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id, metrics), rx)
}
