//! MQTT publisher for portal events
//!
//! Publishes to per-kind topics under the configured prefix:
//! - <prefix>/occupancy - Closed occupancy intervals (QoS 1)
//! - <prefix>/gamma, <prefix>/neutron - Channel readings (QoS 0)
//! - <prefix>/tamper, <prefix>/speed (QoS 0)
//! - <prefix>/errors - Rejected portal messages (QoS 0)
//! - <prefix>/metrics - Periodic metrics snapshots (QoS 0)

use crate::domain::events::EventKind;
use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Topic suffix and delivery guarantee for an egress message
fn route(msg: &EgressMessage) -> (&'static str, QoS) {
    match msg {
        // Occupancies are the record of an interval; at-least-once
        EgressMessage::Event(payload) if payload.kind == EventKind::Occupancy => {
            (payload.kind.as_str(), QoS::AtLeastOnce)
        }
        EgressMessage::Event(payload) => (payload.kind.as_str(), QoS::AtMostOnce),
        EgressMessage::Error(_) => ("errors", QoS::AtMostOnce),
        EgressMessage::Metrics(_) => ("metrics", QoS::AtMostOnce),
    }
}

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    topic_prefix: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("rpm-egress-{}-{}", config.site_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, rx, topic_prefix: config.mqtt_topic_prefix().trim_end_matches('/').to_string() }
    }

    /// Run the publisher loop until shutdown, then drain what is queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(prefix = %self.topic_prefix, "mqtt_egress_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.publish_message(msg).await,
                    None => {
                        info!("mqtt_egress_channel_closed");
                        return;
                    }
                },
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        let (suffix, qos) = route(&msg);
        let topic = format!("{}/{}", self.topic_prefix, suffix);

        let body = match msg {
            EgressMessage::Event(payload) => payload.json,
            EgressMessage::Error(payload) => match serde_json::to_string(&payload) {
                Ok(json) => json,
                Err(e) => {
                    debug!(error = %e, "mqtt_egress_serialize_failed");
                    return;
                }
            },
            EgressMessage::Metrics(payload) => match serde_json::to_string(&payload) {
                Ok(json) => json,
                Err(e) => {
                    debug!(error = %e, "mqtt_egress_serialize_failed");
                    return;
                }
            },
        };

        if let Err(e) = self.client.publish(&topic, qos, false, body.into_bytes()).await {
            if qos == QoS::AtLeastOnce {
                error!(error = %e, topic = %topic, "mqtt_egress_publish_failed");
            } else {
                debug!(error = %e, topic = %topic, "mqtt_egress_publish_failed");
            }
        }
    }
}
