//! Typed events handed to the publisher
//!
//! All `timestamp`/`*_time` fields are epoch seconds, truncated from the
//! millisecond capture time of the line that produced them.

use crate::domain::types::{AlarmState, Channel, GrossCounts};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Truncate epoch milliseconds to epoch seconds
#[inline]
pub fn epoch_secs(ms: u64) -> u64 {
    ms / 1000
}

/// One gamma or neutron reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelEvent {
    pub timestamp: u64,
    pub channel: Channel,
    pub counts: GrossCounts,
    pub alarm_state: AlarmState,
}

/// One closed occupancy interval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyEvent {
    pub timestamp: u64,
    pub occupancy_count: i32,
    pub start_time: u64,
    pub end_time: u64,
    pub neutron_background: f64,
    pub gamma_alarm: bool,
    pub neutron_alarm: bool,
}

impl OccupancyEvent {
    pub fn alarmed(&self) -> bool {
        self.gamma_alarm || self.neutron_alarm
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TamperEvent {
    pub timestamp: u64,
    pub tampered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedEvent {
    pub timestamp: u64,
    pub speed: f64,
}

/// Event kinds, one publisher topic each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Gamma,
    Neutron,
    Occupancy,
    Tamper,
    Speed,
}

impl EventKind {
    pub const ALL: [EventKind; 5] =
        [EventKind::Gamma, EventKind::Neutron, EventKind::Occupancy, EventKind::Tamper, EventKind::Speed];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Gamma => "gamma",
            EventKind::Neutron => "neutron",
            EventKind::Occupancy => "occupancy",
            EventKind::Tamper => "tamper",
            EventKind::Speed => "speed",
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

/// Everything the decoder publishes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PortalEvent {
    Gamma(ChannelEvent),
    Neutron(ChannelEvent),
    Occupancy(OccupancyEvent),
    Tamper(TamperEvent),
    Speed(SpeedEvent),
}

impl PortalEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PortalEvent::Gamma(_) => EventKind::Gamma,
            PortalEvent::Neutron(_) => EventKind::Neutron,
            PortalEvent::Occupancy(_) => EventKind::Occupancy,
            PortalEvent::Tamper(_) => EventKind::Tamper,
            PortalEvent::Speed(_) => EventKind::Speed,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            PortalEvent::Gamma(e) | PortalEvent::Neutron(e) => e.timestamp,
            PortalEvent::Occupancy(e) => e.timestamp,
            PortalEvent::Tamper(e) => e.timestamp,
            PortalEvent::Speed(e) => e.timestamp,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_secs_truncates() {
        assert_eq!(epoch_secs(1_700_000_000_999), 1_700_000_000);
        assert_eq!(epoch_secs(999), 0);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = PortalEvent::Gamma(ChannelEvent {
            timestamp: 1_700_000_000,
            channel: Channel::Gamma,
            counts: GrossCounts([10, 20, 30, 40]),
            alarm_state: AlarmState::Alarm,
        });
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["kind"], "gamma");
        assert_eq!(json["counts"], serde_json::json!([10, 20, 30, 40]));
        assert_eq!(json["alarm_state"], "Alarm");
    }

    #[test]
    fn test_kind_index_matches_all() {
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
