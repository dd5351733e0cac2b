//! Stateless converters from a classified message to a typed event
//!
//! Each emitter validates the payload into its fixed-arity record before
//! building the event; a bad field drops only that message.

use crate::domain::error::DecodeError;
use crate::domain::events::{
    epoch_secs, ChannelEvent, OccupancyEvent, PortalEvent, SpeedEvent, TamperEvent,
};
use crate::domain::types::{Channel, GrossCounts, MessageCode, OccupancyEndRecord, SpeedRecord};
use crate::services::classifier::ClassifiedMessage;
use crate::services::occupancy::ClosedOccupancy;

/// Channel event for a classified message, if its code carries one.
///
/// `GX` and setup codes return `Ok(None)`: occupancy events come from the
/// tracker, and setup codes have no behavior.
pub fn emit(msg: &ClassifiedMessage) -> Result<Option<PortalEvent>, DecodeError> {
    let timestamp = epoch_secs(msg.received_at_ms);

    if let Some((channel, alarm_state)) = msg.code.reading() {
        let counts = GrossCounts::from_raw(msg.code, &msg.raw)?;
        let event = ChannelEvent { timestamp, channel, counts, alarm_state };
        return Ok(Some(match channel {
            Channel::Gamma => PortalEvent::Gamma(event),
            Channel::Neutron => PortalEvent::Neutron(event),
        }));
    }

    let event = match msg.code {
        MessageCode::TamperTrip => PortalEvent::Tamper(TamperEvent { timestamp, tampered: true }),
        MessageCode::TamperClear => PortalEvent::Tamper(TamperEvent { timestamp, tampered: false }),
        MessageCode::Speed => {
            let record = SpeedRecord::from_raw(&msg.raw)?;
            PortalEvent::Speed(SpeedEvent { timestamp, speed: record.speed })
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Occupancy event for a closed interval and the `GX` that closed it
pub fn occupancy_event(
    closed: &ClosedOccupancy,
    msg: &ClassifiedMessage,
) -> Result<PortalEvent, DecodeError> {
    let record = OccupancyEndRecord::from_raw(&msg.raw)?;
    Ok(PortalEvent::Occupancy(OccupancyEvent {
        timestamp: epoch_secs(closed.end_ms),
        occupancy_count: record.occupancy_count,
        start_time: epoch_secs(closed.start_ms),
        end_time: epoch_secs(closed.end_ms),
        neutron_background: record.neutron_background,
        gamma_alarm: closed.gamma_alarmed,
        neutron_alarm: closed.neutron_alarmed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AlarmState, RawMessage};

    fn msg(line: &str, received_at_ms: u64) -> ClassifiedMessage {
        let raw = RawMessage::parse(line);
        let code = MessageCode::lookup(raw.code()).unwrap();
        ClassifiedMessage { code, raw, received_at_ms }
    }

    #[test]
    fn test_gamma_fault_low() {
        let event = emit(&msg("GL,1,2,3,4", 1_700_000_000_500)).unwrap().unwrap();
        let PortalEvent::Gamma(event) = event else {
            panic!("expected gamma event");
        };
        assert_eq!(event.timestamp, 1_700_000_000);
        assert_eq!(event.alarm_state, AlarmState::FaultLow);
        assert_eq!(event.counts, GrossCounts([1, 2, 3, 4]));
    }

    #[test]
    fn test_neutron_scan() {
        let event = emit(&msg("NS,0,0,1,0", 2000)).unwrap().unwrap();
        assert!(matches!(
            event,
            PortalEvent::Neutron(ChannelEvent { alarm_state: AlarmState::Scan, channel: Channel::Neutron, .. })
        ));
    }

    #[test]
    fn test_bad_counts_are_rejected() {
        let err = emit(&msg("GA,abc,20,30,40", 0)).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMessage { code: "GA", field: 1, .. }));
        let err = emit(&msg("NB,1,2", 0)).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { code: "NB", field: 3 }));
    }

    #[test]
    fn test_tamper() {
        assert_eq!(
            emit(&msg("TT", 5000)).unwrap(),
            Some(PortalEvent::Tamper(TamperEvent { timestamp: 5, tampered: true }))
        );
        assert_eq!(
            emit(&msg("TC", 5000)).unwrap(),
            Some(PortalEvent::Tamper(TamperEvent { timestamp: 5, tampered: false }))
        );
    }

    #[test]
    fn test_speed() {
        assert_eq!(
            emit(&msg("SP,55.5", 3000)).unwrap(),
            Some(PortalEvent::Speed(SpeedEvent { timestamp: 3, speed: 55.5 }))
        );
        assert!(emit(&msg("SP,fast", 3000)).is_err());
        assert!(emit(&msg("SP", 3000)).is_err());
    }

    #[test]
    fn test_occupancy_end_and_setup_emit_nothing() {
        assert_eq!(emit(&msg("GX,5,1200", 0)).unwrap(), None);
        assert_eq!(emit(&msg("SN1,9,9", 0)).unwrap(), None);
    }

    #[test]
    fn test_occupancy_event() {
        let closed =
            ClosedOccupancy { start_ms: 10_400, end_ms: 15_900, gamma_alarmed: true, neutron_alarmed: false };
        let PortalEvent::Occupancy(event) = occupancy_event(&closed, &msg("GX,5,1200", 15_900)).unwrap()
        else {
            panic!("expected occupancy event");
        };
        assert_eq!(event.timestamp, 15);
        assert_eq!(event.start_time, 10);
        assert_eq!(event.end_time, 15);
        assert_eq!(event.occupancy_count, 5);
        assert!((event.neutron_background - 1.2).abs() < 1e-9);
        assert!(event.gamma_alarm);
        assert!(!event.neutron_alarm);
    }

    #[test]
    fn test_occupancy_event_malformed() {
        let closed = ClosedOccupancy { start_ms: 0, end_ms: 1, gamma_alarmed: false, neutron_alarmed: false };
        assert!(occupancy_event(&closed, &msg("GX,five,1200", 1)).is_err());
        assert!(occupancy_event(&closed, &msg("GX,5", 1)).is_err());
    }
}
