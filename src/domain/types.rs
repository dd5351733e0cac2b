//! Portal wire types: message codes, raw CSV fields and typed payload records
//!
//! Counts are signed 32-bit integers, so `GB,-1,20,30,40` decodes as sent.
//! Speed must be a finite number: `SP,NaN` and `SP,inf` are reported as
//! malformed rather than published.

use crate::domain::error::DecodeError;
use serde::Serialize;
use std::str::FromStr;

/// Detector channel a count message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Gamma,
    Neutron,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Gamma => "gamma",
            Channel::Neutron => "neutron",
        }
    }
}

/// Alarm state label attached to every gamma/neutron reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlarmState {
    Alarm,
    Background,
    Scan,
    FaultHigh,
    FaultLow,
}

impl AlarmState {
    /// Operator-facing category label, e.g. "Fault - Gamma High"
    pub fn label(&self, channel: Channel) -> &'static str {
        match (self, channel) {
            (AlarmState::Alarm, _) => "Alarm",
            (AlarmState::Background, _) => "Background",
            (AlarmState::Scan, _) => "Scan",
            (AlarmState::FaultHigh, Channel::Gamma) => "Fault - Gamma High",
            (AlarmState::FaultLow, Channel::Gamma) => "Fault - Gamma Low",
            (AlarmState::FaultHigh, Channel::Neutron) => "Fault - Neutron High",
            (AlarmState::FaultLow, Channel::Neutron) => "Fault - Neutron Low",
        }
    }
}

/// Setup/calibration codes. Recognized, but carry no behavior yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetupCode {
    Gamma1,
    Gamma2,
    Gamma3,
    Neutron1,
    Neutron2,
}

impl SetupCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupCode::Gamma1 => "SG1",
            SetupCode::Gamma2 => "SG2",
            SetupCode::Gamma3 => "SG3",
            SetupCode::Neutron1 => "SN1",
            SetupCode::Neutron2 => "SN2",
        }
    }
}

/// Message category selected by field 0 of a portal line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    GammaBackground,
    GammaFaultHigh,
    GammaFaultLow,
    GammaAlarm,
    GammaScan,
    NeutronBackground,
    NeutronFaultHigh,
    NeutronAlarm,
    NeutronScan,
    OccupancyEnd,
    TamperClear,
    TamperTrip,
    Speed,
    Setup(SetupCode),
}

impl MessageCode {
    /// Dispatch table lookup. Case-sensitive; `None` for codes the portal
    /// protocol does not define.
    pub fn lookup(code: &str) -> Option<Self> {
        Some(match code {
            "GB" => MessageCode::GammaBackground,
            "GH" => MessageCode::GammaFaultHigh,
            "GL" => MessageCode::GammaFaultLow,
            "GA" => MessageCode::GammaAlarm,
            "GS" => MessageCode::GammaScan,
            "NB" => MessageCode::NeutronBackground,
            "NH" => MessageCode::NeutronFaultHigh,
            "NA" => MessageCode::NeutronAlarm,
            "NS" => MessageCode::NeutronScan,
            "GX" => MessageCode::OccupancyEnd,
            "TC" => MessageCode::TamperClear,
            "TT" => MessageCode::TamperTrip,
            "SP" => MessageCode::Speed,
            "SG1" => MessageCode::Setup(SetupCode::Gamma1),
            "SG2" => MessageCode::Setup(SetupCode::Gamma2),
            "SG3" => MessageCode::Setup(SetupCode::Gamma3),
            "SN1" => MessageCode::Setup(SetupCode::Neutron1),
            "SN2" => MessageCode::Setup(SetupCode::Neutron2),
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCode::GammaBackground => "GB",
            MessageCode::GammaFaultHigh => "GH",
            MessageCode::GammaFaultLow => "GL",
            MessageCode::GammaAlarm => "GA",
            MessageCode::GammaScan => "GS",
            MessageCode::NeutronBackground => "NB",
            MessageCode::NeutronFaultHigh => "NH",
            MessageCode::NeutronAlarm => "NA",
            MessageCode::NeutronScan => "NS",
            MessageCode::OccupancyEnd => "GX",
            MessageCode::TamperClear => "TC",
            MessageCode::TamperTrip => "TT",
            MessageCode::Speed => "SP",
            MessageCode::Setup(setup) => setup.as_str(),
        }
    }

    /// Channel and alarm label for count-carrying codes
    pub fn reading(&self) -> Option<(Channel, AlarmState)> {
        match self {
            MessageCode::GammaBackground => Some((Channel::Gamma, AlarmState::Background)),
            MessageCode::GammaFaultHigh => Some((Channel::Gamma, AlarmState::FaultHigh)),
            MessageCode::GammaFaultLow => Some((Channel::Gamma, AlarmState::FaultLow)),
            MessageCode::GammaAlarm => Some((Channel::Gamma, AlarmState::Alarm)),
            MessageCode::GammaScan => Some((Channel::Gamma, AlarmState::Scan)),
            MessageCode::NeutronBackground => Some((Channel::Neutron, AlarmState::Background)),
            MessageCode::NeutronFaultHigh => Some((Channel::Neutron, AlarmState::FaultHigh)),
            MessageCode::NeutronAlarm => Some((Channel::Neutron, AlarmState::Alarm)),
            MessageCode::NeutronScan => Some((Channel::Neutron, AlarmState::Scan)),
            _ => None,
        }
    }

    /// Codes that only occur while a target is inside the portal
    pub fn is_occupied_reading(&self) -> bool {
        matches!(
            self,
            MessageCode::GammaAlarm
                | MessageCode::GammaScan
                | MessageCode::NeutronAlarm
                | MessageCode::NeutronScan
        )
    }
}

/// Fields of one CSV-formatted portal line. Field 0 is the code.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    fields: Vec<String>,
}

impl RawMessage {
    /// Split a line on commas. The portal grammar has no escaping; surrounding
    /// whitespace and double quotes are stripped from each field.
    pub fn parse(line: &str) -> Self {
        let fields = line
            .split(',')
            .map(|field| field.trim().trim_matches('"').to_string())
            .collect();
        Self { fields }
    }

    pub fn code(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Parse a payload field, mapping absence to `MissingField` and parse
    /// failure to `MalformedMessage`
    fn parse_field<T: FromStr>(
        &self,
        code: MessageCode,
        index: usize,
        expected: &'static str,
    ) -> Result<T, DecodeError> {
        let value = self
            .field(index)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DecodeError::missing(code.as_str(), index))?;
        value.parse::<T>().map_err(|_| DecodeError::invalid(code.as_str(), index, expected, value))
    }
}

/// Four gross counts, fields 1-4 of a gamma or neutron message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GrossCounts(pub [i32; 4]);

impl GrossCounts {
    pub fn from_raw(code: MessageCode, raw: &RawMessage) -> Result<Self, DecodeError> {
        let mut counts = [0i32; 4];
        for (i, slot) in counts.iter_mut().enumerate() {
            *slot = raw.parse_field(code, i + 1, "count")?;
        }
        Ok(Self(counts))
    }
}

/// Payload of a `GX` occupancy-end message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupancyEndRecord {
    pub occupancy_count: i32,
    /// Field 2 as sent, scaled down by 1000
    pub neutron_background: f64,
}

impl OccupancyEndRecord {
    pub fn from_raw(raw: &RawMessage) -> Result<Self, DecodeError> {
        let code = MessageCode::OccupancyEnd;
        let occupancy_count = raw.parse_field(code, 1, "occupancy count")?;
        let background: f64 = raw.parse_field(code, 2, "neutron background")?;
        Ok(Self { occupancy_count, neutron_background: background / 1000.0 })
    }
}

/// Payload of an `SP` speed message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedRecord {
    pub speed: f64,
}

impl SpeedRecord {
    pub fn from_raw(raw: &RawMessage) -> Result<Self, DecodeError> {
        let speed: f64 = raw.parse_field(MessageCode::Speed, 1, "speed")?;
        if !speed.is_finite() {
            return Err(DecodeError::invalid("SP", 1, "speed", raw.field(1).unwrap_or("")));
        }
        Ok(Self { speed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert_eq!(MessageCode::lookup("GA"), Some(MessageCode::GammaAlarm));
        assert_eq!(MessageCode::lookup("ga"), None);
        assert_eq!(MessageCode::lookup("XY"), None);
        assert_eq!(MessageCode::lookup("SN2"), Some(MessageCode::Setup(SetupCode::Neutron2)));
    }

    #[test]
    fn test_lookup_as_str_agree() {
        for code in [
            "GB", "GH", "GL", "GA", "GS", "NB", "NH", "NA", "NS", "GX", "TC", "TT", "SP", "SG1",
            "SG2", "SG3", "SN1", "SN2",
        ] {
            assert_eq!(MessageCode::lookup(code).map(|c| c.as_str()), Some(code));
        }
    }

    #[test]
    fn test_occupied_readings() {
        assert!(MessageCode::GammaScan.is_occupied_reading());
        assert!(MessageCode::NeutronAlarm.is_occupied_reading());
        assert!(!MessageCode::GammaBackground.is_occupied_reading());
        assert!(!MessageCode::OccupancyEnd.is_occupied_reading());
    }

    #[test]
    fn test_alarm_label() {
        assert_eq!(AlarmState::FaultHigh.label(Channel::Gamma), "Fault - Gamma High");
        assert_eq!(AlarmState::FaultHigh.label(Channel::Neutron), "Fault - Neutron High");
        assert_eq!(AlarmState::Scan.label(Channel::Neutron), "Scan");
    }

    #[test]
    fn test_raw_message_trims_fields() {
        let raw = RawMessage::parse("GB, 1 ,\"2\",3,4");
        assert_eq!(raw.code(), "GB");
        assert_eq!(raw.field(1), Some("1"));
        assert_eq!(raw.field(2), Some("2"));
        assert_eq!(raw.field(4), Some("4"));
        assert_eq!(raw.field(5), None);
    }

    #[test]
    fn test_gross_counts_field_order() {
        let raw = RawMessage::parse("NS,7,0,12,3");
        let counts = GrossCounts::from_raw(MessageCode::NeutronScan, &raw).unwrap();
        assert_eq!(counts, GrossCounts([7, 0, 12, 3]));
    }

    #[test]
    fn test_gross_counts_missing_field() {
        let raw = RawMessage::parse("GB,1,2,3");
        let err = GrossCounts::from_raw(MessageCode::GammaBackground, &raw).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { field: 4, .. }));
    }

    #[test]
    fn test_gross_counts_keeps_negative() {
        let raw = RawMessage::parse("GB,1,-2,3,4");
        let counts = GrossCounts::from_raw(MessageCode::GammaBackground, &raw).unwrap();
        assert_eq!(counts, GrossCounts([1, -2, 3, 4]));
    }

    #[test]
    fn test_gross_counts_out_of_range() {
        let raw = RawMessage::parse("GB,1,2,3,2147483648");
        let err = GrossCounts::from_raw(MessageCode::GammaBackground, &raw).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMessage { field: 4, .. }));
    }

    #[test]
    fn test_occupancy_end_scales_background() {
        let raw = RawMessage::parse("GX,5,1200");
        let record = OccupancyEndRecord::from_raw(&raw).unwrap();
        assert_eq!(record.occupancy_count, 5);
        assert!((record.neutron_background - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_speed_rejects_nan() {
        assert!(SpeedRecord::from_raw(&RawMessage::parse("SP,NaN")).is_err());
        assert!(SpeedRecord::from_raw(&RawMessage::parse("SP,inf")).is_err());
        assert_eq!(SpeedRecord::from_raw(&RawMessage::parse("SP,55.5")).unwrap().speed, 55.5);
    }
}
