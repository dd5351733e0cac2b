//! Occupancy state machine
//!
//! ```txt
//!            GA | GS | NA | NS
//!   +------+ ================> +----------+ ==+ GA | NA: set alarm flag
//!   | Idle |                   | Occupied |   |  (monotonic)
//!   +------+ <================ +----------+ <=+
//!     ||  /\        GX: emit closed interval, reset
//!     ||==||
//!      GX: no-op
//! ```
//!
//! Key behaviors:
//! - The first alarm or scan reading opens the interval; an alarm that opens
//!   it also sets its flag
//! - Flags are cleared when an interval starts and after the closing
//!   interval has been read out
//! - `GX` while idle is accepted and ignored so a missed scan message can
//!   never wedge the machine
//!
//! The tracker is owned by the single reader task; no locking.

use crate::domain::types::{Channel, MessageCode};

/// Mutable occupancy state. `start_ms` is `Some` iff an interval is open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyState {
    start_ms: Option<u64>,
    gamma_alarmed: bool,
    neutron_alarmed: bool,
}

impl OccupancyState {
    pub fn is_active(&self) -> bool {
        self.start_ms.is_some()
    }

    pub fn start_ms(&self) -> Option<u64> {
        self.start_ms
    }

    pub fn gamma_alarmed(&self) -> bool {
        self.gamma_alarmed
    }

    pub fn neutron_alarmed(&self) -> bool {
        self.neutron_alarmed
    }
}

/// An interval read out on close, before the state was reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedOccupancy {
    pub start_ms: u64,
    pub end_ms: u64,
    pub gamma_alarmed: bool,
    pub neutron_alarmed: bool,
}

/// What a message did to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No state change
    None,
    /// Idle → Occupied
    Opened,
    /// Occupied → Occupied with a newly set alarm flag
    Alarmed(Channel),
    /// Occupied → Idle
    Closed(ClosedOccupancy),
    /// `GX` while idle
    IgnoredClose,
}

#[derive(Debug, Default)]
pub struct OccupancyTracker {
    state: OccupancyState,
}

impl OccupancyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &OccupancyState {
        &self.state
    }

    /// Apply one classified message captured at `now_ms`
    pub fn observe(&mut self, code: MessageCode, now_ms: u64) -> Transition {
        if code == MessageCode::OccupancyEnd {
            return self.close(now_ms);
        }
        if !code.is_occupied_reading() {
            return Transition::None;
        }

        let opened = if self.state.is_active() {
            false
        } else {
            self.state = OccupancyState { start_ms: Some(now_ms), ..OccupancyState::default() };
            true
        };

        let newly_alarmed = match code {
            MessageCode::GammaAlarm if !self.state.gamma_alarmed => {
                self.state.gamma_alarmed = true;
                Some(Channel::Gamma)
            }
            MessageCode::NeutronAlarm if !self.state.neutron_alarmed => {
                self.state.neutron_alarmed = true;
                Some(Channel::Neutron)
            }
            _ => None,
        };

        match (opened, newly_alarmed) {
            (true, _) => Transition::Opened,
            (false, Some(channel)) => Transition::Alarmed(channel),
            (false, None) => Transition::None,
        }
    }

    fn close(&mut self, now_ms: u64) -> Transition {
        let Some(start_ms) = self.state.start_ms else {
            return Transition::IgnoredClose;
        };

        let closed = ClosedOccupancy {
            start_ms,
            end_ms: now_ms,
            gamma_alarmed: self.state.gamma_alarmed,
            neutron_alarmed: self.state.neutron_alarmed,
        };
        self.state = OccupancyState::default();
        Transition::Closed(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let tracker = OccupancyTracker::new();
        assert!(!tracker.state().is_active());
        assert_eq!(tracker.state().start_ms(), None);
    }

    #[test]
    fn test_background_does_not_open() {
        let mut tracker = OccupancyTracker::new();
        assert_eq!(tracker.observe(MessageCode::GammaBackground, 10), Transition::None);
        assert_eq!(tracker.observe(MessageCode::NeutronFaultHigh, 20), Transition::None);
        assert_eq!(tracker.observe(MessageCode::TamperTrip, 30), Transition::None);
        assert!(!tracker.state().is_active());
    }

    #[test]
    fn test_scan_opens_without_alarm() {
        let mut tracker = OccupancyTracker::new();
        assert_eq!(tracker.observe(MessageCode::GammaScan, 1000), Transition::Opened);
        assert!(tracker.state().is_active());
        assert_eq!(tracker.state().start_ms(), Some(1000));
        assert!(!tracker.state().gamma_alarmed());
        assert!(!tracker.state().neutron_alarmed());
    }

    #[test]
    fn test_opening_alarm_sets_flag() {
        let mut tracker = OccupancyTracker::new();
        assert_eq!(tracker.observe(MessageCode::NeutronAlarm, 1000), Transition::Opened);
        assert!(tracker.state().neutron_alarmed());
        assert!(!tracker.state().gamma_alarmed());
    }

    #[test]
    fn test_start_time_kept_across_readings() {
        let mut tracker = OccupancyTracker::new();
        tracker.observe(MessageCode::NeutronScan, 1000);
        tracker.observe(MessageCode::GammaScan, 1200);
        assert_eq!(tracker.observe(MessageCode::GammaAlarm, 1400), Transition::Alarmed(Channel::Gamma));
        assert_eq!(tracker.observe(MessageCode::GammaAlarm, 1600), Transition::None);
        assert_eq!(tracker.state().start_ms(), Some(1000));
    }

    #[test]
    fn test_flags_are_monotonic_within_interval() {
        let mut tracker = OccupancyTracker::new();
        tracker.observe(MessageCode::GammaAlarm, 1000);
        tracker.observe(MessageCode::GammaScan, 1100);
        tracker.observe(MessageCode::GammaBackground, 1200);
        assert!(tracker.state().gamma_alarmed());
    }

    #[test]
    fn test_close_reports_then_resets() {
        let mut tracker = OccupancyTracker::new();
        tracker.observe(MessageCode::GammaScan, 1000);
        tracker.observe(MessageCode::NeutronAlarm, 1500);

        let Transition::Closed(closed) = tracker.observe(MessageCode::OccupancyEnd, 4000) else {
            panic!("expected close");
        };
        assert_eq!(
            closed,
            ClosedOccupancy {
                start_ms: 1000,
                end_ms: 4000,
                gamma_alarmed: false,
                neutron_alarmed: true
            }
        );
        assert_eq!(tracker.state(), &OccupancyState::default());
    }

    #[test]
    fn test_close_while_idle_is_ignored() {
        let mut tracker = OccupancyTracker::new();
        assert_eq!(tracker.observe(MessageCode::OccupancyEnd, 10), Transition::IgnoredClose);
        assert!(!tracker.state().is_active());
    }

    #[test]
    fn test_double_close_yields_one_interval() {
        let mut tracker = OccupancyTracker::new();
        tracker.observe(MessageCode::GammaAlarm, 1000);
        assert!(matches!(tracker.observe(MessageCode::OccupancyEnd, 2000), Transition::Closed(_)));
        assert_eq!(tracker.observe(MessageCode::OccupancyEnd, 2100), Transition::IgnoredClose);
    }

    #[test]
    fn test_next_interval_starts_clean() {
        let mut tracker = OccupancyTracker::new();
        tracker.observe(MessageCode::GammaAlarm, 1000);
        tracker.observe(MessageCode::OccupancyEnd, 2000);

        tracker.observe(MessageCode::NeutronScan, 3000);
        let Transition::Closed(closed) = tracker.observe(MessageCode::OccupancyEnd, 5000) else {
            panic!("expected close");
        };
        assert!(!closed.gamma_alarmed);
        assert!(!closed.neutron_alarmed);
        assert_eq!(closed.start_ms, 3000);
    }

    #[test]
    fn test_alarm_flags_imply_active() {
        let mut tracker = OccupancyTracker::new();
        let script = [
            MessageCode::GammaBackground,
            MessageCode::GammaAlarm,
            MessageCode::NeutronAlarm,
            MessageCode::OccupancyEnd,
            MessageCode::OccupancyEnd,
            MessageCode::NeutronBackground,
            MessageCode::NeutronScan,
            MessageCode::OccupancyEnd,
        ];
        for (i, code) in script.into_iter().enumerate() {
            tracker.observe(code, i as u64 * 100);
            let state = tracker.state();
            if state.gamma_alarmed() || state.neutron_alarmed() {
                assert!(state.is_active());
            }
        }
    }
}
