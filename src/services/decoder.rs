//! Per-line decode pipeline: classifier → occupancy tracker → emitters
//!
//! `MessageDecoder` is synchronous and owns the occupancy state for one
//! connection. The reader task feeds it one line at a time and forwards the
//! outcome to the publisher; keeping it free of I/O lets the scenario tests
//! drive it directly.

use crate::domain::error::DecodeError;
use crate::domain::events::PortalEvent;
use crate::domain::types::{MessageCode, SetupCode};
use crate::services::classifier::{classify, Classification, ClassifiedMessage};
use crate::services::emitters::{emit, occupancy_event};
use crate::services::occupancy::{OccupancyState, OccupancyTracker, Transition};
use smallvec::SmallVec;
use tracing::{debug, info, trace};

/// How a line was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Blank,
    /// Code outside the dispatch table
    Unknown(String),
    /// Recognized calibration code with no behavior
    Setup(SetupCode),
    Decoded(MessageCode),
}

/// Result of decoding one line: events in publish order and at most one
/// per-line error
#[derive(Debug)]
pub struct LineOutcome {
    pub events: SmallVec<[PortalEvent; 2]>,
    pub error: Option<DecodeError>,
    pub disposition: Disposition,
    pub transition: Transition,
}

impl LineOutcome {
    fn new(disposition: Disposition) -> Self {
        Self { events: SmallVec::new(), error: None, disposition, transition: Transition::None }
    }
}

#[derive(Debug, Default)]
pub struct MessageDecoder {
    tracker: OccupancyTracker,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occupancy(&self) -> &OccupancyState {
        self.tracker.state()
    }

    /// Decode one framed line captured at `now_ms` (epoch ms)
    pub fn decode_line(&mut self, line: &str, now_ms: u64) -> LineOutcome {
        let msg = match classify(line, now_ms) {
            Classification::Blank => return LineOutcome::new(Disposition::Blank),
            Classification::Unknown(code) => {
                trace!(code = %code, "portal_code_unknown");
                return LineOutcome::new(Disposition::Unknown(code));
            }
            Classification::Message(msg) => msg,
        };

        if let MessageCode::Setup(setup) = msg.code {
            trace!(code = %setup.as_str(), "portal_setup_ignored");
            return LineOutcome::new(Disposition::Setup(setup));
        }

        let mut outcome = LineOutcome::new(Disposition::Decoded(msg.code));

        // Tracking runs on the code alone, so a bad payload cannot wedge the
        // machine in Occupied
        outcome.transition = self.tracker.observe(msg.code, now_ms);
        log_transition(&outcome.transition, &msg);

        match emit(&msg) {
            Ok(Some(event)) => outcome.events.push(event),
            Ok(None) => {}
            Err(e) => outcome.error = Some(e),
        }

        if let Transition::Closed(closed) = &outcome.transition {
            match occupancy_event(closed, &msg) {
                Ok(event) => outcome.events.push(event),
                Err(e) => outcome.error = Some(e),
            }
        }

        outcome
    }
}

fn log_transition(transition: &Transition, msg: &ClassifiedMessage) {
    match transition {
        Transition::None => {}
        Transition::Opened => {
            info!(code = %msg.code.as_str(), start_ms = %msg.received_at_ms, "occupancy_opened")
        }
        Transition::Alarmed(channel) => {
            info!(channel = %channel.as_str(), "occupancy_alarm_raised")
        }
        Transition::Closed(closed) => info!(
            duration_ms = %closed.end_ms.saturating_sub(closed.start_ms),
            gamma_alarm = %closed.gamma_alarmed,
            neutron_alarm = %closed.neutron_alarmed,
            "occupancy_closed"
        ),
        Transition::IgnoredClose => debug!("occupancy_end_while_idle"),
    }
}
