//! Domain models - portal protocol types and published events
//!
//! - `types` - message codes, raw CSV fields, typed payload records
//! - `events` - events handed to the publisher
//! - `error` - decoder error kinds

pub mod error;
pub mod events;
pub mod types;

pub use error::DecodeError;
pub use events::{
    epoch_ms, epoch_secs, ChannelEvent, EventKind, OccupancyEvent, PortalEvent, SpeedEvent,
    TamperEvent,
};
pub use types::{AlarmState, Channel, GrossCounts, MessageCode, RawMessage, SetupCode};
