//! Services - decoding and occupancy tracking
//!
//! - `classifier` - Maps a line's leading code to a message category
//! - `occupancy` - Occupancy interval state machine
//! - `emitters` - Stateless typed-event builders
//! - `decoder` - Per-line pipeline combining the three
//! - `driver` - Reader task and its stop/join handle

pub mod classifier;
pub mod decoder;
pub mod driver;
pub mod emitters;
pub mod occupancy;

pub use classifier::{classify, Classification, ClassifiedMessage};
pub use decoder::{Disposition, LineOutcome, MessageDecoder};
pub use driver::{MessageReader, PortalDriver, StopHandle, WorkerExit};
pub use occupancy::{ClosedOccupancy, OccupancyState, OccupancyTracker, Transition};
