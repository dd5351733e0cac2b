//! Message classification
//!
//! Turns one framed line into a `Classification`: a recognized message with
//! its raw payload and capture time, an unknown code, or a blank line.
//! Payload fields are not validated here; the emitters own that.

use crate::domain::types::{MessageCode, RawMessage};

/// A recognized portal message
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedMessage {
    pub code: MessageCode,
    pub raw: RawMessage,
    /// Wall-clock capture time (epoch ms). The protocol carries no timestamp.
    pub received_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Message(ClassifiedMessage),
    /// Code outside the dispatch table. Ignored, not an error.
    Unknown(String),
    Blank,
}

/// Classify one line captured at `received_at_ms`
pub fn classify(line: &str, received_at_ms: u64) -> Classification {
    if line.trim().is_empty() {
        return Classification::Blank;
    }

    let raw = RawMessage::parse(line);
    match MessageCode::lookup(raw.code()) {
        Some(code) => Classification::Message(ClassifiedMessage { code, raw, received_at_ms }),
        None => Classification::Unknown(raw.code().to_string()),
    }
}
