//! Decoder error kinds
//!
//! Stream-level failures (`Io`, `LineTooLong`, `Worker`) end the reader task.
//! `MalformedMessage` and `MissingField` are scoped to a single line and
//! never stop data flow. Unknown codes and a close while idle are not errors
//! at all.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Reading the portal byte stream failed
    #[error("portal stream read failed: {0}")]
    Io(#[from] std::io::Error),

    /// No newline within the configured line limit; framing is lost
    #[error("portal line exceeds {limit} bytes without a newline")]
    LineTooLong { limit: usize },

    /// A payload field does not parse
    #[error("malformed {code} message: field {field} {value:?} is not a valid {expected}")]
    MalformedMessage { code: &'static str, field: usize, expected: &'static str, value: String },

    /// A required payload field is absent or empty
    #[error("malformed {code} message: field {field} is missing")]
    MissingField { code: &'static str, field: usize },

    /// The reader task panicked or was aborted
    #[error("portal reader task failed: {0}")]
    Worker(String),
}

impl DecodeError {
    /// True when the error ends the reader (the host should reconnect)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DecodeError::MalformedMessage { .. } | DecodeError::MissingField { .. })
    }

    /// Message code of a per-line error
    pub fn code(&self) -> Option<&'static str> {
        match self {
            DecodeError::MalformedMessage { code, .. } | DecodeError::MissingField { code, .. } => {
                Some(code)
            }
            _ => None,
        }
    }

    pub(crate) fn missing(code: &'static str, field: usize) -> Self {
        DecodeError::MissingField { code, field }
    }

    pub(crate) fn invalid(code: &'static str, field: usize, expected: &'static str, value: &str) -> Self {
        DecodeError::MalformedMessage { code, field, expected, value: value.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_line_errors_are_not_fatal() {
        assert!(!DecodeError::missing("GA", 4).is_fatal());
        assert!(!DecodeError::invalid("SP", 1, "speed", "fast").is_fatal());
        assert!(DecodeError::LineTooLong { limit: 8 }.is_fatal());
        assert!(DecodeError::Io(std::io::Error::other("gone")).is_fatal());
        assert!(DecodeError::Worker("panicked".into()).is_fatal());
    }

    #[test]
    fn test_malformed_display() {
        let err = DecodeError::invalid("GA", 1, "count", "abc");
        assert_eq!(err.to_string(), "malformed GA message: field 1 \"abc\" is not a valid count");
        assert_eq!(DecodeError::missing("GX", 2).to_string(), "malformed GX message: field 2 is missing");
    }

    #[test]
    fn test_code() {
        assert_eq!(DecodeError::missing("NB", 3).code(), Some("NB"));
        assert_eq!(DecodeError::LineTooLong { limit: 1 }.code(), None);
    }
}
