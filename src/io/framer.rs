//! Line framing for the portal byte stream
//!
//! The portal sends one ASCII message per line. Bytes can arrive in arbitrary
//! chunks (a serial read often ends mid-line), so partial data is kept in a
//! persistent buffer until the newline shows up.

use crate::domain::error::DecodeError;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Default upper bound for one portal line
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

pub struct LineFramer<R> {
    reader: BufReader<R>,
    /// Bytes of the line currently being assembled
    pending: Vec<u8>,
    max_line_len: usize,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    pub fn new(source: R) -> Self {
        Self::with_max_line_len(source, DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(source: R, max_line_len: usize) -> Self {
        Self { reader: BufReader::new(source), pending: Vec::with_capacity(128), max_line_len }
    }

    /// Next line without its terminator, `None` at end of stream.
    ///
    /// Cancel safe: partial data stays in the framer if the future is dropped
    /// while waiting for bytes.
    pub async fn next_line(&mut self) -> Result<Option<String>, DecodeError> {
        loop {
            let available = self.reader.fill_buf().await?;

            if available.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                // Connection closed on an unterminated line
                return Ok(Some(self.take_line()));
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    self.pending.extend_from_slice(&available[..end]);
                    self.reader.consume(end + 1);
                    self.check_len()?;
                    return Ok(Some(self.take_line()));
                }
                None => {
                    let n = available.len();
                    self.pending.extend_from_slice(available);
                    self.reader.consume(n);
                    self.check_len()?;
                }
            }
        }
    }

    /// The limit applies to the payload, so a trailing CR is not counted
    fn check_len(&mut self) -> Result<(), DecodeError> {
        let cr = usize::from(self.pending.last() == Some(&b'\r'));
        if self.pending.len() - cr > self.max_line_len {
            self.pending.clear();
            return Err(DecodeError::LineTooLong { limit: self.max_line_len });
        }
        Ok(())
    }

    fn take_line(&mut self) -> String {
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}
