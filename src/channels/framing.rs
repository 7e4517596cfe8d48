//! `\r\n` line framing over a raw byte stream.
//!
//! The transport hands us whatever a single read returned: half a line, three
//! lines and a bit, or a multi-byte character cut in two. [`LineFramer`]
//! buffers the partial tail and yields complete lines lazily, one per
//! [`Iterator::next`] call, so a caller can stop halfway through a batch and
//! pick up the rest on the next call.
//!
//! Invalid UTF-8 is not fatal. The offending increment and everything buffered
//! before it are dropped and framing resumes with the next increment. That
//! loses at most one partial line of data, which is preferable to a session
//! that can never frame another line.

use thiserror::Error;

/// Canonical IRC line terminator.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Upper bound on an unterminated partial line. IRC lines are at most 512
/// bytes (8 KiB with IRCv3 tags), so anything longer is garbage.
pub const MAX_PARTIAL_LINE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("invalid UTF-8 in inbound data, dropped {dropped} buffered bytes")]
    InvalidUtf8 { dropped: usize },
    #[error("partial line exceeded {MAX_PARTIAL_LINE} bytes, dropped {dropped} buffered bytes")]
    LineTooLong { dropped: usize },
}

/// Stateful splitter from byte increments to protocol lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    /// Decoded text not yet handed out as a line.
    buffer: String,
    /// Incomplete UTF-8 sequence held back from the previous increment.
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one transport read.
    ///
    /// On error the framer is already reset and ready for the next increment;
    /// the caller only needs to log.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), FramingError> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        match std::str::from_utf8(&data) {
            Ok(text) => self.buffer.push_str(text),
            // Truncated sequence at the end: keep it for the next read.
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                self.buffer
                    .push_str(std::str::from_utf8(&data[..valid]).unwrap_or_default());
                self.pending = data[valid..].to_vec();
            }
            Err(_) => {
                let dropped = self.buffer.len() + data.len();
                self.clear();
                return Err(FramingError::InvalidUtf8 { dropped });
            }
        }

        let partial = self
            .buffer
            .rfind(LINE_TERMINATOR)
            .map_or(self.buffer.len(), |i| {
                self.buffer.len() - i - LINE_TERMINATOR.len()
            });
        if partial > MAX_PARTIAL_LINE {
            let keep = self.buffer.len() - partial;
            self.buffer.truncate(keep);
            self.pending.clear();
            return Err(FramingError::LineTooLong { dropped: partial });
        }

        Ok(())
    }

    /// Lazily drain the complete lines buffered so far, terminators stripped.
    ///
    /// Lines not consumed before the iterator is dropped stay buffered.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { framer: self }
    }

    /// Text received after the last terminator (plus any undrained lines).
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending.clear();
    }
}

/// Iterator returned by [`LineFramer::lines`].
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let buffer = &mut self.framer.buffer;
        let end = buffer.find(LINE_TERMINATOR)?;
        let line = buffer[..end].to_string();
        buffer.drain(..end + LINE_TERMINATOR.len());
        Some(line)
    }
}
