//! Stream parser for Claude Code stdout.
//!
//! Output arrives in arbitrary chunks. [`StreamParser`] reassembles lines
//! with [`LinesCodec`] and decodes each complete line into a
//! [`StreamEvent`]. Lines that are not valid events (diagnostic text,
//! truncated JSON, invalid UTF-8, oversized lines) are dropped and decoding
//! continues with the next line.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::cli::StreamEvent;

/// Maximum accepted line length: 16 MiB.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Read buffer size for output channels.
pub const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Error type for stream operations.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    /// A line could not be decoded as an event.
    #[error("Failed to parse line: {reason}")]
    ParseError {
        /// The offending input.
        input: String,
        /// Decoder error message.
        reason: String,
    },
    /// Reading the stream failed.
    #[error("Stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Incremental NDJSON event decoder.
#[derive(Debug)]
pub struct StreamParser {
    codec: LinesCodec,
    buffer: BytesMut,
    discarded: usize,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    /// Create a parser with the default line length limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_BYTES)
    }

    /// Create a parser with a custom line length limit.
    #[must_use]
    pub fn with_max_line_length(max: usize) -> Self {
        Self {
            codec: LinesCodec::new_with_max_length(max),
            buffer: BytesMut::with_capacity(READ_CHUNK_BYTES),
            discarded: 0,
        }
    }

    /// Parse a single line of stream-json output.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::ParseError` if the line is not a valid event.
    pub fn parse_line(line: &str) -> Result<StreamEvent, StreamError> {
        serde_json::from_str(line.trim()).map_err(|e| StreamError::ParseError {
            input: line.to_string(),
            reason: e.to_string(),
        })
    }

    /// Feed a chunk and return every event completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => self.push_line(&line, &mut events),
                Ok(None) => break,
                Err(e) => self.record_discard(&e),
            }
        }
        events
    }

    /// Flush a trailing unterminated line at end of stream.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        loop {
            match self.codec.decode_eof(&mut self.buffer) {
                Ok(Some(line)) => self.push_line(&line, &mut events),
                Ok(None) => break,
                Err(e) => {
                    self.record_discard(&e);
                    if self.buffer.is_empty() {
                        break;
                    }
                }
            }
        }
        events
    }

    /// Number of lines dropped so far.
    #[must_use]
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn push_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if line.trim().is_empty() {
            return;
        }
        match Self::parse_line(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                self.discarded += 1;
                tracing::trace!(error = %e, "Skipping non-event line");
            }
        }
    }

    fn record_discard(&mut self, err: &LinesCodecError) {
        self.discarded += 1;
        tracing::debug!(error = %err, "Dropping undecodable line");
    }
}

/// Decode an entire reader into events. Used for replaying captured output.
///
/// # Errors
///
/// Returns `StreamError::Io` if reading fails.
pub async fn read_events<R>(mut reader: R) -> Result<Vec<StreamEvent>, StreamError>
where
    R: AsyncRead + Unpin,
{
    let mut parser = StreamParser::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut events = Vec::new();
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        events.extend(parser.feed(&chunk[..n]));
    }
    events.extend(parser.finish());
    Ok(events)
}
