//! Newline-delimited JSON framing for stdio transports.
//!
//! One JSON-RPC message per line. Lines are read through a size-bounded
//! reader so a peer that never sends a newline cannot grow the buffer without
//! limit.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum NDJSON message size (10 MB).
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Errors reading or writing one NDJSON line.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// A single line exceeds the maximum size.
    #[error("Message exceeds maximum size of {max_bytes} bytes")]
    MessageTooLarge { max_bytes: usize },

    /// The line is not valid JSON.
    #[error("Malformed JSON: {reason}")]
    MalformedJson { reason: String },

    /// JSON-RPC batches (arrays) are not used by MCP.
    #[error("JSON-RPC batch requests (arrays) are not supported")]
    UnsupportedBatch,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    /// Whether the stream is still usable after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FramingError::Io(_))
    }
}

/// Reads the next non-blank line and parses it as JSON.
///
/// Returns `Ok(None)` at EOF.
///
/// # Errors
///
/// Oversized lines, invalid JSON, batches and I/O failures. After any error
/// other than `Io` the reader is positioned at the next line.
pub async fn read_message<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<Value>, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        buf.clear();
        let n = bounded_read_line(reader, buf, MAX_MESSAGE_BYTES).await?;
        if n == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(buf);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return parse_line(trimmed).map(Some);
    }
}

/// Parses one trimmed NDJSON line.
///
/// # Errors
///
/// `MalformedJson` or `UnsupportedBatch`.
pub fn parse_line(line: &str) -> Result<Value, FramingError> {
    let value: Value = serde_json::from_str(line).map_err(|e| FramingError::MalformedJson {
        reason: e.to_string(),
    })?;
    if value.is_array() {
        return Err(FramingError::UnsupportedBatch);
    }
    Ok(value)
}

/// Serializes `message` as one line and flushes.
///
/// # Errors
///
/// Serialization or I/O failures.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut line = serde_json::to_vec(message).map_err(|e| FramingError::MalformedJson {
        reason: e.to_string(),
    })?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

async fn bounded_read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<usize, FramingError> {
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await?;

        // EOF: return what we have (or 0 if nothing).
        if available.is_empty() {
            return Ok(total);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let to_consume = pos + 1;
                if total + to_consume > max_bytes {
                    reader.consume(to_consume);
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }
                buf.extend_from_slice(&available[..to_consume]);
                total += to_consume;
                reader.consume(to_consume);
                return Ok(total);
            }
            None => {
                let len = available.len();
                if total + len > max_bytes {
                    reader.consume(len);
                    drain_until_newline(reader).await?;
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }
                buf.extend_from_slice(available);
                total += len;
                reader.consume(len);
            }
        }
    }
}

async fn drain_until_newline<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<(), FramingError> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = available.len();
        reader.consume(len);
    }
}
