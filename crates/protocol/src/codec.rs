//! Newline-delimited JSON line codec.
//!
//! Every message on the wire is a single JSON object terminated by `\n`.
//! The same codec is used over stdio and Unix domain sockets.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// Maximum accepted line size (16 MB).
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Serialize a message into one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line =
        serde_json::to_string(message).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Parse one line into a message.
///
/// Surrounding whitespace, including the trailing newline, is ignored.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::LineTooLong {
            size: line.len(),
            max: MAX_LINE_BYTES,
        });
    }
    Ok(serde_json::from_str(line.trim())?)
}
