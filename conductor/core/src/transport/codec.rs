//! Wire Codec
//!
//! JSON encoding for the client protocol. Each transport message carries
//! exactly one JSON object.
//!
//! ```text
//! client → server   {"type":"chat","sessionId":"s1","message":"hi"}
//! server → client   {"type":"token","content":"Hel"}
//! ```
//!
//! # Security
//!
//! - Maximum message size is enforced before parsing

use thiserror::Error;

use crate::events::ClientCommand;
use crate::messages::ChatEvent;

/// Default maximum inbound message size (64 KB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Errors decoding or encoding a wire message
#[derive(Debug, Error)]
pub enum CodecError {
    /// Message exceeds the size limit
    #[error("Message too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Actual size in bytes
        size: usize,
        /// Allowed size in bytes
        max: usize,
    },

    /// Message is not a valid command
    #[error("Invalid message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode one inbound command
///
/// # Errors
///
/// Returns `CodecError::TooLarge` if `text` is longer than `max_size` bytes,
/// and `CodecError::Malformed` if it is not a known command.
pub fn decode_command(text: &str, max_size: usize) -> Result<ClientCommand, CodecError> {
    if text.len() > max_size {
        return Err(CodecError::TooLarge {
            size: text.len(),
            max: max_size,
        });
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode one outbound event
///
/// # Errors
///
/// Returns `CodecError::Malformed` if serialization fails.
pub fn encode_event(event: &ChatEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}
