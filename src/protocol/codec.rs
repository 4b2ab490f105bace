//! JSON frame codec.
//!
//! Encoding is deterministic. Decoding is strict: anything that is not a
//! JSON object with a string `command` is rejected with [`DecodeError`]
//! instead of being coerced.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

use super::envelope::Envelope;

// ============================================================================
// DecodeError
// ============================================================================

/// Reasons an inbound frame is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame is not well-formed JSON.
    #[error("malformed JSON: {reason}")]
    Malformed {
        /// Parser diagnostic.
        reason: String,
    },

    /// Frame is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// Object has no `command`, or it is not a string.
    #[error("missing or non-string 'command'")]
    MissingCommand,

    /// `data` or `error` has the wrong shape.
    #[error("invalid envelope: {reason}")]
    InvalidEnvelope {
        /// Deserializer diagnostic.
        reason: String,
    },
}

// ============================================================================
// Codec
// ============================================================================

/// Serializes an envelope into a text frame.
///
/// # Errors
///
/// Returns the serde error if a payload value cannot be serialized.
pub fn encode(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Parses an inbound frame.
///
/// # Errors
///
/// See [`DecodeError`] variants.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed {
        reason: e.to_string(),
    })?;

    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    if !object.get("command").is_some_and(Value::is_string) {
        return Err(DecodeError::MissingCommand);
    }

    serde_json::from_value(value).map_err(|e| DecodeError::InvalidEnvelope {
        reason: e.to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================
