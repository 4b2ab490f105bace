//! Envelope message type.
//!
//! Every frame in either direction is a single JSON object:
//!
//! ```json
//! {
//!   "command": "search | subscribe | unsubscribe | data",
//!   "data": { ... },
//!   "error": { "code": 1, "message": "..." }
//! }
//! ```
//!
//! An envelope with `error` set is a failure notification for the command
//! it names, not a distinct frame type.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::identifiers::StreamId;

use super::codec::DecodeError;
use super::stream::StreamDescriptor;

// ============================================================================
// Command
// ============================================================================

/// Protocol intent of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Stream catalog request / response.
    Search,
    /// Start receiving data for a stream.
    Subscribe,
    /// Stop receiving data for a stream.
    Unsubscribe,
    /// One update for one stream.
    Data,
    /// Any other command; ignored by the router.
    Other(String),
}

impl Command {
    /// Wire name for `search`.
    pub const SEARCH: &'static str = "search";
    /// Wire name for `subscribe`.
    pub const SUBSCRIBE: &'static str = "subscribe";
    /// Wire name for `unsubscribe`.
    pub const UNSUBSCRIBE: &'static str = "unsubscribe";
    /// Wire name for `data`.
    pub const DATA: &'static str = "data";

    /// Classifies a wire command name.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            Self::SEARCH => Self::Search,
            Self::SUBSCRIBE => Self::Subscribe,
            Self::UNSUBSCRIBE => Self::Unsubscribe,
            Self::DATA => Self::Data,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Search => Self::SEARCH,
            Self::Subscribe => Self::SUBSCRIBE,
            Self::Unsubscribe => Self::UNSUBSCRIBE,
            Self::Data => Self::DATA,
            Self::Other(name) => name,
        }
    }
}

// ============================================================================
// ErrorPayload
// ============================================================================

/// Server-reported failure attached to an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
}

// ============================================================================
// Envelope
// ============================================================================

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol intent (`search`, `subscribe`, `unsubscribe`, `data`).
    pub command: String,

    /// Command payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Failure notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Envelope {
    /// Creates an envelope with a command and optional payload.
    #[inline]
    #[must_use]
    pub fn new(command: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            command: command.into(),
            data,
            error: None,
        }
    }

    /// Creates a `search` request.
    #[inline]
    #[must_use]
    pub fn search() -> Self {
        Self::new(Command::SEARCH, None)
    }

    /// Creates a `subscribe` request: `{id, name, type}`.
    ///
    /// `type` is omitted when the descriptor has none.
    #[must_use]
    pub fn subscribe(stream: &StreamDescriptor) -> Self {
        let mut data = Map::new();
        data.insert("id".to_string(), json!(stream.id.as_str()));
        data.insert("name".to_string(), json!(stream.name));
        if let Some(ref stream_type) = stream.stream_type {
            data.insert("type".to_string(), json!(stream_type));
        }
        Self::new(Command::SUBSCRIBE, Some(Value::Object(data)))
    }

    /// Creates an `unsubscribe` request: `{id}`.
    #[inline]
    #[must_use]
    pub fn unsubscribe(stream_id: &StreamId) -> Self {
        Self::new(
            Command::UNSUBSCRIBE,
            Some(json!({ "id": stream_id.as_str() })),
        )
    }

    /// Attaches an error payload.
    #[inline]
    #[must_use]
    pub fn with_error(mut self, code: i64, message: impl Into<String>) -> Self {
        self.error = Some(ErrorPayload {
            code,
            message: message.into(),
        });
        self
    }

    /// Returns the classified command.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Command {
        Command::parse(&self.command)
    }

    /// Returns `true` if this envelope carries an error.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the stream ID embedded in `data.id`.
    ///
    /// Returns `None` when `data` is absent or `id` is not a string.
    #[must_use]
    pub fn stream_id(&self) -> Option<StreamId> {
        self.data
            .as_ref()
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_str())
            .map(StreamId::from)
    }

    /// Parses `data.streams` of a `search` response.
    ///
    /// Entries are decoded one by one; an entry that does not decode is
    /// logged and skipped so the rest of the catalog survives.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidEnvelope`] when `streams` is missing
    /// or not an array.
    pub fn streams(&self) -> Result<Vec<StreamDescriptor>, DecodeError> {
        let entries = self
            .data
            .as_ref()
            .and_then(|v| v.get("streams"))
            .and_then(Value::as_array)
            .ok_or_else(|| DecodeError::InvalidEnvelope {
                reason: "'data.streams' missing or not an array".to_string(),
            })?;

        let streams = entries
            .iter()
            .filter_map(|entry| match StreamDescriptor::deserialize(entry) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!(id = ?entry.get("id"), error = %e, "Skipping undecodable stream");
                    None
                }
            })
            .collect();

        Ok(streams)
    }
}

// ============================================================================
// Tests
// ============================================================================
