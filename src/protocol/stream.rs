//! Stream catalog types.
//!
//! A `search` response carries an ordered list of [`StreamDescriptor`]s.
//! Descriptors are immutable once received.
//!
//! # Format
//!
//! ```json
//! {
//!   "id": "s1",
//!   "name": "EEG",
//!   "unit": "uV",
//!   "frequency": 256,
//!   "fields": [{ "id": "ch1", "name": "Channel 1", "description": "", "dtype": "f32" }],
//!   "index": [{ "id": "t", "name": "Time", "description": "", "dtype": "f64" }]
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::identifiers::StreamId;

// ============================================================================
// DType
// ============================================================================

/// Sample data type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 16-bit float.
    F16,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Raw byte.
    Byte,
}

impl DType {
    /// Returns the size of one sample in bytes.
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Byte => 1,
            Self::F16 | Self::I16 | Self::U16 => 2,
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F64 => 8,
        }
    }

    /// Returns `true` for floating-point types.
    #[inline]
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }
}

// ============================================================================
// FieldSpec
// ============================================================================

/// One column of a stream (either a sampled value or an index axis).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field identifier, unique within its stream.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Sample data type.
    pub dtype: DType,
}

// ============================================================================
// StreamDescriptor
// ============================================================================

/// Description of one remote stream as advertised by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Server-assigned unique identifier.
    pub id: StreamId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Unit of the sampled values.
    #[serde(default)]
    pub unit: String,
    /// Nominal sampling frequency in Hz.
    pub frequency: f64,
    /// Sampled values, in order.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Ordering/keying axis (e.g. time), in order.
    #[serde(default)]
    pub index: Vec<FieldSpec>,
    /// Optional stream type, echoed back in `subscribe`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
}

impl StreamDescriptor {
    /// Checks the descriptor invariants.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the ID is empty, the frequency
    /// is not a positive finite number, or a field ID appears in both
    /// `fields` and `index`.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("empty stream id".to_string());
        }

        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(format!("frequency must be > 0, got {}", self.frequency));
        }

        let index_ids: FxHashSet<&str> = self.index.iter().map(|f| f.id.as_str()).collect();
        if let Some(shared) = self.fields.iter().find(|f| index_ids.contains(f.id.as_str())) {
            return Err(format!("field '{}' is both a value and an index", shared.id));
        }

        Ok(())
    }

    /// Returns the field with the given ID, searching values then index.
    #[must_use]
    pub fn field(&self, id: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .chain(self.index.iter())
            .find(|f| f.id == id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: &str, dtype: DType) -> FieldSpec {
        FieldSpec {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: String::new(),
            dtype,
        }
    }

    fn descriptor() -> StreamDescriptor {
        StreamDescriptor {
            id: StreamId::new("s1"),
            name: "EEG".to_string(),
            unit: "uV".to_string(),
            frequency: 256.0,
            fields: vec![field("ch1", DType::F32), field("ch2", DType::F32)],
            index: vec![field("t", DType::F64)],
            stream_type: None,
        }
    }

    #[test]
    fn test_parse_descriptor() {
        let json_str = r#"{
            "id": "s1",
            "name": "EEG",
            "unit": "uV",
            "frequency": 256,
            "fields": [{"id": "ch1", "name": "C1", "description": "left", "dtype": "f32"}],
            "index": [{"id": "t", "name": "Time", "description": "", "dtype": "f64"}]
        }"#;

        let parsed: StreamDescriptor = serde_json::from_str(json_str).expect("parse");
        assert_eq!(parsed.id.as_str(), "s1");
        assert_eq!(parsed.frequency, 256.0);
        assert_eq!(parsed.fields[0].dtype, DType::F32);
        assert_eq!(parsed.index[0].dtype, DType::F64);
        assert!(parsed.stream_type.is_none());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_unknown_dtype_rejected() {
        let json_str = r#"{"id": "x", "dtype": "complex128"}"#;
        assert!(serde_json::from_str::<FieldSpec>(json_str).is_err());
    }

    #[test]
    fn test_dtype_sizes() {
        assert_eq!(DType::Byte.size(), 1);
        assert_eq!(DType::F16.size(), 2);
        assert_eq!(DType::U32.size(), 4);
        assert_eq!(DType::F64.size(), 8);
        assert!(DType::F16.is_float());
        assert!(!DType::I32.is_float());
    }

    #[test]
    fn test_validate_frequency() {
        let mut d = descriptor();
        d.frequency = 0.0;
        assert!(d.validate().is_err());

        d.frequency = f64::NAN;
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_validate_disjoint_fields() {
        let mut d = descriptor();
        d.index.push(field("ch2", DType::F32));

        let reason = d.validate().unwrap_err();
        assert!(reason.contains("ch2"));
    }

    #[test]
    fn test_field_lookup() {
        let d = descriptor();
        assert_eq!(d.field("t").map(|f| f.dtype), Some(DType::F64));
        assert!(d.field("missing").is_none());
    }

    #[test]
    fn test_type_omitted_when_absent() {
        let json = serde_json::to_value(descriptor()).expect("serialize");
        assert!(json.get("type").is_none());
    }
}
