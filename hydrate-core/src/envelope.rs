/*!
Versioned envelope around persisted state documents.

Every record is stored as `{"version": <int>, "data": <json>}`. Documents
written before the envelope existed are still readable: a missing `version`
means version 1 and a missing `data` means the whole document is the data.
*/

use crate::{HydrateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version assumed for documents that carry no `version` field.
pub const DEFAULT_VERSION: u32 = 1;

/// The persisted document shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Schema version the data was written at
    pub version: u32,

    /// Serialized state
    pub data: Value,
}

impl Envelope {
    pub fn new(version: u32, data: Value) -> Self {
        Self { version, data }
    }

    /// Split a decoded document into version and data.
    ///
    /// # Errors
    /// * `HydrateError::Decode` - If the document is not a JSON object or its
    ///   `version` is not a non-negative integer that fits in `u32`
    pub fn from_document(document: Value) -> Result<Self> {
        let mut fields = match document {
            Value::Object(fields) => fields,
            other => {
                return Err(HydrateError::decode(format!(
                    "expected a JSON object, found {}",
                    json_kind(&other)
                )))
            }
        };

        let version = match fields.get("version") {
            None | Some(Value::Null) => DEFAULT_VERSION,
            Some(value) => value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| HydrateError::decode(format!("invalid version field: {value}")))?,
        };

        let data = match fields.remove("data") {
            Some(data) => data,
            None => Value::Object(fields),
        };

        Ok(Self { version, data })
    }

    /// Parse stored text into a JSON object document.
    ///
    /// # Errors
    /// * `HydrateError::Decode` - If the text is not JSON or not an object
    pub fn parse_document(raw: &str) -> Result<Value> {
        let document: Value = serde_json::from_str(raw)
            .map_err(|e| HydrateError::decode(format!("stored text is not valid JSON: {e}")))?;
        if !document.is_object() {
            return Err(HydrateError::decode(format!(
                "expected a JSON object, found {}",
                json_kind(&document)
            )));
        }
        Ok(document)
    }

    /// Parse stored text into an envelope.
    pub fn decode(raw: &str) -> Result<Self> {
        Self::from_document(Self::parse_document(raw)?)
    }

    /// Encode the envelope as compact JSON text.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(HydrateError::Json)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_writes_version_before_data() {
        let envelope = Envelope::new(1, json!({"value": "test", "count": 42}));
        assert_eq!(
            envelope.encode().unwrap(),
            r#"{"version":1,"data":{"value":"test","count":42}}"#
        );
    }

    #[test]
    fn test_decode_full_envelope() {
        let envelope = Envelope::decode(r#"{"version":3,"data":{"name":"x"}}"#).unwrap();
        assert_eq!(envelope.version, 3);
        assert_eq!(envelope.data, json!({"name": "x"}));
    }

    #[test]
    fn test_missing_version_defaults_to_one() {
        let envelope = Envelope::decode(r#"{"data":{"value":"test"}}"#).unwrap();
        assert_eq!(envelope.version, DEFAULT_VERSION);
        assert_eq!(envelope.data, json!({"value": "test"}));
    }

    #[test]
    fn test_legacy_document_is_treated_as_data() {
        let envelope = Envelope::decode(r#"{"value":"legacy","count":1}"#).unwrap();
        assert_eq!(envelope.version, 1);
        assert_eq!(envelope.data, json!({"value": "legacy", "count": 1}));
    }

    #[test]
    fn test_data_less_document_keeps_explicit_version() {
        let envelope = Envelope::decode(r#"{"version":2,"name":"n"}"#).unwrap();
        assert_eq!(envelope.version, 2);
        assert_eq!(envelope.data, json!({"version": 2, "name": "n"}));
    }

    #[test]
    fn test_non_object_documents_are_rejected() {
        for raw in ["[1,2]", "42", "\"text\"", "null"] {
            let err = Envelope::decode(raw).unwrap_err();
            assert!(matches!(err, HydrateError::Decode(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn test_invalid_json_is_a_decode_error() {
        let err = Envelope::decode("not json at all").unwrap_err();
        assert!(matches!(err, HydrateError::Decode(_)));
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_bad_version_field() {
        for raw in [
            r#"{"version":"2","data":{}}"#,
            r#"{"version":-1,"data":{}}"#,
            r#"{"version":1.5,"data":{}}"#,
        ] {
            assert!(matches!(
                Envelope::decode(raw).unwrap_err(),
                HydrateError::Decode(_)
            ));
        }
    }
}
