//! Decoding of the result envelope returned by one query.
//!
//! Wire format: `{"sql": str, "cols": [str], "rows": [{col: value}], "output": value}`
//! where `output` is `{"error": str}` when the query itself failed inside the runtime.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    #[serde(default, deserialize_with = "nullable")]
    pub sql: String,
    #[serde(default, deserialize_with = "nullable")]
    pub cols: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub rows: Vec<IndexMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

/// The query ran but reported its own error.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFailure {
    pub message: String,
    /// The `output` error payload.
    pub payload: serde_json::Value,
    /// The whole decoded envelope, for diagnostics.
    pub envelope: serde_json::Value,
}

/// The envelope itself could not be decoded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Failed to parse result: {error}")]
pub struct ParseFailure {
    pub raw: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Results(ResultEnvelope),
    QueryFailed(QueryFailure),
}

/// Decode a raw envelope. Malformed input becomes a [`ParseFailure`] carrying the raw text.
pub fn parse(raw: &str) -> Result<Envelope, ParseFailure> {
    let failure = |error: serde_json::Error| ParseFailure {
        raw: raw.to_string(),
        error: error.to_string(),
    };

    let value: serde_json::Value = serde_json::from_str(raw).map_err(failure)?;

    if let Some(payload) = value.get("output") {
        if let Some(message) = error_text(payload) {
            return Ok(Envelope::QueryFailed(QueryFailure {
                message,
                payload: payload.clone(),
                envelope: value,
            }));
        }
    }

    let envelope: ResultEnvelope = serde_json::from_value(value).map_err(failure)?;
    Ok(Envelope::Results(envelope))
}

fn error_text(output: &serde_json::Value) -> Option<String> {
    match output.as_object()?.get("error")? {
        serde_json::Value::Null | serde_json::Value::Bool(false) => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::Number(n) if n.as_f64() == Some(0.0) => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
