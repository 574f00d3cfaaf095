//! Compensation records and their stored string form
//!
//! A record is stored as `{"action": "...", "parameters": [...]}`. In
//! multiple mode a hash field holds a JSON array of such objects, in append
//! order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pending compensating action and the positional arguments to call it with
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompensationRecord {
    /// Name of the registered compensating action
    pub action: Box<str>,
    /// Positional arguments, in call order
    #[serde(default)]
    pub parameters: Vec<Value>,
}

impl CompensationRecord {
    /// Create a record with explicit parameters
    pub fn new(action: impl Into<Box<str>>, parameters: Vec<Value>) -> Self {
        Self {
            action: action.into(),
            parameters,
        }
    }

    /// Append one parameter converted from any serializable value
    pub fn with_param<T: Serialize>(mut self, param: T) -> Result<Self, serde_json::Error> {
        self.parameters.push(serde_json::to_value(param)?);
        Ok(self)
    }

    /// Serialize to the stored string form
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a single stored record
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Serialize an ordered list of records
pub fn encode_list(records: &[CompensationRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string(records)
}

/// Parse a stored list.
///
/// A field written by a single-record instance decodes as a one-element list.
pub fn decode_list(raw: &str) -> Result<Vec<CompensationRecord>, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    if value.is_array() {
        serde_json::from_value(value)
    } else {
        CompensationRecord::deserialize(value).map(|record| vec![record])
    }
}

/// Append `record` to the stored list `existing` (absent means empty) and
/// return the new stored form.
///
/// Fails only when `existing` is not a stored record list.
pub fn append_encoded(
    existing: Option<&str>,
    record: &CompensationRecord,
) -> Result<String, serde_json::Error> {
    let mut records = match existing {
        Some(raw) => decode_list(raw)?,
        None => Vec::new(),
    };
    records.push(record.clone());
    encode_list(&records)
}
