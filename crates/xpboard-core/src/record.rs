//! Record model
//!
//! A record is one transaction or progress entry: an opaque mapping of field
//! name to JSON value. The query engine only looks at the fields a filter or
//! order clause names.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One transaction/progress entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Build a record from a JSON value.
    ///
    /// Returns `None` if the value is not an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String value of a field, if present and a string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Numeric value of a field, if present and a number
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}
