//! Text columns for fieldless enums, using their serde names.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Column text for a fieldless enum variant. Empty when the value does not
/// serialize to a bare string.
pub fn to_column<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(name)) => name,
        _ => String::new(),
    }
}

/// Inverse of [`to_column`]; `None` for text no variant answers to.
pub fn from_column<T: DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_value(Value::String(text.to_owned())).ok()
}
