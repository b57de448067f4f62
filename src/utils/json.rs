use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

/// A single key of a JSON patch body: absent, explicitly `null`, or a value.
#[derive(Debug, PartialEq)]
pub enum NullableValue<T> {
    Omitted,
    Null,
    Value(T),
}

pub fn classify_nullable<T: DeserializeOwned>(
    optional_value: Option<&Value>,
) -> Result<NullableValue<T>, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(other) => serde_json::from_value(other.clone())
            .map(NullableValue::Value)
            .map_err(|err| format!("invalid value {other}: {err}")),
    }
}

/// Reads a patch key that may be cleared with `null`.
pub fn patch_nullable<T: DeserializeOwned>(
    patch: &Map<String, Value>,
    field: &str,
) -> AppResult<NullableValue<T>> {
    classify_nullable(patch.get(field)).map_err(|err| AppError::invalid_field(field, err))
}

/// Reads a patch key that cannot be cleared.
pub fn patch_required<T: DeserializeOwned>(
    patch: &Map<String, Value>,
    field: &str,
) -> AppResult<Option<T>> {
    match patch_nullable(patch, field)? {
        NullableValue::Omitted => Ok(None),
        NullableValue::Null => Err(AppError::invalid_field(field, "must not be null")),
        NullableValue::Value(value) => Ok(Some(value)),
    }
}

/// Trims a string and maps the empty result to `None`.
pub fn non_empty_trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
