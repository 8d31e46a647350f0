//! Shape-checked traversal of untyped JSON payloads.
//!
//! Server payloads are loosely structured: a field documented as an array may
//! be missing, `null`, or an object. These helpers take an
//! `Option<&Value>` and only ever iterate a real array, so call sites never
//! need to pre-validate the shape.

use serde_json::Value;

/// Returns the first array element matching `pred`, or `None` when the value is
/// missing, not an array, or has no match.
pub fn safe_find<'a, P>(value: Option<&'a Value>, mut pred: P) -> Option<&'a Value>
where
    P: FnMut(&Value) -> bool,
{
    value?.as_array()?.iter().find(|item| pred(item))
}

/// Returns every array element matching `pred`. Non-arrays yield an empty vec.
pub fn safe_filter<'a, P>(value: Option<&'a Value>, mut pred: P) -> Vec<&'a Value>
where
    P: FnMut(&Value) -> bool,
{
    match value.and_then(Value::as_array) {
        Some(items) => items.iter().filter(|item| pred(item)).collect(),
        None => Vec::new(),
    }
}

/// Maps every array element through `f`, keeping the `Some` results.
/// Non-arrays yield an empty vec.
pub fn safe_map<'a, T, F>(value: Option<&'a Value>, f: F) -> Vec<T>
where
    F: FnMut(&'a Value) -> Option<T>,
{
    match value.and_then(Value::as_array) {
        Some(items) => items.iter().filter_map(f).collect(),
        None => Vec::new(),
    }
}

/// Reads `key` from an object as a string. Numbers are stringified so that
/// numeric ids compare equal to their string form.
pub fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
