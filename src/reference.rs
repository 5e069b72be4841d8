//! Reference-safety helpers.
//!
//! Some stores hand back the same value they were handed, so callers could
//! mutate cached state through a returned reference. The loader breaks
//! that sharing for non-scalar values whenever the store does not declare
//! dereferencing support and the definition does not assert simple data.
//!
//! Shallow graphs are unshared with a structural deep clone; graphs deeper
//! than [`MAX_PLAIN_DEPTH`] levels take the serialize/deserialize route
//! through a canonical byte form instead.

use serde_json::Value;

/// Nesting depth beyond which unsharing goes through bytes.
pub const MAX_PLAIN_DEPTH: usize = 5;

/// Whether a value is a scalar (null, boolean, number, or string).
pub fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Nesting depth of a value graph. Scalars are depth zero; each array or
/// object level adds one.
pub fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Returns a copy sharing no mutable state with the input.
///
/// Chooses deep clone for shallow graphs and a serde round trip for deep
/// ones; if the round trip fails the clone is used instead, which upholds
/// the contract either way.
pub fn unshare(value: &Value) -> Value {
    if depth(value) > MAX_PLAIN_DEPTH {
        serde_json::to_vec(value)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_else(|| value.clone())
    } else {
        value.clone()
    }
}
