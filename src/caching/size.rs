use serde::Serialize;
use serde_json::Value;
use tracing::debug;

const PRIMITIVE_BYTES: usize = 8;

/// Minimum call count before an operation is considered for caching
pub const CACHE_MIN_CALLS: usize = 10;
/// Minimum average duration (ms) before an operation is considered for caching
pub const CACHE_MIN_AVG_MS: f64 = 50.0;

/// Rough in-memory footprint of a value, used for reporting only.
///
/// Strings and object keys count two bytes per UTF-16 code unit, other primitives
/// eight bytes. Values that cannot be represented as JSON count as zero.
pub fn estimate_size<V: Serialize>(value: &V) -> usize {
    match serde_json::to_value(value) {
        Ok(json) => json_size(&json),
        Err(e) => {
            debug!("Size estimation skipped: {}", e);
            0
        }
    }
}

fn json_size(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Bool(_) | Value::Number(_) => PRIMITIVE_BYTES,
        Value::String(s) => utf16_bytes(s),
        Value::Array(items) => items.iter().map(json_size).sum(),
        Value::Object(map) => map.iter().map(|(k, v)| utf16_bytes(k) + json_size(v)).sum(),
    }
}

fn utf16_bytes(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

/// Whether an operation with this profile would benefit from caching its results
pub fn should_cache(avg_ms: f64, calls: usize) -> bool {
    calls >= CACHE_MIN_CALLS && avg_ms >= CACHE_MIN_AVG_MS
}
