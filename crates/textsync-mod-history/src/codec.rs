/// Wire codec for `HistoryState` and the transport sanitizer contract.
///
/// Remote payloads pass through a `TransportSanitizer` before typed
/// decoding, so transports that blur numbers, strings, and booleans cannot
/// corrupt the checksum-relevant integer fields. Decoding never touches live
/// state: it produces a fully validated value or an error.
use serde_json::{Map, Number, Value};

use crate::entry::HistoryState;
use crate::error::{HistoryError, Result};

/// Fields that must arrive as integers.
const INTEGER_FIELDS: [&str; 4] = ["version", "currentIndex", "timestampMs", "sequenceNumber"];

/// Normalizes values before and after transport.
pub trait TransportSanitizer: Send + Sync {
    fn sanitize(&self, value: Value) -> Value;
}

/// Reference sanitizer for JSON transports.
///
/// Coerces the integer fields from strings, floats, and booleans, and
/// recurses through arrays and objects. Anything it cannot coerce is left
/// as-is for typed decoding to reject.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoercingSanitizer;

impl TransportSanitizer for CoercingSanitizer {
    fn sanitize(&self, value: Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.sanitize(v)).collect()),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    let value = if INTEGER_FIELDS.contains(&key.as_str()) {
                        coerce_integer(value)
                    } else {
                        self.sanitize(value)
                    };
                    out.insert(key, value);
                }
                Value::Object(out)
            }
            other => other,
        }
    }
}

fn coerce_integer(value: Value) -> Value {
    let coerced = match &value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => number_to_i64(n),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_i64))
                .or(match s {
                    "true" => Some(1),
                    "false" => Some(0),
                    _ => None,
                })
        }
        _ => None,
    };
    coerced.map_or(value, |n| Value::Number(Number::from(n)))
}

fn number_to_i64(n: &Number) -> Option<i64> {
    n.as_i64()
        .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
        .or_else(|| n.as_f64().and_then(float_to_i64))
}

fn float_to_i64(f: f64) -> Option<i64> {
    if f.is_finite() && f.abs() < i64::MAX as f64 {
        Some(f.round() as i64)
    } else {
        None
    }
}

/// Serializes a state using the normative wire field names.
pub fn encode_state(state: &HistoryState) -> serde_json::Result<String> {
    serde_json::to_string(state)
}

/// Decodes a JSON payload into a validated `HistoryState`.
///
/// # Errors
///
/// Returns `InvalidStatePayload` if the text is not JSON, does not match
/// the schema after sanitizing, or has an out-of-range `currentIndex`.
pub fn decode_state(payload: &str, sanitizer: &dyn TransportSanitizer) -> Result<HistoryState> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| HistoryError::InvalidStatePayload(format!("not valid JSON: {e}")))?;
    decode_state_value(value, sanitizer)
}

/// Decodes an already-parsed value into a validated `HistoryState`.
///
/// # Errors
///
/// See [`decode_state`].
pub fn decode_state_value(value: Value, sanitizer: &dyn TransportSanitizer) -> Result<HistoryState> {
    let sanitized = sanitizer.sanitize(value);
    let state: HistoryState = serde_json::from_value(sanitized)
        .map_err(|e| HistoryError::InvalidStatePayload(e.to_string()))?;
    check_shape(&state)?;
    Ok(state)
}

/// Structural invariants a decoded state must satisfy.
pub(crate) fn check_shape(state: &HistoryState) -> Result<()> {
    let len = state.entries.len() as i64;
    let index_ok = if len == 0 {
        state.current_index == -1 || state.current_index == 0
    } else {
        (0..len).contains(&state.current_index)
    };
    if !index_ok {
        return Err(HistoryError::InvalidStatePayload(format!(
            "currentIndex {} out of range for {} entries",
            state.current_index, len
        )));
    }
    if state.version < 0 {
        return Err(HistoryError::InvalidStatePayload(format!(
            "negative version {}",
            state.version
        )));
    }
    Ok(())
}
