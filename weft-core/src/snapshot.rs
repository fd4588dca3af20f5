//! State Snapshots
//!
//! Converts reactive state to and from plain data, for handing server-side
//! state to a client or persisting it. Snapshots read untracked, so taking
//! one inside a watcher does not subscribe it to the whole tree.
//!
//! Numbers with no fractional part are written as integers. `NaN` and the
//! infinities have no JSON form and are written as `null`. Cyclic graphs
//! cannot be represented and are rejected.

use std::collections::HashSet;

use serde_json::{Map, Number};

use crate::error::ReactiveError;
use crate::reactive::{Array, Object, Value};

/// Convert a value to a `serde_json::Value`.
pub fn to_json_value(value: &Value) -> Result<serde_json::Value, ReactiveError> {
    let mut path = HashSet::new();
    convert(value, &mut path)
}

fn convert(value: &Value, path: &mut HashSet<usize>) -> Result<serde_json::Value, ReactiveError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => number(*n),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Object(object) => {
            if !path.insert(object.addr()) {
                return Err(ReactiveError::Cycle);
            }
            let mut map = Map::new();
            for (key, property) in object.properties() {
                map.insert(key, convert(&property.peek(), path)?);
            }
            path.remove(&object.addr());
            serde_json::Value::Object(map)
        }
        Value::Array(array) => {
            if !path.insert(array.addr()) {
                return Err(ReactiveError::Cycle);
            }
            let items = array
                .peek_all()
                .iter()
                .map(|item| convert(item, path))
                .collect::<Result<Vec<_>, _>>()?;
            path.remove(&array.addr());
            serde_json::Value::Array(items)
        }
    })
}

fn number(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return serde_json::Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect::<Array>())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect::<Object>())
            }
        }
    }
}

/// Serialize a value as JSON text.
pub fn to_json(value: &Value) -> Result<String, ReactiveError> {
    Ok(serde_json::to_string(&to_json_value(value)?)?)
}

/// Parse JSON text into plain (unobserved) state.
pub fn from_json(json: &str) -> Result<Value, ReactiveError> {
    let parsed: serde_json::Value = serde_json::from_str(json)?;
    Ok(parsed.into())
}

/// Serialize a value as MessagePack.
pub fn to_msgpack(value: &Value) -> Result<Vec<u8>, ReactiveError> {
    Ok(rmp_serde::to_vec(&to_json_value(value)?)?)
}

/// Decode MessagePack into plain (unobserved) state.
pub fn from_msgpack(bytes: &[u8]) -> Result<Value, ReactiveError> {
    let parsed: serde_json::Value = rmp_serde::from_slice(bytes)?;
    Ok(parsed.into())
}
