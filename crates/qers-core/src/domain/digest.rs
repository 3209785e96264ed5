//! Canonical JSON and SHA-256 digests.
//!
//! Object keys are sorted recursively and integer-valued floats are written as
//! integers, so two configurations that deserialize to the same values hash
//! the same regardless of field order or `100` vs `100.0`.

use sha2::{Digest, Sha256};

use crate::domain::error::{GapError, Result};

fn canonicalize(value: &serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key])?);
            }
            Ok(serde_json::Value::Object(sorted))
        }
        serde_json::Value::Array(arr) => Ok(serde_json::Value::Array(
            arr.iter().map(canonicalize).collect::<Result<Vec<_>>>()?,
        )),
        serde_json::Value::Number(n) if !(n.is_i64() || n.is_u64()) => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(GapError::BatchConfig(
                    "non-finite number in canonical JSON".to_string(),
                ));
            }
            if f.fract() == 0.0 && f.abs() < 9.0e15 {
                Ok(serde_json::Value::from(f as i64))
            } else {
                Ok(serde_json::Value::Number(n.clone()))
            }
        }
        other => Ok(other.clone()),
    }
}

/// Canonical JSON text of a value.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    Ok(serde_json::to_string(&canonicalize(value)?)?)
}

/// Lowercase hex SHA-256 of the canonical JSON of `value`.
pub fn compute_digest(value: &serde_json::Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}
