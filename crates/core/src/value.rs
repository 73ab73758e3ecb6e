#![forbid(unsafe_code)]

//! Type-aware value comparison for the upsert engine's change detection.
//!
//! Sources disagree on scalar representation (`"5"` vs `5`, `5.0` vs `5`),
//! and a representation change alone must not count as a data change. The
//! same canonical form feeds the natural-key JSON so both spellings address
//! one row.

use serde_json::Value;

/// Canonicalizes a scalar for comparison and key building. Strings that are
/// exactly a number become that number; whole floats collapse to integers;
/// everything else is untouched.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return value.clone();
            }
            if let Ok(int) = trimmed.parse::<i64>() {
                return Value::from(int);
            }
            if let Ok(float) = trimmed.parse::<f64>() {
                if float.is_finite() {
                    return normalize_number(float, value);
                }
            }
            value.clone()
        }
        Value::Number(number) => {
            if number.is_i64() || number.is_u64() {
                return value.clone();
            }
            match number.as_f64() {
                Some(float) if float.is_finite() => normalize_number(float, value),
                _ => value.clone(),
            }
        }
        _ => value.clone(),
    }
}

fn normalize_number(float: f64, fallback: &Value) -> Value {
    if float.fract() == 0.0 && float >= i64::MIN as f64 && float <= i64::MAX as f64 {
        return Value::from(float as i64);
    }
    serde_json::Number::from_f64(float)
        .map(Value::Number)
        .unwrap_or_else(|| fallback.clone())
}

/// Equality after normalization; `Null` is comparable and equal to itself.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        _ => a == b,
    }
}

fn numbers_equal(x: &serde_json::Number, y: &serde_json::Number) -> bool {
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        return x == y;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
