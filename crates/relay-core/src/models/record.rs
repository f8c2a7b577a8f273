//! Record representation shared by adapters, mapping, and conflict detection

use serde_json::Value;

/// A single row/resource as seen by an adapter: column name to JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Canonical string form of a key value, used in state-store keys.
///
/// Numbers render without a trailing `.0` so that an integer key read back
/// as a float still lands on the same state-store entry.
#[must_use]
pub fn record_key_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 9e15 => format!("{}", f as i64),
                    _ => n.to_string(),
                }
            }
        }
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Compare two field values for sync purposes.
///
/// Null and empty string are treated as equal (stores disagree on how they
/// round-trip missing text), numbers compare numerically across integer and
/// float representations, and everything else falls back to string equality.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_f64(), y.as_f64()) {
                (Some(fx), Some(fy)) => (fx - fy).abs() < f64::EPSILON,
                _ => x == y,
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        // Mixed scalar types: compare canonical string forms, so that a
        // numeric column read back as text still matches.
        (x, y) if x.is_array() || x.is_object() || y.is_array() || y.is_object() => x == y,
        (x, y) => record_key_string(x) == record_key_string(y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_equals_empty_string() {
        assert!(values_equal(&Value::Null, &json!("")));
        assert!(values_equal(&json!(""), &Value::Null));
        assert!(!values_equal(&Value::Null, &json!("x")));
    }

    #[test]
    fn numbers_compare_across_representations() {
        assert!(values_equal(&json!(10), &json!(10.0)));
        assert!(values_equal(&json!(1.5), &json!(1.5)));
        assert!(!values_equal(&json!(10), &json!(11)));
    }

    #[test]
    fn number_matches_its_text_form() {
        assert!(values_equal(&json!(42), &json!("42")));
        assert!(!values_equal(&json!(42), &json!("43")));
    }

    #[test]
    fn structured_values_compare_strictly() {
        assert!(values_equal(&json!([1, 2]), &json!([1, 2])));
        assert!(!values_equal(&json!([1, 2]), &json!([2, 1])));
        assert!(!values_equal(&json!({"a": 1}), &json!("{\"a\":1}")));
    }

    #[test]
    fn key_string_drops_float_suffix_for_integers() {
        assert_eq!(record_key_string(&json!(7)), "7");
        assert_eq!(record_key_string(&json!("abc")), "abc");
        assert_eq!(record_key_string(&Value::Null), "");
    }
}
