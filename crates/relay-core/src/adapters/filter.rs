//! Read filters shared by all adapter variants

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::models::{record_key_string, values_equal, Record};

/// Comparison operator for a read filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Equal
    #[serde(rename = "==")]
    Eq,
    /// Not equal
    #[serde(rename = "!=")]
    Ne,
    /// Greater than (numeric or lexical)
    #[serde(rename = ">")]
    Gt,
    /// Less than (numeric or lexical)
    #[serde(rename = "<")]
    Lt,
    /// Case-insensitive substring match
    #[serde(rename = "contains")]
    Contains,
}

impl FilterOp {
    /// Wire form of this operator
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Contains => "contains",
        }
    }
}

impl FromStr for FilterOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            "contains" => Ok(Self::Contains),
            other => Err(Error::InvalidInput(format!("Unknown operator: {other}"))),
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conjunctive read condition: `field <op> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Column/field the condition applies to
    pub field: String,
    /// Comparison operator
    #[serde(rename = "operator")]
    pub op: FilterOp,
    /// Comparison value
    pub value: Value,
}

impl Filter {
    /// Build a filter condition
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate this condition against a record in-process.
    ///
    /// This is the reference semantics: adapters that push filters down must
    /// return exactly the records this function accepts.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let field_value = record.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => values_equal(field_value, &self.value),
            FilterOp::Ne => !values_equal(field_value, &self.value),
            FilterOp::Gt => compare(field_value, &self.value).is_some_and(|o| o.is_gt()),
            FilterOp::Lt => compare(field_value, &self.value).is_some_and(|o| o.is_lt()),
            FilterOp::Contains => {
                let haystack = record_key_string(field_value).to_lowercase();
                let needle = record_key_string(&self.value).to_lowercase();
                !needle.is_empty() && haystack.contains(&needle)
            }
        }
    }
}

/// Conjunction of all filters; an empty list accepts everything
#[must_use]
pub fn matches_all(record: &Record, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| filter.matches(record))
}

/// Apply filters in-process, the fallback for stores without push-down
#[must_use]
pub fn apply_in_process(records: Vec<Record>, filters: &[Filter]) -> Vec<Record> {
    if filters.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|record| matches_all(record, filters))
        .collect()
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn eq_uses_sync_equality() {
        let rec = record(&[("price", json!(10))]);
        assert!(Filter::new("price", FilterOp::Eq, json!(10.0)).matches(&rec));
        assert!(!Filter::new("price", FilterOp::Eq, json!(11)).matches(&rec));
    }

    #[test]
    fn ne_is_the_complement_of_eq() {
        let rec = record(&[("status", json!("draft"))]);
        assert!(Filter::new("status", FilterOp::Ne, json!("published")).matches(&rec));
        assert!(!Filter::new("status", FilterOp::Ne, json!("draft")).matches(&rec));
    }

    #[test]
    fn ordering_compares_numbers_numerically() {
        let rec = record(&[("price", json!(20))]);
        assert!(Filter::new("price", FilterOp::Gt, json!(10)).matches(&rec));
        assert!(Filter::new("price", FilterOp::Lt, json!(30)).matches(&rec));
        assert!(!Filter::new("price", FilterOp::Gt, json!(20)).matches(&rec));
    }

    #[test]
    fn ordering_on_mixed_types_rejects() {
        let rec = record(&[("price", json!("twenty"))]);
        assert!(!Filter::new("price", FilterOp::Gt, json!(10)).matches(&rec));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let rec = record(&[("title", json!("Hello World"))]);
        assert!(Filter::new("title", FilterOp::Contains, json!("world")).matches(&rec));
        assert!(!Filter::new("title", FilterOp::Contains, json!("mars")).matches(&rec));
    }

    #[test]
    fn missing_field_only_matches_null_semantics() {
        let rec = record(&[("id", json!(1))]);
        assert!(Filter::new("note", FilterOp::Eq, json!("")).matches(&rec));
        assert!(!Filter::new("note", FilterOp::Contains, json!("x")).matches(&rec));
    }

    #[test]
    fn apply_in_process_is_conjunctive() {
        let records = vec![
            record(&[("id", json!(1)), ("price", json!(10))]),
            record(&[("id", json!(2)), ("price", json!(20))]),
            record(&[("id", json!(3)), ("price", json!(30))]),
        ];
        let filters = vec![
            Filter::new("price", FilterOp::Gt, json!(10)),
            Filter::new("price", FilterOp::Lt, json!(30)),
        ];
        let kept = apply_in_process(records, &filters);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].get("id"), Some(&json!(2)));
    }

    #[test]
    fn filter_serde_uses_wire_operator_names() {
        let filter: Filter =
            serde_json::from_str(r#"{"field":"status","operator":"==","value":"live"}"#).unwrap();
        assert_eq!(filter.op, FilterOp::Eq);
        let round = serde_json::to_string(&filter).unwrap();
        assert!(round.contains(r#""operator":"==""#));
    }
}
