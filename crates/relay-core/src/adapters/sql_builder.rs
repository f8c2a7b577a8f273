//! Shared SQL sanitization and WHERE-clause construction
//!
//! Every SQL-backed adapter variant goes through this module: identifiers
//! are allow-listed against the introspected schema before interpolation,
//! and values are always bound as positional parameters.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::record_key_string;

use super::filter::{Filter, FilterOp};
use super::TableSchema;

/// Quote an identifier that has already passed the allow-list.
///
/// Embedded quotes are doubled so a hostile identifier cannot terminate the
/// quoting even if it somehow reaches this point.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Reject identifiers that are not columns of the introspected schema
pub fn ensure_known_column(schema: &TableSchema, name: &str) -> Result<()> {
    if schema.column(name).is_some() {
        Ok(())
    } else {
        Err(Error::SchemaMismatch(format!("Unknown column: {name}")))
    }
}

/// Build ` WHERE ...` and its bound parameters from conjunctive filters.
///
/// Returns an empty clause for an empty filter list. Filter fields must be
/// columns of `schema`; values become `libsql` parameters, never SQL text.
pub fn build_where(
    filters: &[Filter],
    schema: &TableSchema,
) -> Result<(String, Vec<libsql::Value>)> {
    if filters.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut conditions = Vec::with_capacity(filters.len());
    let mut params = Vec::with_capacity(filters.len());

    for filter in filters {
        ensure_known_column(schema, &filter.field)?;
        let column = quote_ident(&filter.field);
        match filter.op {
            FilterOp::Eq => {
                conditions.push(format!("{column} = ?"));
                params.push(to_sql_value(&filter.value));
            }
            FilterOp::Ne => {
                conditions.push(format!("{column} != ?"));
                params.push(to_sql_value(&filter.value));
            }
            FilterOp::Gt => {
                conditions.push(format!("{column} > ?"));
                params.push(to_sql_value(&filter.value));
            }
            FilterOp::Lt => {
                conditions.push(format!("{column} < ?"));
                params.push(to_sql_value(&filter.value));
            }
            FilterOp::Contains => {
                let needle = record_key_string(&filter.value);
                if needle.is_empty() {
                    // An empty needle matches nothing in-process; mirror that.
                    conditions.push("1 = 0".to_string());
                } else {
                    conditions.push(format!("CAST({column} AS TEXT) LIKE ? ESCAPE '\\'"));
                    params.push(libsql::Value::Text(format!("%{}%", like_escape(&needle))));
                }
            }
        }
    }

    Ok((format!(" WHERE {}", conditions.join(" AND ")), params))
}

/// Convert a JSON value into a bindable `libsql` parameter
#[must_use]
pub fn to_sql_value(value: &Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(b) => libsql::Value::Integer(i64::from(*b)),
        Value::Number(n) => n.as_i64().map_or_else(
            || libsql::Value::Real(n.as_f64().unwrap_or(0.0)),
            libsql::Value::Integer,
        ),
        Value::String(s) => libsql::Value::Text(s.clone()),
        structured => libsql::Value::Text(structured.to_string()),
    }
}

/// Convert a column value read from `libsql` back into JSON
#[must_use]
pub fn from_sql_value(value: libsql::Value) -> Value {
    match value {
        libsql::Value::Null => Value::Null,
        libsql::Value::Integer(i) => Value::Number(i.into()),
        libsql::Value::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        libsql::Value::Text(s) => Value::String(s),
        libsql::Value::Blob(_) => Value::Null,
    }
}

/// Escape `LIKE` metacharacters so the needle matches literally under
/// `ESCAPE '\'`
fn like_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ColumnInfo;
    use serde_json::json;

    fn schema(columns: &[&str]) -> TableSchema {
        TableSchema {
            columns: columns
                .iter()
                .map(|name| ColumnInfo {
                    name: (*name).to_string(),
                    col_type: "text".to_string(),
                    nullable: true,
                    is_primary_key: false,
                })
                .collect(),
        }
    }

    #[test]
    fn quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("price"), "\"price\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn build_where_binds_values_as_params() {
        let schema = schema(&["status", "price"]);
        let filters = vec![
            Filter::new("status", FilterOp::Eq, json!("live")),
            Filter::new("price", FilterOp::Gt, json!(10)),
        ];
        let (clause, params) = build_where(&filters, &schema).unwrap();
        assert_eq!(clause, " WHERE \"status\" = ? AND \"price\" > ?");
        assert_eq!(params.len(), 2);
        assert!(matches!(&params[0], libsql::Value::Text(s) if s == "live"));
        assert!(matches!(params[1], libsql::Value::Integer(10)));
    }

    #[test]
    fn build_where_rejects_unknown_columns() {
        let schema = schema(&["id"]);
        let filters = vec![Filter::new(
            "id; DROP TABLE x",
            FilterOp::Eq,
            json!(1),
        )];
        assert!(matches!(
            build_where(&filters, &schema),
            Err(Error::SchemaMismatch(_))
        ));
    }

    #[test]
    fn contains_escapes_like_metacharacters() {
        let schema = schema(&["title"]);
        let filters = vec![Filter::new("title", FilterOp::Contains, json!("10% off"))];
        let (clause, params) = build_where(&filters, &schema).unwrap();
        assert!(clause.contains("LIKE ? ESCAPE '\\'"));
        assert!(matches!(&params[0], libsql::Value::Text(s) if s == "%10\\% off%"));

        let filters = vec![Filter::new("title", FilterOp::Contains, json!("a_b\\c"))];
        let (_, params) = build_where(&filters, &schema).unwrap();
        assert!(matches!(&params[0], libsql::Value::Text(s) if s == "%a\\_b\\\\c%"));
    }

    #[test]
    fn contains_on_an_empty_needle_matches_nothing() {
        let schema = schema(&["title"]);
        let filters = vec![Filter::new("title", FilterOp::Contains, json!(""))];
        let (clause, params) = build_where(&filters, &schema).unwrap();
        assert_eq!(clause, " WHERE 1 = 0");
        assert!(params.is_empty());
    }

    #[test]
    fn empty_filter_list_builds_no_clause() {
        let (clause, params) = build_where(&[], &schema(&["id"])).unwrap();
        assert!(clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn sql_value_round_trip() {
        assert_eq!(from_sql_value(to_sql_value(&json!(42))), json!(42));
        assert_eq!(from_sql_value(to_sql_value(&json!(1.5))), json!(1.5));
        assert_eq!(from_sql_value(to_sql_value(&json!("x"))), json!("x"));
        assert_eq!(from_sql_value(to_sql_value(&Value::Null)), Value::Null);
        // Booleans are stored as integers, the SQLite convention.
        assert_eq!(from_sql_value(to_sql_value(&json!(true))), json!(1));
    }
}
