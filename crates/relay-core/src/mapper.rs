//! Field mapper - turns a master record into a slave candidate
//!
//! Mappings compile once per job; mapping a record is then a pure function
//! of the compiled mapper and the record. Pass-through mappings copy the
//! master column's value under the slave column name; expression mappings
//! evaluate against the full master record.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::expr::Expression;
use crate::models::{values_equal, FieldMapping, Record};

/// Compiled form of one mapping
struct CompiledMapping {
    mapping: FieldMapping,
    expression: Option<Expression>,
}

/// Compiled mapping set for one sync config
pub struct FieldMapper {
    mappings: Vec<CompiledMapping>,
    key_index: usize,
}

impl FieldMapper {
    /// Compile the mapping list.
    ///
    /// Fails when a mapping expression does not parse or when no mapping is
    /// flagged as the key, so misconfiguration surfaces before any record
    /// is read.
    pub fn compile(mappings: &[FieldMapping]) -> Result<Self> {
        let key_index = mappings
            .iter()
            .position(|mapping| mapping.is_key)
            .ok_or_else(|| {
                Error::InvalidInput("No field mapping is flagged is_key".to_string())
            })?;

        let compiled = mappings
            .iter()
            .map(|mapping| {
                let expression = mapping
                    .effective_expression()
                    .map(Expression::compile)
                    .transpose()
                    .map_err(|e| {
                        Error::Evaluation(format!(
                            "Mapping '{}': {e}",
                            mapping.master_column
                        ))
                    })?;
                Ok(CompiledMapping {
                    mapping: mapping.clone(),
                    expression,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            mappings: compiled,
            key_index,
        })
    }

    /// The key mapping's master column
    #[must_use]
    pub fn master_key_column(&self) -> &str {
        &self.mappings[self.key_index].mapping.master_column
    }

    /// The key mapping's slave column
    #[must_use]
    pub fn slave_key_column(&self) -> &str {
        &self.mappings[self.key_index].mapping.slave_column
    }

    /// The record's key value on the master side
    pub fn key_value<'a>(&self, master: &'a Record) -> Result<&'a Value> {
        master.get(self.master_key_column()).ok_or_else(|| {
            Error::UnresolvedReference(format!(
                "Record has no key column '{}'",
                self.master_key_column()
            ))
        })
    }

    /// Map one master record to a slave candidate keyed by slave columns
    pub fn map_record(&self, master: &Record) -> Result<Record> {
        let mut candidate = Record::new();
        for compiled in &self.mappings {
            let value = match &compiled.expression {
                Some(expression) => expression.evaluate(master)?,
                None => master
                    .get(&compiled.mapping.master_column)
                    .cloned()
                    .unwrap_or(Value::Null),
            };
            candidate.insert(compiled.mapping.slave_column.clone(), value);
        }
        Ok(candidate)
    }

    /// Master-side names of non-key fields where the mapped candidate and
    /// the current slave record disagree
    #[must_use]
    pub fn conflicting_fields(&self, candidate: &Record, slave: &Record) -> Vec<String> {
        self.mappings
            .iter()
            .filter(|compiled| !compiled.mapping.is_key)
            .filter(|compiled| {
                let mapped = candidate
                    .get(&compiled.mapping.slave_column)
                    .unwrap_or(&Value::Null);
                let current = slave
                    .get(&compiled.mapping.slave_column)
                    .unwrap_or(&Value::Null);
                !values_equal(mapped, current)
            })
            .map(|compiled| compiled.mapping.master_column.clone())
            .collect()
    }

    /// Slave columns this mapper writes
    #[must_use]
    pub fn slave_columns(&self) -> Vec<String> {
        self.mappings
            .iter()
            .map(|compiled| compiled.mapping.slave_column.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn mapper() -> FieldMapper {
        FieldMapper::compile(&[
            FieldMapping::passthrough("id").key(),
            FieldMapping {
                master_column: "price".to_string(),
                slave_column: "unit_price".to_string(),
                expression: Some("{{ master.price * 1.1 }}".to_string()),
                is_key: false,
            },
            FieldMapping::passthrough("name"),
        ])
        .unwrap()
    }

    #[test]
    fn compile_requires_a_key_mapping() {
        assert!(FieldMapper::compile(&[FieldMapping::passthrough("id")]).is_err());
    }

    #[test]
    fn compile_rejects_bad_expressions() {
        let mappings = vec![FieldMapping::passthrough("id")
            .key()
            .with_expression("{{ broken")];
        assert!(matches!(
            FieldMapper::compile(&mappings),
            Err(Error::Evaluation(_))
        ));
    }

    #[test]
    fn map_record_applies_expressions_and_renames() {
        let mapper = mapper();
        let master = record(&[
            ("id", json!(1)),
            ("price", json!(10)),
            ("name", json!("widget")),
            ("ignored", json!("x")),
        ]);
        let candidate = mapper.map_record(&master).unwrap();
        assert_eq!(candidate.get("id"), Some(&json!(1)));
        assert!((candidate.get("unit_price").unwrap().as_f64().unwrap() - 11.0).abs() < 1e-9);
        assert_eq!(candidate.get("name"), Some(&json!("widget")));
        assert_eq!(candidate.len(), 3);
    }

    #[test]
    fn passthrough_copies_any_value_shape() {
        let mapper = FieldMapper::compile(&[
            FieldMapping::passthrough("id").key(),
            FieldMapping::passthrough("meta"),
        ])
        .unwrap();
        let master = record(&[("id", json!(1)), ("meta", json!({"tags": [1, 2]}))]);
        let candidate = mapper.map_record(&master).unwrap();
        assert_eq!(candidate.get("meta"), Some(&json!({"tags": [1, 2]})));
    }

    #[test]
    fn missing_passthrough_field_maps_to_null() {
        let mapper = FieldMapper::compile(&[
            FieldMapping::passthrough("id").key(),
            FieldMapping::passthrough("note"),
        ])
        .unwrap();
        let candidate = mapper.map_record(&record(&[("id", json!(1))])).unwrap();
        assert_eq!(candidate.get("note"), Some(&Value::Null));
    }

    #[test]
    fn conflicting_fields_reports_master_names() {
        let mapper = mapper();
        let master = record(&[
            ("id", json!(1)),
            ("price", json!(10)),
            ("name", json!("widget")),
        ]);
        let candidate = mapper.map_record(&master).unwrap();

        let slave = record(&[
            ("id", json!(1)),
            ("unit_price", json!(99.0)),
            ("name", json!("widget")),
        ]);
        assert_eq!(mapper.conflicting_fields(&candidate, &slave), vec!["price"]);

        let matching = record(&[
            ("id", json!(1)),
            ("unit_price", json!(11.0)),
            ("name", json!("widget")),
        ]);
        assert!(mapper.conflicting_fields(&candidate, &matching).is_empty());
    }

    #[test]
    fn key_columns_come_from_the_key_mapping() {
        let mapper = mapper();
        assert_eq!(mapper.master_key_column(), "id");
        assert_eq!(mapper.slave_key_column(), "id");
        let master = record(&[("id", json!(7))]);
        assert_eq!(mapper.key_value(&master).unwrap(), &json!(7));
        assert!(mapper.key_value(&Record::new()).is_err());
    }
}
