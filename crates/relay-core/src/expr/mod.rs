//! Mapping expression evaluator
//!
//! An expression is literal text interleaved with `{{ ... }}` placeholders;
//! `@field` is shorthand for `{{ field }}`. Placeholder bodies support field
//! paths (optionally under the `master.` alias), numeric and string
//! literals, the four arithmetic operators and parentheses. Evaluation is a
//! pure function of the compiled expression and one record: no adapter,
//! network, or file access, and no state shared between evaluations.
//!
//! An expression that is a single placeholder yields the placeholder's
//! typed value; any surrounding literal text renders the whole result as a
//! string.

mod parse;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{record_key_string, Record};

use parse::{Ast, BinOp};

/// A compiled mapping expression, reusable across records
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(Ast),
}

impl Expression {
    /// Compile an expression string.
    ///
    /// Syntax errors inside a placeholder surface as `Evaluation` errors at
    /// compile time so a bad mapping is caught before any record flows
    /// through it.
    pub fn compile(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < source.len() {
            let rest = &source[i..];
            if rest.starts_with("{{") {
                let body = &rest[2..];
                let end = body.find("}}").ok_or_else(|| {
                    Error::Evaluation("Unclosed '{{' placeholder".to_string())
                })?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(parse::parse(&body[..end])?));
                i += 2 + end + 2;
            } else if rest.starts_with('@')
                && rest[1..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_alphabetic() || c == '_')
            {
                let field: String = rest[1..]
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                i += 1 + field.len();
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(Ast::Field(vec![field])));
            } else {
                let c = rest.chars().next().unwrap_or_default();
                literal.push(c);
                i += c.len_utf8();
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Evaluate against one record
    pub fn evaluate(&self, record: &Record) -> Result<Value> {
        match self.segments.as_slice() {
            [] => Ok(Value::String(String::new())),
            [Segment::Placeholder(ast)] => eval_ast(ast, record),
            segments => {
                let mut rendered = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => rendered.push_str(text),
                        Segment::Placeholder(ast) => {
                            rendered.push_str(&render(&eval_ast(ast, record)?));
                        }
                    }
                }
                Ok(Value::String(rendered))
            }
        }
    }
}

fn eval_ast(ast: &Ast, record: &Record) -> Result<Value> {
    match ast {
        Ast::Int(i) => Ok(Value::Number((*i).into())),
        Ast::Float(f) => Ok(float_value(*f)),
        Ast::Str(s) => Ok(Value::String(s.clone())),
        Ast::Field(path) => lookup(record, path),
        Ast::Neg(inner) => match eval_ast(inner, record)? {
            Value::Number(n) => n.as_i64().map_or_else(
                || Ok(float_value(-n.as_f64().unwrap_or(0.0))),
                |i| Ok(Value::Number((-i).into())),
            ),
            other => Err(Error::Evaluation(format!(
                "Cannot negate {}",
                type_name(&other)
            ))),
        },
        Ast::Bin(op, lhs, rhs) => {
            let left = eval_ast(lhs, record)?;
            let right = eval_ast(rhs, record)?;
            apply(*op, &left, &right)
        }
    }
}

fn apply(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    // String concatenation is the one non-numeric operation.
    if op == BinOp::Add {
        if let (Value::String(a), Value::String(b)) = (left, right) {
            return Ok(Value::String(format!("{a}{b}")));
        }
    }

    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(Error::Evaluation(format!(
            "Cannot apply '{}' to {} and {}",
            op_symbol(op),
            type_name(left),
            type_name(right)
        )));
    };

    // Integer arithmetic stays integral except for division.
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        match op {
            BinOp::Add => return Ok(Value::Number(x.wrapping_add(y).into())),
            BinOp::Sub => return Ok(Value::Number(x.wrapping_sub(y).into())),
            BinOp::Mul => return Ok(Value::Number(x.wrapping_mul(y).into())),
            BinOp::Div => {}
        }
    }

    let x = a.as_f64().unwrap_or(0.0);
    let y = b.as_f64().unwrap_or(0.0);
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(Error::Evaluation("Division by zero".to_string()));
            }
            x / y
        }
    };
    Ok(float_value(result))
}

fn lookup(record: &Record, path: &[String]) -> Result<Value> {
    let dotted = path.join(".");
    let mut current = record
        .get(path.first().map_or("", String::as_str))
        .ok_or_else(|| Error::UnresolvedReference(dotted.clone()))?;
    for segment in &path[1..] {
        current = current
            .get(segment)
            .ok_or_else(|| Error::UnresolvedReference(dotted.clone()))?;
    }
    Ok(current.clone())
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn render(value: &Value) -> String {
    record_key_string(value)
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

const fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
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

    #[test]
    fn single_placeholder_yields_typed_value() {
        let expr = Expression::compile("{{ master.price * 1.1 }}").unwrap();
        let rec = record(&[("price", json!(10))]);
        let out = expr.evaluate(&rec).unwrap();
        assert!((out.as_f64().unwrap() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn integer_arithmetic_stays_integral() {
        let expr = Expression::compile("{{ qty * 3 + 1 }}").unwrap();
        let rec = record(&[("qty", json!(4))]);
        assert_eq!(expr.evaluate(&rec).unwrap(), json!(13));
    }

    #[test]
    fn division_always_produces_a_float() {
        let expr = Expression::compile("{{ total / 4 }}").unwrap();
        let rec = record(&[("total", json!(10))]);
        assert_eq!(expr.evaluate(&rec).unwrap(), json!(2.5));
    }

    #[test]
    fn division_by_zero_is_an_evaluation_error() {
        let expr = Expression::compile("{{ price / 0 }}").unwrap();
        let rec = record(&[("price", json!(10))]);
        assert!(matches!(
            expr.evaluate(&rec),
            Err(Error::Evaluation(_))
        ));
    }

    #[test]
    fn unknown_field_is_an_unresolved_reference() {
        let expr = Expression::compile("{{ missing }}").unwrap();
        let rec = record(&[("price", json!(10))]);
        assert!(matches!(
            expr.evaluate(&rec),
            Err(Error::UnresolvedReference(field)) if field == "missing"
        ));
    }

    #[test]
    fn type_mismatch_is_an_evaluation_error() {
        let expr = Expression::compile("{{ name * 2 }}").unwrap();
        let rec = record(&[("name", json!("widget"))]);
        assert!(matches!(
            expr.evaluate(&rec),
            Err(Error::Evaluation(_))
        ));
    }

    #[test]
    fn mixed_literal_and_placeholder_renders_a_string() {
        let expr = Expression::compile("SKU-{{ id }}/{{ region }}").unwrap();
        let rec = record(&[("id", json!(42)), ("region", json!("eu"))]);
        assert_eq!(expr.evaluate(&rec).unwrap(), json!("SKU-42/eu"));
    }

    #[test]
    fn at_sign_is_placeholder_shorthand() {
        let expr = Expression::compile("Hello @name").unwrap();
        let rec = record(&[("name", json!("Ada"))]);
        assert_eq!(expr.evaluate(&rec).unwrap(), json!("Hello Ada"));

        // A lone @ with no identifier is literal text.
        let expr = Expression::compile("a @ b").unwrap();
        assert_eq!(expr.evaluate(&rec).unwrap(), json!("a @ b"));
    }

    #[test]
    fn string_concatenation_with_plus() {
        let expr = Expression::compile("{{ 'SKU-' + code }}").unwrap();
        let rec = record(&[("code", json!("X1"))]);
        assert_eq!(expr.evaluate(&rec).unwrap(), json!("SKU-X1"));
    }

    #[test]
    fn nested_paths_descend_into_objects() {
        let expr = Expression::compile("{{ meta.color }}").unwrap();
        let rec = record(&[("meta", json!({"color": "red"}))]);
        assert_eq!(expr.evaluate(&rec).unwrap(), json!("red"));
    }

    #[test]
    fn null_fields_render_as_empty_text() {
        let expr = Expression::compile("v={{ note }}").unwrap();
        let rec = record(&[("note", Value::Null)]);
        assert_eq!(expr.evaluate(&rec).unwrap(), json!("v="));
    }

    #[test]
    fn unclosed_placeholder_fails_at_compile() {
        assert!(Expression::compile("{{ price").is_err());
    }

    #[test]
    fn evaluation_is_reproducible() {
        let expr = Expression::compile("{{ price * 2 }}").unwrap();
        let rec = record(&[("price", json!(5))]);
        assert_eq!(expr.evaluate(&rec).unwrap(), expr.evaluate(&rec).unwrap());
    }
}
