//! Filter expressions: the caller-supplied JSON predicate tree
//!
//! The accepted shape follows the Sequelize-style operator objects:
//!
//! ```json
//! { "name": "Alice",
//!   "age": { "$gte": 18, "$lt": 65 },
//!   "$or": [ { "status": { "$in": ["open", "pending"] } },
//!            { "title": { "$like": "urgent" } } ] }
//! ```
//!
//! Keys at the same level form a conjunction. A bare value is `$eq`.

mod compile;
mod render;

pub use compile::{
    Comparison, CompiledQuery, FilterCompiler, Operand, Pagination, Predicate,
    PredicatePlan, like_pattern,
};
pub use render::{render_predicate, text_expr};

use crate::error::{EngineError, Result};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;

/// Supported comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Like,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    NotIn,
}

impl Operator {
    /// Parse an operator key such as `$gte`
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$like" => Operator::Like,
            "$gt" => Operator::Gt,
            "$lt" => Operator::Lt,
            "$gte" => Operator::Gte,
            "$lte" => Operator::Lte,
            "$in" => Operator::In,
            "$notIn" => Operator::NotIn,
            _ => return None,
        })
    }

    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Like => "$like",
            Operator::Gt => "$gt",
            Operator::Lt => "$lt",
            Operator::Gte => "$gte",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::NotIn => "$notIn",
        }
    }

    /// Operators whose operand is a list
    #[must_use]
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalKind {
    And,
    Or,
}

impl LogicalKind {
    #[must_use]
    pub fn sql(&self) -> &'static str {
        match self {
            LogicalKind::And => "AND",
            LogicalKind::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub operator: Operator,
    pub value: Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalGroup {
    pub kind: LogicalKind,
    pub children: Vec<FilterExpression>,
}

/// Parsed but not yet validated against any table
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    Field(FieldCondition),
    Group(LogicalGroup),
}

impl FilterExpression {
    /// Parse a filter object into its top-level conjunction. `null` and `{}`
    /// yield an empty list.
    pub fn parse(value: &Json) -> Result<Vec<FilterExpression>> {
        match value {
            Json::Null => Ok(Vec::new()),
            Json::Object(map) => parse_object(map),
            other => Err(EngineError::validation(format!(
                "filter must be a JSON object, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Parse filter text as received from a query string. Blank text is no filter.
    pub fn parse_str(text: &str) -> Result<Vec<FilterExpression>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value: Json = serde_json::from_str(text)
            .map_err(|e| EngineError::validation(format!("filter is not valid JSON: {e}")))?;
        Self::parse(&value)
    }

    /// True for `$and` / `$or` groups
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self, FilterExpression::Group(_))
    }
}

fn parse_object(map: &Map<String, Json>) -> Result<Vec<FilterExpression>> {
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        if let Some(kind) = logical_key(key) {
            out.push(FilterExpression::Group(parse_group(kind, key, value)?));
        } else if key.starts_with('$') {
            return Err(EngineError::validation(format!(
                "unsupported logical operator: {key}"
            )));
        } else {
            parse_field(key, value, &mut out)?;
        }
    }
    Ok(out)
}

fn logical_key(key: &str) -> Option<LogicalKind> {
    match key {
        "$and" => Some(LogicalKind::And),
        "$or" => Some(LogicalKind::Or),
        _ => None,
    }
}

fn parse_group(kind: LogicalKind, key: &str, value: &Json) -> Result<LogicalGroup> {
    let Json::Array(items) = value else {
        return Err(EngineError::validation(format!(
            "{key} expects an array of filter objects"
        )));
    };
    let mut children = Vec::with_capacity(items.len());
    for item in items {
        let Json::Object(map) = item else {
            return Err(EngineError::validation(format!(
                "{key} expects an array of filter objects, found {}",
                json_kind(item)
            )));
        };
        let mut parsed = parse_object(map)?;
        // A multi-key member is its own conjunction
        if parsed.len() == 1 {
            children.append(&mut parsed);
        } else if !parsed.is_empty() {
            children.push(FilterExpression::Group(LogicalGroup {
                kind: LogicalKind::And,
                children: parsed,
            }));
        }
    }
    Ok(LogicalGroup { kind, children })
}

fn parse_field(field: &str, value: &Json, out: &mut Vec<FilterExpression>) -> Result<()> {
    match value {
        Json::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            for (op_key, operand) in ops {
                let operator = Operator::from_key(op_key).ok_or_else(|| {
                    EngineError::validation(format!(
                        "unsupported operator {op_key} on field {field}"
                    ))
                })?;
                if operator.takes_list() && !operand.is_array() {
                    return Err(EngineError::validation(format!(
                        "{op_key} on field {field} expects an array"
                    )));
                }
                out.push(FilterExpression::Field(FieldCondition {
                    field: field.to_string(),
                    operator,
                    value: operand.clone(),
                }));
            }
            Ok(())
        }
        Json::Object(_) => Err(EngineError::validation(format!(
            "field {field} has an object value without operators"
        ))),
        Json::Array(_) => Err(EngineError::validation(format!(
            "field {field} has an array value; use $in"
        ))),
        scalar => {
            out.push(FilterExpression::Field(FieldCondition {
                field: field.to_string(),
                operator: Operator::Eq,
                value: scalar.clone(),
            }));
            Ok(())
        }
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

/// Rebuild a JSON value with object keys in sorted order, recursively.
/// Semantically identical filters normalize to identical text.
#[must_use]
pub fn normalize(value: &Json) -> Json {
    match value {
        Json::Object(map) => {
            let sorted: BTreeMap<&String, Json> =
                map.iter().map(|(k, v)| (k, normalize(v))).collect();
            let mut out = Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                _ = out.insert(k.clone(), v);
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_shorthand_and_operators() {
        let parsed = FilterExpression::parse(&json!({
            "name": "A",
            "age": {"$gt": 1, "$lte": 9}
        }))
        .expect("parse");
        assert_eq!(parsed.len(), 3);
        assert!(parsed.iter().all(|e| !e.is_group()));
        let FilterExpression::Field(first) = &parsed[0] else {
            panic!("expected field");
        };
        assert_eq!(first.operator, Operator::Eq);
    }

    #[test]
    fn test_parse_groups() {
        let parsed = FilterExpression::parse(&json!({
            "$or": [{"a": 1}, {"b": 2, "c": 3}]
        }))
        .expect("parse");
        assert_eq!(parsed.len(), 1);
        let FilterExpression::Group(group) = &parsed[0] else {
            panic!("expected group");
        };
        assert_eq!(group.kind, LogicalKind::Or);
        assert_eq!(group.children.len(), 2);
        assert!(group.children[1].is_group());
    }

    #[test]
    fn test_parse_rejections() {
        for bad in [
            json!([1, 2]),
            json!("text"),
            json!({"$not": {"a": 1}}),
            json!({"a": {"$regex": "x"}}),
            json!({"a": {"$in": 3}}),
            json!({"$or": {"a": 1}}),
            json!({"$or": [1]}),
            json!({"a": [1, 2]}),
        ] {
            let err = FilterExpression::parse(&bad).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{bad}");
        }
    }

    #[test]
    fn test_parse_str() {
        assert!(FilterExpression::parse_str("  ").expect("blank").is_empty());
        assert!(FilterExpression::parse_str("{not json").is_err());
        assert_eq!(FilterExpression::parse_str(r#"{"a":1}"#).expect("obj").len(), 1);
    }

    #[test]
    fn test_normalize_orders_keys() {
        let a = normalize(&json!({"b": 1, "a": {"$lt": 3, "$gt": 1}}));
        let b = normalize(&json!({"a": {"$gt": 1, "$lt": 3}, "b": 1}));
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), r#"{"a":{"$gt":1,"$lt":3},"b":1}"#);
    }
}
