//! Bound parameters going into the store and cells coming back out

use crate::descriptor::SemanticType;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A value bound to a `?` placeholder. Never interpolated into SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlParam {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlParam::Null)
    }

    /// Text rendering used for pattern matching against cast columns
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            SqlParam::Null => String::new(),
            SqlParam::Bool(b) => b.to_string(),
            SqlParam::Int(i) => i.to_string(),
            SqlParam::Float(f) => f.to_string(),
            SqlParam::Text(s) => s.clone(),
        }
    }

    /// Convert to a sea-query value for builder-path statements
    #[must_use]
    pub fn to_sea_value(&self) -> sea_query::Value {
        match self {
            SqlParam::Null => sea_query::Value::String(None),
            SqlParam::Bool(b) => (*b).into(),
            SqlParam::Int(i) => (*i).into(),
            SqlParam::Float(f) => (*f).into(),
            SqlParam::Text(s) => s.clone().into(),
        }
    }

    /// Convert a sea-query value produced by the builder back into a parameter
    pub fn from_sea_value(value: sea_query::Value) -> Result<Self> {
        use sea_query::Value as V;
        Ok(match value {
            V::Bool(Some(b)) => SqlParam::Bool(b),
            V::TinyInt(Some(i)) => SqlParam::Int(i64::from(i)),
            V::SmallInt(Some(i)) => SqlParam::Int(i64::from(i)),
            V::Int(Some(i)) => SqlParam::Int(i64::from(i)),
            V::BigInt(Some(i)) => SqlParam::Int(i),
            V::TinyUnsigned(Some(i)) => SqlParam::Int(i64::from(i)),
            V::SmallUnsigned(Some(i)) => SqlParam::Int(i64::from(i)),
            V::Unsigned(Some(i)) => SqlParam::Int(i64::from(i)),
            V::BigUnsigned(Some(i)) => SqlParam::Int(i64::try_from(i).map_err(|_| {
                EngineError::validation(format!("value {i} out of range"))
            })?),
            V::Float(Some(f)) => SqlParam::Float(f64::from(f)),
            V::Double(Some(f)) => SqlParam::Float(f),
            V::String(Some(s)) => SqlParam::Text(s.to_string()),
            V::Char(Some(c)) => SqlParam::Text(c.to_string()),
            V::Bool(None)
            | V::TinyInt(None)
            | V::SmallInt(None)
            | V::Int(None)
            | V::BigInt(None)
            | V::TinyUnsigned(None)
            | V::SmallUnsigned(None)
            | V::Unsigned(None)
            | V::BigUnsigned(None)
            | V::Float(None)
            | V::Double(None)
            | V::String(None)
            | V::Char(None) => SqlParam::Null,
            other => {
                return Err(EngineError::validation(format!(
                    "unsupported bound value: {other:?}"
                )));
            }
        })
    }

    /// Coerce a JSON filter or write value to the parameter matching `semantic`.
    ///
    /// Number columns accept numbers and numeric strings. Boolean columns
    /// accept booleans, "true"/"false" and 0/1. Strings and dates bind as text.
    pub fn coerce(value: &Json, semantic: SemanticType, field: &str) -> Result<Self> {
        let mismatch = || {
            EngineError::validation(format!(
                "field {field} expects a {semantic} value, got {value}"
            ))
        };
        match value {
            Json::Null => Ok(SqlParam::Null),
            Json::Array(_) | Json::Object(_) => Err(EngineError::validation(format!(
                "field {field} expects a scalar value, got {value}"
            ))),
            _ => match semantic {
                SemanticType::Number => match value {
                    Json::Number(n) => Ok(number_param(n)),
                    Json::String(s) => parse_numeric(s).ok_or_else(mismatch),
                    _ => Err(mismatch()),
                },
                SemanticType::Boolean => match value {
                    Json::Bool(b) => Ok(SqlParam::Bool(*b)),
                    Json::Number(n) if n.as_i64() == Some(0) => Ok(SqlParam::Bool(false)),
                    Json::Number(n) if n.as_i64() == Some(1) => Ok(SqlParam::Bool(true)),
                    Json::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                        "true" | "1" => Ok(SqlParam::Bool(true)),
                        "false" | "0" => Ok(SqlParam::Bool(false)),
                        _ => Err(mismatch()),
                    },
                    _ => Err(mismatch()),
                },
                SemanticType::String | SemanticType::Date => Ok(SqlParam::Text(json_text(value))),
            },
        }
    }
}

fn number_param(n: &serde_json::Number) -> SqlParam {
    match n.as_i64() {
        Some(i) => SqlParam::Int(i),
        None => SqlParam::Float(n.as_f64().unwrap_or(f64::NAN)),
    }
}

fn parse_numeric(s: &str) -> Option<SqlParam> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(SqlParam::Int(i));
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(SqlParam::Float)
}

/// Plain text of a scalar JSON value (strings without quotes)
#[must_use]
pub fn json_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

/// A cell read back from the store, independent of the driver
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    BigInt(i128),
    Float(f64),
    /// Exact decimal rendered by the driver
    Decimal(String),
    Text(String),
}

impl Cell {
    /// Convert to JSON. Numbers whose magnitude exceeds `threshold` are
    /// returned as decimal strings so downstream consumers never lose precision.
    #[must_use]
    pub fn into_json(self, threshold: f64) -> Json {
        match self {
            Cell::Null => Json::Null,
            Cell::Bool(b) => Json::Bool(b),
            Cell::Int(i) => {
                if (i.unsigned_abs() as f64) > threshold {
                    Json::String(i.to_string())
                } else {
                    Json::from(i)
                }
            }
            Cell::BigInt(i) => {
                if (i.unsigned_abs() as f64) > threshold {
                    Json::String(i.to_string())
                } else {
                    // Within threshold implies within i64
                    i64::try_from(i).map_or_else(|_| Json::String(i.to_string()), Json::from)
                }
            }
            Cell::Float(f) => float_json(f, threshold),
            Cell::Decimal(s) => match s.parse::<f64>() {
                Ok(f) if f.abs() <= threshold => float_json(f, threshold),
                _ => Json::String(s),
            },
            Cell::Text(s) => Json::String(s),
        }
    }
}

fn float_json(f: f64, threshold: f64) -> Json {
    if !f.is_finite() {
        return Json::Null;
    }
    if f.abs() > threshold {
        // Integral floats print without a trailing ".0"
        if f.fract() == 0.0 && f.abs() < 1e18 {
            return Json::String(format!("{f:.0}"));
        }
        return Json::String(f.to_string());
    }
    // Past 1e18 the cast to i64 would saturate
    if f.fract() == 0.0 && f.abs() < 1e18 {
        return Json::from(f as i64);
    }
    serde_json::Number::from_f64(f).map_or(Json::Null, Json::Number)
}
