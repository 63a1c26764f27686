//! Scalar cell values and their types.
//!
//! Every cell of every output table is a [`ScalarValue`]. Types form a total
//! order of generality, `Bool < Int < Float < String`, and a column's type is
//! the most general type observed for it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A flat mapping column-name → scalar, in insertion order.
pub type FlatRow = IndexMap<String, ScalarValue>;

/// Scalar column type, ordered from least to most general.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Bool,
    Int,
    Float,
    String,
}

impl ScalarType {
    /// The most general of two types.
    pub fn widen(self, other: ScalarType) -> ScalarType {
        self.max(other)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::String => "string",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(ScalarType::Bool),
            "int" => Some(ScalarType::Int),
            "float" => Some(ScalarType::Float),
            "string" => Some(ScalarType::String),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ScalarValue {
    /// Type of the value, `None` for null.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Bool(_) => Some(ScalarType::Bool),
            ScalarValue::Int(_) => Some(ScalarType::Int),
            ScalarValue::Float(_) => Some(ScalarType::Float),
            ScalarValue::String(_) => Some(ScalarType::String),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Convert a JSON scalar. Returns `None` for null, arrays and objects.
    ///
    /// Integral numbers that fit in an `i64` become `Int`; every other number
    /// becomes `Float`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(ScalarValue::Bool(*b)),
            serde_json::Value::Number(n) => Some(match n.as_i64() {
                Some(i) => ScalarValue::Int(i),
                None => ScalarValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            }),
            serde_json::Value::String(s) => Some(ScalarValue::String(s.clone())),
            _ => None,
        }
    }

    /// Widen the value to `ty` without truncation.
    ///
    /// Null stays null. A target narrower than the value's own type leaves
    /// the value unchanged.
    pub fn widen_to(self, ty: ScalarType) -> ScalarValue {
        let Some(own) = self.scalar_type() else {
            return self;
        };
        if own >= ty {
            return self;
        }
        match (self, ty) {
            (ScalarValue::Bool(b), ScalarType::Int) => ScalarValue::Int(i64::from(b)),
            (ScalarValue::Bool(b), ScalarType::Float) => {
                ScalarValue::Float(if b { 1.0 } else { 0.0 })
            }
            (ScalarValue::Int(i), ScalarType::Float) => ScalarValue::Float(i as f64),
            (value, ScalarType::String) => ScalarValue::String(value.to_string()),
            (value, _) => value,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("null"),
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int(i) => write!(f, "{i}"),
            ScalarValue::Float(x) => write!(f, "{x}"),
            ScalarValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::String(s.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        ScalarValue::String(s)
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        ScalarValue::Bool(b)
    }
}

impl From<i64> for ScalarValue {
    fn from(i: i64) -> Self {
        ScalarValue::Int(i)
    }
}

impl From<f64> for ScalarValue {
    fn from(x: f64) -> Self {
        ScalarValue::Float(x)
    }
}
