use serde::{Deserialize, Serialize};
use std::fmt;

/// A single attribute value: a scalar or a homogeneous array of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    StrArray(Vec<String>),
    BoolArray(Vec<bool>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
}

impl AttrValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Str(_) => "string",
            AttrValue::Bool(_) => "bool",
            AttrValue::Int(_) => "int64",
            AttrValue::Float(_) => "float64",
            AttrValue::StrArray(_) => "string[]",
            AttrValue::BoolArray(_) => "bool[]",
            AttrValue::IntArray(_) => "int64[]",
            AttrValue::FloatArray(_) => "float64[]",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Canonical rendering used for index columns: strings unquoted, scalars in
/// decimal/boolean form, arrays bracketed and comma-separated.
impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => f.write_str(s),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::StrArray(items) => write_array(f, items),
            AttrValue::BoolArray(items) => write_array(f, items),
            AttrValue::IntArray(items) => write_array(f, items),
            AttrValue::FloatArray(items) => write_array(f, items),
        }
    }
}

fn write_array<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

/// Truncates to at most `max` bytes without splitting a UTF-8 sequence.
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_rendering() {
        assert_eq!(AttrValue::Str("hello".into()).to_string(), "hello");
        assert_eq!(AttrValue::Bool(true).to_string(), "true");
        assert_eq!(AttrValue::Int(-42).to_string(), "-42");
        assert_eq!(AttrValue::Float(1.5).to_string(), "1.5");
    }

    #[test]
    fn test_array_rendering() {
        let v = AttrValue::StrArray(vec!["a".into(), "b".into()]);
        assert_eq!(v.to_string(), "[a, b]");

        let v = AttrValue::IntArray(vec![1, 2, 3]);
        assert_eq!(v.to_string(), "[1, 2, 3]");

        let v = AttrValue::BoolArray(vec![]);
        assert_eq!(v.to_string(), "[]");
    }

    #[test]
    fn test_truncate_ascii() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("hello", 0), "");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        // "é" is two bytes; cutting at 1 would split it.
        let s = "éé";
        assert_eq!(truncate(s, 1), "");
        assert_eq!(truncate(s, 2), "é");
        assert_eq!(truncate(s, 3), "é");
        assert_eq!(truncate(s, 4), "éé");
    }
}
