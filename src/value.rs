use std::fmt::Display;

use crate::lex::{is_bool_literal, is_number_literal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Number(i64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Number,
    Str,
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Bool => write!(f, "boolean"),
            ValueType::Number => write!(f, "number"),
            ValueType::Str => write!(f, "string"),
        }
    }
}

impl Value {
    /// Classifies authored text: boolean spellings and integers become typed
    /// values, anything else stays a string.
    pub fn from_literal(text: &str) -> Self {
        if is_bool_literal(text) {
            let upper = text.to_ascii_uppercase();
            Value::Bool(matches!(upper.as_str(), "TRUE" | "ON" | "YES"))
        } else if is_number_literal(text) {
            text.parse()
                .map(Value::Number)
                .unwrap_or_else(|_| Value::Str(text.to_string()))
        } else {
            Value::Str(text.to_string())
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) => ValueType::Number,
            Value::Str(_) => ValueType::Str,
        }
    }

    /// Non-zero numbers, non-empty strings and `true` are truthy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    /// Numeric view used by ordering comparisons. Booleans count as 1 and 0,
    /// strings only when they spell an integer.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Number(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Loose equality used by `FLAG_IS`.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bool(b), v) | (v, Value::Bool(b)) => v.truthy() == *b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Number(n), s @ Value::Str(_)) | (s @ Value::Str(_), Value::Number(n)) => {
                s.as_number() == Some(*n)
            }
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_classification() {
        assert_eq!(Value::from_literal("10"), Value::Number(10));
        assert_eq!(Value::from_literal("-3"), Value::Number(-3));
        assert_eq!(Value::from_literal("yes"), Value::Bool(true));
        assert_eq!(Value::from_literal("OFF"), Value::Bool(false));
        assert_eq!(Value::from_literal("lamp"), Value::from("lamp"));
        assert_eq!(
            Value::from_literal("99999999999999999999"),
            Value::from("99999999999999999999")
        );
    }

    #[test]
    fn truthiness() {
        assert!(Value::Number(-1).truthy());
        assert!(!Value::Number(0).truthy());
        assert!(!Value::from("").truthy());
        assert!(Value::from("x").truthy());
        assert!(!Value::Bool(false).truthy());
    }

    #[test]
    fn loose_equality_coerces() {
        assert!(Value::Number(4).loosely_equals(&Value::from("4")));
        assert!(Value::Bool(true).loosely_equals(&Value::Number(7)));
        assert!(Value::Bool(false).loosely_equals(&Value::Number(0)));
        assert!(!Value::from("a").loosely_equals(&Value::from("A")));
    }
}
