use std::fmt;

/// Values pushed on the interpreter stack and carried as instruction operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Kind tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Integer,
    Float,
    Text,
}

impl ValueKind {
    /// Tag used for this kind in the text cache format.
    pub fn cache_tag(self) -> &'static str {
        match self {
            ValueKind::Integer => "int",
            ValueKind::Float => "float",
            ValueKind::Text => "string",
        }
    }

    pub fn from_cache_tag(tag: &str) -> Option<Self> {
        match tag {
            "int" => Some(ValueKind::Integer),
            "float" => Some(ValueKind::Float),
            "string" => Some(ValueKind::Text),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Integer => write!(f, "integer"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::Text => write!(f, "text"),
        }
    }
}

/// Operand pair after numeric promotion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NumericPair {
    Integers(i64, i64),
    Floats(f64, f64),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Truthiness used by `JUMP_IF`: numbers are true when unequal to zero.
    /// Text has no truth value and yields `None`.
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Value::Integer(value) => Some(*value != 0),
            Value::Float(value) => Some(*value != 0.0),
            Value::Text(_) => None,
        }
    }

    /// Promotes two operands for arithmetic. Mixed integer/float pairs become floats.
    /// Returns the kind of the first non-numeric operand on failure.
    pub(crate) fn promote(lhs: &Value, rhs: &Value) -> Result<NumericPair, ValueKind> {
        match (lhs, rhs) {
            (Value::Integer(a), Value::Integer(b)) => Ok(NumericPair::Integers(*a, *b)),
            (Value::Float(a), Value::Float(b)) => Ok(NumericPair::Floats(*a, *b)),
            (Value::Integer(a), Value::Float(b)) => Ok(NumericPair::Floats(*a as f64, *b)),
            (Value::Float(a), Value::Integer(b)) => Ok(NumericPair::Floats(*a, *b as f64)),
            (Value::Text(_), _) => Err(ValueKind::Text),
            (_, other) => Err(other.kind()),
        }
    }
}

/// Canonical text form written by `PRINT`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_text() {
        assert_eq!(Value::Integer(-7).to_string(), "-7");
        assert_eq!(Value::Float(3.0).to_string(), "3");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::from("hello world").to_string(), "hello world");
    }

    #[test]
    fn promotion_rules() {
        assert_eq!(
            Value::promote(&Value::Integer(1), &Value::Integer(2)),
            Ok(NumericPair::Integers(1, 2))
        );
        assert_eq!(
            Value::promote(&Value::Integer(1), &Value::Float(0.5)),
            Ok(NumericPair::Floats(1.0, 0.5))
        );
        assert_eq!(
            Value::promote(&Value::Float(1.5), &Value::from("x")),
            Err(ValueKind::Text)
        );
    }

    #[test]
    fn truthiness_is_numeric_only() {
        assert_eq!(Value::Integer(0).truthiness(), Some(false));
        assert_eq!(Value::Integer(-1).truthiness(), Some(true));
        assert_eq!(Value::Float(0.0).truthiness(), Some(false));
        assert_eq!(Value::Float(f64::NAN).truthiness(), Some(true));
        assert_eq!(Value::from("").truthiness(), None);
    }

    #[test]
    fn cache_tags_round_trip() {
        for kind in [ValueKind::Integer, ValueKind::Float, ValueKind::Text] {
            assert_eq!(ValueKind::from_cache_tag(kind.cache_tag()), Some(kind));
        }
        assert_eq!(ValueKind::from_cache_tag("bool"), None);
    }
}
