//! Row-level dynamic values passed to and returned from function bodies.

use bigdecimal::BigDecimal;

use crate::descriptor::TypeDescriptor;

/// One cell of a row. `Null` is valid for every declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Decimal(BigDecimal),
    VarChar(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    /// Field values in declaration order.
    Struct(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Value::Int16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            Value::Float32(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<&BigDecimal> {
        match self {
            Value::Decimal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::VarChar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[Value]> {
        match self {
            Value::Struct(v) => Some(v),
            _ => None,
        }
    }

    /// Short variant name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Int16(_) => "SMALLINT",
            Value::Int32(_) => "INT",
            Value::Int64(_) => "BIGINT",
            Value::Float32(_) => "REAL",
            Value::Float64(_) => "DOUBLE PRECISION",
            Value::Decimal(_) => "DECIMAL",
            Value::VarChar(_) => "VARCHAR",
            Value::Bytes(_) => "BYTEA",
            Value::Array(_) => "ARRAY",
            Value::Struct(_) => "STRUCT",
        }
    }

    /// Whether this value is a valid instance of `ty` (recursively).
    ///
    /// Validation aid only; the codec enforces the same rule while building arrays.
    pub fn matches(&self, ty: &TypeDescriptor) -> bool {
        match (self, ty) {
            (Value::Null, _) => true,
            (Value::Boolean(_), TypeDescriptor::Boolean)
            | (Value::Int16(_), TypeDescriptor::Int16)
            | (Value::Int32(_), TypeDescriptor::Int32)
            | (Value::Int64(_), TypeDescriptor::Int64)
            | (Value::Float32(_), TypeDescriptor::Float32)
            | (Value::Float64(_), TypeDescriptor::Float64)
            | (Value::Decimal(_), TypeDescriptor::Decimal)
            | (Value::VarChar(_), TypeDescriptor::VarChar)
            | (Value::Bytes(_), TypeDescriptor::Bytes) => true,
            (Value::Array(items), TypeDescriptor::Array(element)) => {
                items.iter().all(|item| item.matches(element))
            }
            (Value::Struct(values), TypeDescriptor::Struct(fields)) => {
                values.len() == fields.len()
                    && values.iter().zip(fields).all(|(v, f)| v.matches(&f.ty))
            }
            _ => false,
        }
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from!(
    bool => Boolean,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    BigDecimal => Decimal,
    String => VarChar,
    Vec<u8> => Bytes,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::VarChar(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn null_matches_every_type() {
        for text in ["INT", "VARCHAR[]", "STRUCT<a DECIMAL>"] {
            assert!(Value::Null.matches(&TypeDescriptor::parse(text).unwrap()));
        }
    }

    #[test]
    fn nested_values_match_recursively() {
        let ty = TypeDescriptor::parse("STRUCT<a VARCHAR[], b DECIMAL>").unwrap();
        let ok = Value::Struct(vec![
            Value::Array(vec!["x".into(), Value::Null]),
            Value::Decimal(BigDecimal::from_str("1.5").unwrap()),
        ]);
        assert!(ok.matches(&ty));

        let wrong_element = Value::Struct(vec![Value::Array(vec![Value::Int32(1)]), Value::Null]);
        assert!(!wrong_element.matches(&ty));

        let wrong_width = Value::Struct(vec![Value::Null]);
        assert!(!wrong_width.matches(&ty));
    }

    #[test]
    fn option_conversion_maps_none_to_null() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(7_i32)), Value::Int32(7));
    }
}
