//! Closed value-type vocabulary used by function signatures and the batch codec.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields};
use fus_common::{FusError, Result};

/// Arrow field metadata key carrying an extension type name.
pub const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";

/// Extension name marking a Utf8 column as arbitrary-precision decimal text.
pub const DECIMAL_EXTENSION_NAME: &str = "arrowudf.decimal";

/// A value type. Compared structurally; nesting through arrays and structs is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Boolean,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Arbitrary-precision decimal, never narrowed to a float.
    Decimal,
    VarChar,
    Bytes,
    Array(Box<TypeDescriptor>),
    /// Ordered named fields; names are unique within one struct.
    Struct(Vec<StructField>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: String,
    pub ty: TypeDescriptor,
}

impl StructField {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl TypeDescriptor {
    /// Parse a textual type name such as `INT`, `VARCHAR[]` or `STRUCT<a INT, b BYTEA>`.
    pub fn parse(text: &str) -> Result<Self> {
        crate::parse::parse_type(text)
    }

    pub fn array(element: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Box::new(element))
    }

    /// Build a struct descriptor, rejecting duplicate field names.
    pub fn structure(fields: Vec<StructField>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(FusError::TypeSyntax {
                    fragment: field.name.clone(),
                    message: "duplicate struct field name".to_string(),
                });
            }
        }
        Ok(TypeDescriptor::Struct(fields))
    }

    /// Arrow physical type used on the wire.
    pub fn to_data_type(&self) -> DataType {
        match self {
            TypeDescriptor::Boolean => DataType::Boolean,
            TypeDescriptor::Int16 => DataType::Int16,
            TypeDescriptor::Int32 => DataType::Int32,
            TypeDescriptor::Int64 => DataType::Int64,
            TypeDescriptor::Float32 => DataType::Float32,
            TypeDescriptor::Float64 => DataType::Float64,
            TypeDescriptor::Decimal | TypeDescriptor::VarChar => DataType::Utf8,
            TypeDescriptor::Bytes => DataType::Binary,
            TypeDescriptor::Array(element) => DataType::List(Arc::new(element.to_field("item"))),
            TypeDescriptor::Struct(fields) => DataType::Struct(Fields::from(
                fields
                    .iter()
                    .map(|f| f.ty.to_field(&f.name))
                    .collect::<Vec<_>>(),
            )),
        }
    }

    /// Nullable Arrow field for this type; decimals carry the extension marker.
    pub fn to_field(&self, name: &str) -> Field {
        let field = Field::new(name, self.to_data_type(), true);
        if matches!(self, TypeDescriptor::Decimal) {
            field.with_metadata(HashMap::from([(
                EXTENSION_NAME_KEY.to_string(),
                DECIMAL_EXTENSION_NAME.to_string(),
            )]))
        } else {
            field
        }
    }

    /// Map an Arrow field back into the vocabulary. `None` for unsupported types.
    pub fn from_field(field: &Field) -> Option<Self> {
        let ty = match field.data_type() {
            DataType::Boolean => TypeDescriptor::Boolean,
            DataType::Int16 => TypeDescriptor::Int16,
            DataType::Int32 => TypeDescriptor::Int32,
            DataType::Int64 => TypeDescriptor::Int64,
            DataType::Float32 => TypeDescriptor::Float32,
            DataType::Float64 => TypeDescriptor::Float64,
            DataType::Utf8 if is_decimal_field(field) => TypeDescriptor::Decimal,
            DataType::Utf8 => TypeDescriptor::VarChar,
            DataType::Binary => TypeDescriptor::Bytes,
            DataType::List(element) => TypeDescriptor::array(Self::from_field(element)?),
            DataType::Struct(fields) => TypeDescriptor::Struct(
                fields
                    .iter()
                    .map(|f| Some(StructField::new(f.name().clone(), Self::from_field(f)?)))
                    .collect::<Option<Vec<_>>>()?,
            ),
            _ => return None,
        };
        Some(ty)
    }
}

fn is_decimal_field(field: &Field) -> bool {
    field
        .metadata()
        .get(EXTENSION_NAME_KEY)
        .is_some_and(|name| name == DECIMAL_EXTENSION_NAME)
}

/// Human readable type of an Arrow field, in vocabulary terms when possible.
pub fn describe_field(field: &Field) -> String {
    match TypeDescriptor::from_field(field) {
        Some(ty) => ty.to_string(),
        None => format!("unsupported arrow type {}", field.data_type()),
    }
}

impl FromStr for TypeDescriptor {
    type Err = FusError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Boolean => f.write_str("BOOLEAN"),
            TypeDescriptor::Int16 => f.write_str("SMALLINT"),
            TypeDescriptor::Int32 => f.write_str("INT"),
            TypeDescriptor::Int64 => f.write_str("BIGINT"),
            TypeDescriptor::Float32 => f.write_str("REAL"),
            TypeDescriptor::Float64 => f.write_str("DOUBLE PRECISION"),
            TypeDescriptor::Decimal => f.write_str("DECIMAL"),
            TypeDescriptor::VarChar => f.write_str("VARCHAR"),
            TypeDescriptor::Bytes => f.write_str("BYTEA"),
            TypeDescriptor::Array(element) => write!(f, "{element}[]"),
            TypeDescriptor::Struct(fields) => {
                f.write_str("STRUCT<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if is_plain_identifier(&field.name) {
                        write!(f, "{} {}", field.name, field.ty)?;
                    } else {
                        write!(f, "\"{}\" {}", field.name, field.ty)?;
                    }
                }
                f.write_str(">")
            }
        }
    }
}

pub(crate) fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Comma separated rendering of a type list, e.g. `INT, VARCHAR[]`.
pub fn format_type_list(types: &[TypeDescriptor]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_field_round_trips_through_metadata() {
        let field = TypeDescriptor::Decimal.to_field("amount");
        assert_eq!(field.data_type(), &DataType::Utf8);
        assert_eq!(TypeDescriptor::from_field(&field), Some(TypeDescriptor::Decimal));

        let plain = Field::new("name", DataType::Utf8, true);
        assert_eq!(TypeDescriptor::from_field(&plain), Some(TypeDescriptor::VarChar));
    }

    #[test]
    fn nested_types_map_to_arrow_and_back() {
        let ty = TypeDescriptor::structure(vec![
            StructField::new("tags", TypeDescriptor::array(TypeDescriptor::VarChar)),
            StructField::new("price", TypeDescriptor::Decimal),
        ])
        .unwrap();
        let field = TypeDescriptor::array(ty.clone()).to_field("items");
        assert_eq!(
            TypeDescriptor::from_field(&field),
            Some(TypeDescriptor::array(ty))
        );
    }

    #[test]
    fn list_child_name_does_not_matter() {
        let field = Field::new(
            "xs",
            DataType::List(Arc::new(Field::new("element", DataType::Int32, true))),
            true,
        );
        assert_eq!(
            TypeDescriptor::from_field(&field),
            Some(TypeDescriptor::array(TypeDescriptor::Int32))
        );
    }

    #[test]
    fn unsupported_arrow_types_are_described() {
        let field = Field::new("d", DataType::Date32, true);
        assert_eq!(TypeDescriptor::from_field(&field), None);
        assert!(describe_field(&field).contains("unsupported arrow type"));
    }

    #[test]
    fn struct_rejects_duplicate_names() {
        let err = TypeDescriptor::structure(vec![
            StructField::new("a", TypeDescriptor::Int32),
            StructField::new("a", TypeDescriptor::VarChar),
        ])
        .unwrap_err();
        assert!(matches!(err, FusError::TypeSyntax { .. }));
    }

    #[test]
    fn display_quotes_non_identifier_field_names() {
        let ty = TypeDescriptor::structure(vec![
            StructField::new("src addr", TypeDescriptor::VarChar),
            StructField::new("port", TypeDescriptor::Int16),
        ])
        .unwrap();
        assert_eq!(ty.to_string(), "STRUCT<\"src addr\" VARCHAR, port SMALLINT>");
    }
}
