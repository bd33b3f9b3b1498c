//! Declared function signatures.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use fus_types::{TypeDescriptor, format_type_list};

/// Name of the origin-row column leading every table-function output batch.
pub const ROW_INDEX_COLUMN: &str = "row_index";

/// Scalar (one value per row) or table (zero or more rows per row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// One output value per input row.
    Scalar,
    /// Zero or more output tuples per input row.
    Table,
}

impl FunctionKind {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Scalar => "scalar",
            FunctionKind::Table => "table",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared output of a function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReturnType {
    /// Single value type of a scalar function.
    Scalar(TypeDescriptor),
    /// One entry per output column of a table function.
    Table(Vec<TypeDescriptor>),
}

/// Ordered input types plus declared output. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    inputs: Vec<TypeDescriptor>,
    returns: ReturnType,
}

impl FunctionSignature {
    /// Signature of a scalar function.
    pub fn scalar(inputs: Vec<TypeDescriptor>, output: TypeDescriptor) -> Self {
        Self {
            inputs,
            returns: ReturnType::Scalar(output),
        }
    }

    /// Signature of a table function with one or more output columns.
    pub fn table(inputs: Vec<TypeDescriptor>, outputs: Vec<TypeDescriptor>) -> Self {
        Self {
            inputs,
            returns: ReturnType::Table(outputs),
        }
    }

    /// Declared input types in argument order.
    pub fn inputs(&self) -> &[TypeDescriptor] {
        &self.inputs
    }

    /// Declared output.
    pub fn returns(&self) -> &ReturnType {
        &self.returns
    }

    /// Kind implied by the declared output.
    pub fn kind(&self) -> FunctionKind {
        match self.returns {
            ReturnType::Scalar(_) => FunctionKind::Scalar,
            ReturnType::Table(_) => FunctionKind::Table,
        }
    }

    /// Output value types (one entry for scalar functions).
    pub fn output_types(&self) -> &[TypeDescriptor] {
        match &self.returns {
            ReturnType::Scalar(ty) => std::slice::from_ref(ty),
            ReturnType::Table(types) => types,
        }
    }

    /// Arrow fields of the declared inputs, named `arg0`, `arg1`, ...
    pub fn input_fields(&self) -> Vec<Field> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, ty)| ty.to_field(&format!("arg{i}")))
            .collect()
    }

    /// Value-column fields of the outbound batch.
    ///
    /// A single output column is named after the function; several are suffixed `_0`, `_1`, ...
    pub fn output_value_fields(&self, function: &str) -> Vec<Field> {
        let types = self.output_types();
        if types.len() == 1 {
            return vec![types[0].to_field(function)];
        }
        types
            .iter()
            .enumerate()
            .map(|(i, ty)| ty.to_field(&format!("{function}_{i}")))
            .collect()
    }

    /// Schema of the outbound batch, including `row_index` for table functions.
    pub fn output_schema(&self, function: &str) -> SchemaRef {
        let mut fields = Vec::with_capacity(self.output_types().len() + 1);
        if self.kind() == FunctionKind::Table {
            fields.push(Field::new(ROW_INDEX_COLUMN, DataType::Int32, false));
        }
        fields.extend(self.output_value_fields(function));
        Arc::new(Schema::new(fields))
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", format_type_list(&self.inputs))?;
        match &self.returns {
            ReturnType::Scalar(ty) => write!(f, " -> {ty}"),
            ReturnType::Table(types) => write!(f, " -> TABLE({})", format_type_list(types)),
        }
    }
}
