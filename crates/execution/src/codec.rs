//! Batch codec: Arrow record batches to rows of [`Value`] and back.
//!
//! Decode validates the inbound schema against a signature and yields a
//! row-indexed view. Encode builds the outbound batch for scalar results
//! (one value per input row) or table results (`row_index` column plus the
//! concatenated output tuples).

use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryBuilder, BooleanBuilder, Float32Builder, Float64Builder,
    Int16Builder, Int32Array, Int32Builder, Int64Builder, ListArray, RecordBatch,
    RecordBatchOptions, StringBuilder, StructArray,
};
use arrow::buffer::{NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::datatypes::{Fields, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Schema};
use arrow_schema::ArrowError;
use fus_common::{FusError, Result};
use fus_types::{BigDecimal, TypeDescriptor, Value, describe_field};

use crate::signature::FunctionSignature;

/// Row-indexed view over a decoded inbound batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBatch {
    rows: Vec<Vec<Value>>,
}

impl DecodedBatch {
    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Argument tuple of row `i`.
    pub fn row(&self, i: usize) -> &[Value] {
        &self.rows[i]
    }

    /// Argument tuples in row order.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
}

/// Describe every column of an inbound schema in vocabulary terms.
///
/// Fails with [`FusError::TypeMismatch`] at the first column whose Arrow type
/// is outside the vocabulary.
pub fn input_types(schema: &Schema) -> Result<Vec<TypeDescriptor>> {
    schema
        .fields()
        .iter()
        .enumerate()
        .map(|(column, field)| {
            TypeDescriptor::from_field(field).ok_or_else(|| FusError::TypeMismatch {
                column,
                expected: "a supported type".to_string(),
                actual: describe_field(field),
            })
        })
        .collect()
}

/// Validate `batch` against the declared inputs and produce the row view.
pub fn decode(batch: &RecordBatch, signature: &FunctionSignature) -> Result<DecodedBatch> {
    let declared = signature.inputs();
    let schema = batch.schema();
    let fields = schema.fields();

    for (column, expected) in declared.iter().enumerate() {
        let Some(field) = fields.get(column) else {
            return Err(FusError::TypeMismatch {
                column,
                expected: expected.to_string(),
                actual: "missing column".to_string(),
            });
        };
        if TypeDescriptor::from_field(field).as_ref() != Some(expected) {
            return Err(FusError::TypeMismatch {
                column,
                expected: expected.to_string(),
                actual: describe_field(field),
            });
        }
    }
    if fields.len() > declared.len() {
        return Err(FusError::TypeMismatch {
            column: declared.len(),
            expected: "no column".to_string(),
            actual: describe_field(&fields[declared.len()]),
        });
    }

    let num_rows = batch.num_rows();
    let mut columns = Vec::with_capacity(declared.len());
    for (column, ty) in declared.iter().enumerate() {
        columns.push(decode_array(batch.column(column).as_ref(), ty, column)?);
    }

    let mut iters = columns.into_iter().map(Vec::into_iter).collect::<Vec<_>>();
    let rows = (0..num_rows)
        .map(|_| {
            iters
                .iter_mut()
                .map(|it| it.next().unwrap_or(Value::Null))
                .collect::<Vec<_>>()
        })
        .collect();
    Ok(DecodedBatch { rows })
}

fn mismatch(column: usize, ty: &TypeDescriptor, array: &dyn Array) -> FusError {
    FusError::TypeMismatch {
        column,
        expected: ty.to_string(),
        actual: array.data_type().to_string(),
    }
}

macro_rules! decode_primitive {
    ($array:expr, $arrow_ty:ty, $variant:ident, $column:expr, $ty:expr) => {{
        let typed = $array
            .as_primitive_opt::<$arrow_ty>()
            .ok_or_else(|| mismatch($column, $ty, $array))?;
        typed
            .iter()
            .map(|v| v.map_or(Value::Null, Value::$variant))
            .collect::<Vec<_>>()
    }};
}

/// Plain decimal text only; exponent notation is rejected.
fn parse_plain_decimal(text: &str) -> Option<BigDecimal> {
    let text = text.trim();
    if text.contains(['e', 'E']) {
        return None;
    }
    BigDecimal::from_str(text).ok()
}

fn decode_array(array: &dyn Array, ty: &TypeDescriptor, column: usize) -> Result<Vec<Value>> {
    let values = match ty {
        TypeDescriptor::Boolean => array
            .as_boolean_opt()
            .ok_or_else(|| mismatch(column, ty, array))?
            .iter()
            .map(|v| v.map_or(Value::Null, Value::Boolean))
            .collect(),
        TypeDescriptor::Int16 => decode_primitive!(array, Int16Type, Int16, column, ty),
        TypeDescriptor::Int32 => decode_primitive!(array, Int32Type, Int32, column, ty),
        TypeDescriptor::Int64 => decode_primitive!(array, Int64Type, Int64, column, ty),
        TypeDescriptor::Float32 => decode_primitive!(array, Float32Type, Float32, column, ty),
        TypeDescriptor::Float64 => decode_primitive!(array, Float64Type, Float64, column, ty),
        TypeDescriptor::Decimal => array
            .as_string_opt::<i32>()
            .ok_or_else(|| mismatch(column, ty, array))?
            .iter()
            .map(|v| match v {
                None => Ok(Value::Null),
                Some(text) => parse_plain_decimal(text)
                    .map(Value::Decimal)
                    .ok_or_else(|| FusError::TypeMismatch {
                        column,
                        expected: ty.to_string(),
                        actual: format!("malformed decimal text '{text}'"),
                    }),
            })
            .collect::<Result<Vec<_>>>()?,
        TypeDescriptor::VarChar => array
            .as_string_opt::<i32>()
            .ok_or_else(|| mismatch(column, ty, array))?
            .iter()
            .map(|v| v.map_or(Value::Null, |s| Value::VarChar(s.to_string())))
            .collect(),
        TypeDescriptor::Bytes => array
            .as_binary_opt::<i32>()
            .ok_or_else(|| mismatch(column, ty, array))?
            .iter()
            .map(|v| v.map_or(Value::Null, |b| Value::Bytes(b.to_vec())))
            .collect(),
        TypeDescriptor::Array(element) => {
            let list = array
                .as_list_opt::<i32>()
                .ok_or_else(|| mismatch(column, ty, array))?;
            let mut out = Vec::with_capacity(list.len());
            for i in 0..list.len() {
                if list.is_null(i) {
                    out.push(Value::Null);
                } else {
                    let items = decode_array(list.value(i).as_ref(), element, column)?;
                    out.push(Value::Array(items));
                }
            }
            out
        }
        TypeDescriptor::Struct(fields) => {
            let structure = array
                .as_struct_opt()
                .ok_or_else(|| mismatch(column, ty, array))?;
            if structure.num_columns() != fields.len() {
                return Err(mismatch(column, ty, array));
            }
            let mut children = Vec::with_capacity(fields.len());
            for (field, child) in fields.iter().zip(structure.columns()) {
                children.push(decode_array(child.as_ref(), &field.ty, column)?.into_iter());
            }
            (0..structure.len())
                .map(|i| {
                    let values = children
                        .iter_mut()
                        .map(|it| it.next().unwrap_or(Value::Null))
                        .collect::<Vec<_>>();
                    if structure.is_null(i) {
                        Value::Null
                    } else {
                        Value::Struct(values)
                    }
                })
                .collect()
        }
    };
    Ok(values)
}

/// Flattened output of a table function, accumulated row by row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableOutput {
    row_index: Vec<i32>,
    columns: Vec<Vec<Value>>,
}

impl TableOutput {
    /// Empty accumulator for tuples of `width` values.
    pub fn new(width: usize) -> Self {
        Self {
            row_index: Vec::new(),
            columns: (0..width).map(|_| Vec::new()).collect(),
        }
    }

    /// Values per tuple.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Tuples accumulated so far.
    pub fn len(&self) -> usize {
        self.row_index.len()
    }

    /// Whether no tuple was accumulated.
    pub fn is_empty(&self) -> bool {
        self.row_index.is_empty()
    }

    /// Origin row of every accumulated tuple.
    pub fn row_index(&self) -> &[i32] {
        &self.row_index
    }

    /// Append one tuple produced by input row `origin`.
    pub fn push(&mut self, origin: usize, tuple: Vec<Value>) -> Result<()> {
        if tuple.len() != self.width() {
            return Err(FusError::Arity {
                expected: self.width(),
                actual: tuple.len(),
            });
        }
        let origin = i32::try_from(origin).map_err(|_| {
            FusError::Arrow(ArrowError::InvalidArgumentError(format!(
                "row index {origin} does not fit the row_index column"
            )))
        })?;
        self.row_index.push(origin);
        for (column, value) in self.columns.iter_mut().zip(tuple) {
            column.push(value);
        }
        Ok(())
    }

    /// Drop every tuple after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.row_index.truncate(len);
        for column in &mut self.columns {
            column.truncate(len);
        }
    }
}

/// Build the single-column outbound batch of a scalar function.
///
/// `results` must hold exactly one value per input row, in input order.
pub fn encode_scalar(
    function: &str,
    signature: &FunctionSignature,
    results: Vec<Value>,
    expected_rows: usize,
) -> Result<RecordBatch> {
    if results.len() != expected_rows {
        return Err(FusError::Arity {
            expected: expected_rows,
            actual: results.len(),
        });
    }
    let output_type = &signature.output_types()[0];
    let column = build_array(results, output_type)
        .map_err(|e| e.into_error(function, output_type, |position| position))?;
    Ok(RecordBatch::try_new(
        signature.output_schema(function),
        vec![column],
    )?)
}

/// Build the `row_index` + value-columns outbound batch of a table function.
pub fn encode_table(
    function: &str,
    signature: &FunctionSignature,
    output: TableOutput,
    input_rows: usize,
) -> Result<RecordBatch> {
    let output_types = signature.output_types();
    if output.width() != output_types.len() {
        return Err(FusError::Arity {
            expected: output_types.len(),
            actual: output.width(),
        });
    }
    let mut previous = 0_i32;
    for &origin in &output.row_index {
        if origin < previous || origin as usize >= input_rows {
            return Err(FusError::Arity {
                expected: input_rows,
                actual: origin as usize + 1,
            });
        }
        previous = origin;
    }

    let TableOutput { row_index, columns } = output;
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 1);
    for (values, ty) in columns.into_iter().zip(output_types) {
        let array = build_array(values, ty).map_err(|e| {
            e.into_error(function, ty, |position| {
                row_index.get(position).map_or(position, |&row| row as usize)
            })
        })?;
        arrays.push(array);
    }
    arrays.insert(0, Arc::new(Int32Array::from(row_index)));

    let options = RecordBatchOptions::new().with_row_count(Some(arrays[0].len()));
    Ok(RecordBatch::try_new_with_options(
        signature.output_schema(function),
        arrays,
        &options,
    )?)
}

enum BuildError {
    Mismatch { position: usize, actual: &'static str },
    Arrow(ArrowError),
}

impl BuildError {
    fn at(position: usize, value: &Value) -> Self {
        BuildError::Mismatch {
            position,
            actual: value.kind_name(),
        }
    }

    fn remap(self, owners: &[usize]) -> Self {
        match self {
            BuildError::Mismatch { position, actual } => BuildError::Mismatch {
                position: owners.get(position).copied().unwrap_or(position),
                actual,
            },
            other => other,
        }
    }

    fn into_error(
        self,
        function: &str,
        declared: &TypeDescriptor,
        to_row: impl Fn(usize) -> usize,
    ) -> FusError {
        match self {
            BuildError::Mismatch { position, actual } => FusError::ReturnTypeMismatch {
                function: function.to_string(),
                row: to_row(position),
                expected: declared.to_string(),
                actual: actual.to_string(),
            },
            BuildError::Arrow(e) => FusError::Arrow(e),
        }
    }
}

impl From<ArrowError> for BuildError {
    fn from(e: ArrowError) -> Self {
        BuildError::Arrow(e)
    }
}

macro_rules! build_primitive {
    ($values:expr, $builder:ty, $variant:ident) => {{
        let mut builder = <$builder>::with_capacity($values.len());
        for (i, value) in $values.into_iter().enumerate() {
            match value {
                Value::Null => builder.append_null(),
                Value::$variant(v) => builder.append_value(v),
                other => return Err(BuildError::at(i, &other)),
            }
        }
        Arc::new(builder.finish()) as ArrayRef
    }};
}

fn build_array(
    values: Vec<Value>,
    ty: &TypeDescriptor,
) -> std::result::Result<ArrayRef, BuildError> {
    let array = match ty {
        TypeDescriptor::Boolean => build_primitive!(values, BooleanBuilder, Boolean),
        TypeDescriptor::Int16 => build_primitive!(values, Int16Builder, Int16),
        TypeDescriptor::Int32 => build_primitive!(values, Int32Builder, Int32),
        TypeDescriptor::Int64 => build_primitive!(values, Int64Builder, Int64),
        TypeDescriptor::Float32 => build_primitive!(values, Float32Builder, Float32),
        TypeDescriptor::Float64 => build_primitive!(values, Float64Builder, Float64),
        TypeDescriptor::VarChar => {
            let mut builder = StringBuilder::with_capacity(values.len(), values.len() * 8);
            for (i, value) in values.into_iter().enumerate() {
                match value {
                    Value::Null => builder.append_null(),
                    Value::VarChar(s) => builder.append_value(s),
                    other => return Err(BuildError::at(i, &other)),
                }
            }
            Arc::new(builder.finish()) as ArrayRef
        }
        TypeDescriptor::Decimal => {
            let mut builder = StringBuilder::with_capacity(values.len(), values.len() * 16);
            for (i, value) in values.into_iter().enumerate() {
                match value {
                    Value::Null => builder.append_null(),
                    Value::Decimal(d) => builder.append_value(d.to_plain_string()),
                    other => return Err(BuildError::at(i, &other)),
                }
            }
            Arc::new(builder.finish()) as ArrayRef
        }
        TypeDescriptor::Bytes => {
            let mut builder = BinaryBuilder::with_capacity(values.len(), values.len() * 16);
            for (i, value) in values.into_iter().enumerate() {
                match value {
                    Value::Null => builder.append_null(),
                    Value::Bytes(b) => builder.append_value(b),
                    other => return Err(BuildError::at(i, &other)),
                }
            }
            Arc::new(builder.finish()) as ArrayRef
        }
        TypeDescriptor::Array(element) => {
            let mut offsets = Vec::with_capacity(values.len() + 1);
            offsets.push(0_i32);
            let mut validity = Vec::with_capacity(values.len());
            let mut items = Vec::new();
            let mut owners = Vec::new();
            for (i, value) in values.into_iter().enumerate() {
                match value {
                    Value::Null => validity.push(false),
                    Value::Array(children) => {
                        owners.extend(std::iter::repeat(i).take(children.len()));
                        items.extend(children);
                        validity.push(true);
                    }
                    other => return Err(BuildError::at(i, &other)),
                }
                let end = i32::try_from(items.len()).map_err(|_| {
                    ArrowError::InvalidArgumentError("list offsets overflow i32".to_string())
                })?;
                offsets.push(end);
            }
            let child = build_array(items, element).map_err(|e| e.remap(&owners))?;
            Arc::new(ListArray::try_new(
                Arc::new(element.to_field("item")),
                OffsetBuffer::new(ScalarBuffer::from(offsets)),
                child,
                Some(NullBuffer::from(validity)),
            )?) as ArrayRef
        }
        TypeDescriptor::Struct(fields) => {
            let mut validity = Vec::with_capacity(values.len());
            let mut columns = fields
                .iter()
                .map(|_| Vec::with_capacity(values.len()))
                .collect::<Vec<_>>();
            for (i, value) in values.into_iter().enumerate() {
                match value {
                    Value::Null => {
                        validity.push(false);
                        for column in &mut columns {
                            column.push(Value::Null);
                        }
                    }
                    Value::Struct(items) if items.len() == fields.len() => {
                        validity.push(true);
                        for (column, item) in columns.iter_mut().zip(items) {
                            column.push(item);
                        }
                    }
                    other => return Err(BuildError::at(i, &other)),
                }
            }
            let arrays = fields
                .iter()
                .zip(columns)
                .map(|(field, column)| build_array(column, &field.ty))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let arrow_fields = Fields::from(
                fields
                    .iter()
                    .map(|f| f.ty.to_field(&f.name))
                    .collect::<Vec<_>>(),
            );
            Arc::new(StructArray::try_new(
                arrow_fields,
                arrays,
                Some(NullBuffer::from(validity)),
            )?) as ArrayRef
        }
    };
    Ok(array)
}
