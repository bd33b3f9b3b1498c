//! Function bodies and definitions.

use std::fmt;
use std::sync::Arc;

use fus_types::{TypeDescriptor, Value};

use crate::signature::{FunctionKind, FunctionSignature};

/// Error type returned by function bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by function bodies.
pub type FunctionResult<T> = std::result::Result<T, BoxError>;

/// Finite, non-restartable sequence of output tuples produced for one input row.
pub type TableRows = Box<dyn Iterator<Item = FunctionResult<Vec<Value>>> + Send>;

/// Runtime scalar function contract: one row in, one value out.
pub trait ScalarFunction: Send + Sync {
    /// Evaluate one row. `args` follows the declared input order.
    fn call(&self, args: &[Value]) -> FunctionResult<Value>;
}

impl<F> ScalarFunction for F
where
    F: Fn(&[Value]) -> FunctionResult<Value> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> FunctionResult<Value> {
        self(args)
    }
}

/// Runtime table function contract: one row in, a lazy sequence of tuples out.
pub trait TableFunction: Send + Sync {
    /// Start the expansion of one row. The engine drains the returned
    /// iterator before moving on to the next row.
    fn call(&self, args: &[Value]) -> FunctionResult<TableRows>;
}

impl<F> TableFunction for F
where
    F: Fn(&[Value]) -> FunctionResult<TableRows> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> FunctionResult<TableRows> {
        self(args)
    }
}

/// Whether a body runs when some of its arguments are null.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallMode {
    /// The body is called normally and handles nulls itself.
    #[default]
    CalledOnNullInput,
    /// The body is skipped for rows with a null argument: scalar functions
    /// yield null, table functions yield no rows.
    ReturnNullOnNullInput,
}

/// Callable part of a definition.
#[derive(Clone)]
pub enum FunctionBody {
    /// Scalar body.
    Scalar(Arc<dyn ScalarFunction>),
    /// Table body.
    Table(Arc<dyn TableFunction>),
}

impl FunctionBody {
    /// Kind of this body.
    pub fn kind(&self) -> FunctionKind {
        match self {
            FunctionBody::Scalar(_) => FunctionKind::Scalar,
            FunctionBody::Table(_) => FunctionKind::Table,
        }
    }
}

impl fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionBody::Scalar(_) => f.write_str("FunctionBody::Scalar(..)"),
            FunctionBody::Table(_) => f.write_str("FunctionBody::Table(..)"),
        }
    }
}

/// A registered function: name, signature, body and call mode.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    name: String,
    signature: FunctionSignature,
    body: FunctionBody,
    call_mode: CallMode,
}

impl FunctionDefinition {
    /// Scalar definition.
    pub fn scalar(
        name: impl Into<String>,
        inputs: Vec<TypeDescriptor>,
        output: TypeDescriptor,
        body: impl ScalarFunction + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            signature: FunctionSignature::scalar(inputs, output),
            body: FunctionBody::Scalar(Arc::new(body)),
            call_mode: CallMode::default(),
        }
    }

    /// Table definition with one entry per output column.
    pub fn table(
        name: impl Into<String>,
        inputs: Vec<TypeDescriptor>,
        outputs: Vec<TypeDescriptor>,
        body: impl TableFunction + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            signature: FunctionSignature::table(inputs, outputs),
            body: FunctionBody::Table(Arc::new(body)),
            call_mode: CallMode::default(),
        }
    }

    /// Replace the call mode.
    pub fn with_call_mode(mut self, call_mode: CallMode) -> Self {
        self.call_mode = call_mode;
        self
    }

    /// Case-sensitive function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared signature.
    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    /// Callable body.
    pub fn body(&self) -> &FunctionBody {
        &self.body
    }

    /// Null handling mode.
    pub fn call_mode(&self) -> CallMode {
        self.call_mode
    }

    /// Scalar or table.
    pub fn kind(&self) -> FunctionKind {
        self.body.kind()
    }
}
