use arrow_schema::ArrowError;
use thiserror::Error;

/// Canonical FUS error taxonomy used across crates.
///
/// Classification guidance (see [`FusError::class`]):
/// - registration errors surface while a function is being registered and only
///   reject that one registration
/// - request errors reject one inbound batch; the service keeps serving
/// - execution errors come out of a function body while rows are processed
/// - internal errors are invariant violations or transport/IO failures
#[derive(Debug, Error)]
pub enum FusError {
    /// A type name outside the closed vocabulary.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Malformed composite type text (`VARCHAR[`, `STRUCT<>`, ...).
    ///
    /// `fragment` is the offending substring of the original input.
    #[error("type syntax error at `{fragment}`: {message}")]
    TypeSyntax { fragment: String, message: String },

    /// A definition with the same name and identical input types already exists.
    #[error("function {name}({inputs}) is already registered")]
    DuplicateSignature { name: String, inputs: String },

    /// No function registered under this name.
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    /// The name exists but no overload accepts the given input types.
    #[error("no overload of {name} accepts ({inputs})")]
    SignatureMismatch { name: String, inputs: String },

    /// An inbound column does not match the declared input type.
    ///
    /// Column count mismatches are reported at the first missing or extra column.
    #[error("type mismatch at column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: usize,
        expected: String,
        actual: String,
    },

    /// Malformed request envelope (descriptor path, overload selector, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A function body failed while processing one row.
    #[error("function {function} failed at row {row}: {message}")]
    ExecutionFault {
        function: String,
        row: usize,
        message: String,
    },

    /// A function body returned a value that does not fit its declared output type.
    #[error("function {function} returned {actual} at row {row}, declared {expected}")]
    ReturnTypeMismatch {
        function: String,
        row: usize,
        expected: String,
        actual: String,
    },

    /// The caller aborted the request before the batch finished.
    #[error("invocation cancelled")]
    Cancelled,

    /// Result count does not line up with the inbound row count.
    ///
    /// This is an engine bug, never a user error.
    #[error("arity error: expected {expected} results, got {actual}")]
    Arity { expected: usize, actual: usize },

    /// Invalid configuration values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Arrow array/batch construction failures.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`FusError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Raised while registering a function.
    Registration,
    /// Raised while validating a request; the batch is rejected.
    Request,
    /// Raised by or around a function body during execution.
    Execution,
    /// Engine invariant violations, transport and IO failures.
    Internal,
}

impl ErrorClass {
    /// Stable lowercase label (metrics, logs).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Registration => "registration",
            ErrorClass::Request => "request",
            ErrorClass::Execution => "execution",
            ErrorClass::Internal => "internal",
        }
    }
}

impl FusError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FusError::UnknownType(_)
            | FusError::TypeSyntax { .. }
            | FusError::DuplicateSignature { .. } => ErrorClass::Registration,
            FusError::FunctionNotFound(_)
            | FusError::SignatureMismatch { .. }
            | FusError::TypeMismatch { .. }
            | FusError::InvalidRequest(_) => ErrorClass::Request,
            FusError::ExecutionFault { .. }
            | FusError::ReturnTypeMismatch { .. }
            | FusError::Cancelled => ErrorClass::Execution,
            FusError::Arity { .. }
            | FusError::InvalidConfig(_)
            | FusError::Arrow(_)
            | FusError::Io(_) => ErrorClass::Internal,
        }
    }
}

/// Standard FUS result alias.
pub type Result<T> = std::result::Result<T, FusError>;
