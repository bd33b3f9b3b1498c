#![deny(missing_docs)]

//! Function registry, batch codec and invocation engine.
//!
//! Architecture role:
//! - typed function definitions and their overload registry
//! - Arrow batch decode/encode against a declared signature
//! - per-row dispatch with null handling, error policy and cancellation
//!
//! Key modules:
//! - [`registry`]
//! - [`codec`]
//! - [`engine`]
//!
//! Feature flags:
//! - no crate-level flags; scalar parallelism is a runtime setting of
//!   [`fus_common::EngineConfig`].

pub mod codec;
pub mod context;
pub mod engine;
pub mod function;
pub mod registry;
pub mod signature;

// Re-export only what you want at the crate root (no globs).
pub use codec::{DecodedBatch, TableOutput, decode, encode_scalar, encode_table, input_types};
pub use context::{InvocationContext, SharedInvocationContext};
pub use engine::{InvocationEngine, InvocationOutcome, InvocationState, RowError};
pub use function::{
    BoxError, CallMode, FunctionBody, FunctionDefinition, FunctionResult, ScalarFunction,
    TableFunction, TableRows,
};
pub use registry::FunctionRegistry;
pub use signature::{FunctionKind, FunctionSignature, ROW_INDEX_COLUMN, ReturnType};
