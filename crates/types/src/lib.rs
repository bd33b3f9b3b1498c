//! Type vocabulary and row values for FUS.
//!
//! Architecture role:
//! - [`TypeDescriptor`]: the closed set of types a function signature may use,
//!   its textual grammar and its Arrow wire mapping
//! - [`Value`]: dynamic row values handed to function bodies
//!
//! Key modules:
//! - [`descriptor`]
//! - [`value`]
//! - `parse` (textual grammar, reached through [`TypeDescriptor::parse`])

pub mod descriptor;
mod parse;
pub mod value;

pub use bigdecimal::BigDecimal;
pub use descriptor::{
    DECIMAL_EXTENSION_NAME, EXTENSION_NAME_KEY, StructField, TypeDescriptor, describe_field,
    format_type_list,
};
pub use value::Value;
