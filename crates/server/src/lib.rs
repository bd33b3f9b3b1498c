#![deny(missing_docs)]

//! Arrow Flight endpoint and demo function library.
//!
//! Architecture role:
//! - exposes an [`fus_execution::InvocationEngine`] over Arrow Flight
//! - maps engine errors to gRPC status codes
//! - ships the demo functions served by the `fus-server` binary
//!
//! Key modules:
//! - [`flight`]
//! - [`demo`]
//!
//! Feature flags:
//! - `profiling`: lets the binary serve Prometheus metrics over HTTP.

pub mod demo;
pub mod flight;

pub use demo::register_demo_functions;
pub use flight::{UdfFlightService, function_schema, to_status};
