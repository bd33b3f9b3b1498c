//! Shared configuration, error types, and observability primitives for FUS crates.
//!
//! Architecture role:
//! - defines engine/server configuration passed across layers
//! - provides the common [`FusError`] / [`Result`] contracts
//! - hosts metrics and optional exporter utilities
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`metrics`]
//! - `metrics_exporter` (feature-gated)
//!
//! Feature flags:
//! - `profiling`: enables the metrics HTTP exporter helpers.

pub mod config;
pub mod error;
pub mod metrics;
#[cfg(feature = "profiling")]
pub mod metrics_exporter;

pub use config::{EngineConfig, ErrorPolicy, ServerConfig};
pub use error::{ErrorClass, FusError, Result};
pub use metrics::{MetricsRegistry, global_metrics};
#[cfg(feature = "profiling")]
pub use metrics_exporter::run_metrics_exporter;
