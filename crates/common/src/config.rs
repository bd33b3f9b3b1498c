use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FusError, Result};

/// How a failing function body affects its batch.
///
/// Chosen once per deployment, never per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the whole batch on the first failing row.
    #[default]
    FailFast,
    /// Null the failing row (scalar) or drop its expansion (table) and continue.
    NullOnError,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::FailFast => f.write_str("fail_fast"),
            ErrorPolicy::NullOnError => f.write_str("null_on_error"),
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = FusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_fast" | "fail-fast" | "strict" => Ok(ErrorPolicy::FailFast),
            "null_on_error" | "null-on-error" | "lenient" => Ok(ErrorPolicy::NullOnError),
            other => Err(FusError::InvalidConfig(format!(
                "unknown error policy '{other}', expected fail_fast or null_on_error"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub error_policy: ErrorPolicy,
    /// Scalar batches with at least this many rows are evaluated on the rayon
    /// pool. `0` keeps every batch sequential.
    pub parallel_scalar_min_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::FailFast,
            parallel_scalar_min_rows: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Prometheus exporter bind address (`profiling` builds only).
    pub metrics_addr: Option<String>,
    /// Upper bound on rows per outbound Flight batch; `0` sends each result whole.
    pub max_output_batch_rows: usize,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8815".to_string(),
            metrics_addr: None,
            max_output_batch_rows: 8192,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file. Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            FusError::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_policy_parses_aliases() {
        assert_eq!("fail_fast".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::FailFast);
        assert_eq!(
            " Null-On-Error ".parse::<ErrorPolicy>().unwrap(),
            ErrorPolicy::NullOnError
        );
        assert!("sometimes".parse::<ErrorPolicy>().is_err());
    }

    #[test]
    fn server_config_fills_missing_keys_with_defaults() {
        let cfg: ServerConfig =
            serde_json::from_str(r#"{"engine": {"error_policy": "null_on_error"}}"#).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8815");
        assert_eq!(cfg.engine.error_policy, ErrorPolicy::NullOnError);
        assert_eq!(cfg.engine.parallel_scalar_min_rows, 0);
    }
}
