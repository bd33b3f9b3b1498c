use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use fus_common::{ErrorPolicy, ServerConfig, global_metrics};
use fus_execution::{FunctionKind, FunctionRegistry, InvocationEngine};
use fus_server::{UdfFlightService, register_demo_functions};
use tonic::transport::Server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse::<usize>().ok())
}

fn load_config() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = match env::var("FUS_CONFIG_PATH") {
        Ok(path) => ServerConfig::load(&path)?,
        Err(_) => ServerConfig::default(),
    };
    if let Ok(addr) = env::var("FUS_LISTEN_ADDR") {
        config.listen_addr = addr;
    }
    if let Ok(policy) = env::var("FUS_ERROR_POLICY") {
        config.engine.error_policy = policy.parse::<ErrorPolicy>()?;
    }
    if let Some(rows) = env_usize("FUS_PARALLEL_MIN_ROWS") {
        config.engine.parallel_scalar_min_rows = rows;
    }
    if let Some(rows) = env_usize("FUS_MAX_OUTPUT_BATCH_ROWS") {
        config.max_output_batch_rows = rows;
    }
    if let Ok(addr) = env::var("FUS_METRICS_ADDR") {
        config.metrics_addr = Some(addr);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let addr: SocketAddr = config.listen_addr.parse()?;

    let mut registry = FunctionRegistry::new();
    let skipped = register_demo_functions(&mut registry);
    for kind in [FunctionKind::Scalar, FunctionKind::Table] {
        global_metrics().set_registered_functions(kind.as_str(), registry.count(kind) as u64);
    }

    #[cfg(feature = "profiling")]
    if let Some(metrics_addr) = config.metrics_addr.as_deref() {
        let metrics_addr: SocketAddr = metrics_addr.parse()?;
        tokio::spawn(async move {
            if let Err(err) = fus_common::run_metrics_exporter(metrics_addr).await {
                warn!(error = %err, "metrics exporter stopped");
            }
        });
        info!(%metrics_addr, "metrics exporter started");
    }
    #[cfg(not(feature = "profiling"))]
    if config.metrics_addr.is_some() {
        warn!("FUS_METRICS_ADDR ignored: built without the profiling feature");
    }

    let engine = InvocationEngine::new(Arc::new(registry), config.engine.clone());
    let service = UdfFlightService::new(engine)
        .with_max_output_batch_rows(config.max_output_batch_rows);

    info!(
        %addr,
        error_policy = %config.engine.error_policy,
        parallel_scalar_min_rows = config.engine.parallel_scalar_min_rows,
        skipped_registrations = skipped.len(),
        "fus-server started"
    );
    Server::builder()
        .add_service(service.into_server())
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}
