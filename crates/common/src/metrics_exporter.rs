use std::io;
use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::net::TcpListener;

use crate::metrics::global_metrics;

pub async fn run_metrics_exporter(addr: SocketAddr) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_metrics_listener(listener).await
}

pub async fn serve_metrics_listener(listener: TcpListener) -> io::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler));
    axum::serve(listener, app).await.map_err(io::Error::other)
}

async fn metrics_handler() -> String {
    global_metrics().render_prometheus()
}

async fn health_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::{health_handler, metrics_handler};
    use crate::metrics::global_metrics;

    #[tokio::test]
    async fn metrics_handler_returns_prometheus_text() {
        global_metrics().record_invocation("hex_to_dec", "scalar", 4, 4, 0.001);
        let body = metrics_handler().await;
        assert!(body.contains("fus_rows_in_total"));
        assert!(body.contains("hex_to_dec"));
        assert_eq!(health_handler().await, "ok");
    }
}
