use std::sync::{Arc, OnceLock};

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    invocations: CounterVec,
    rows_in: CounterVec,
    rows_out: CounterVec,
    nulled_rows: CounterVec,
    errors: CounterVec,
    invocation_seconds: HistogramVec,
    registered_functions: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Record one successfully encoded batch.
    pub fn record_invocation(
        &self,
        function: &str,
        kind: &str,
        rows_in: u64,
        rows_out: u64,
        secs: f64,
    ) {
        self.inner
            .invocations
            .with_label_values(&[function, kind])
            .inc();
        self.inner
            .rows_in
            .with_label_values(&[function])
            .inc_by(rows_in as f64);
        self.inner
            .rows_out
            .with_label_values(&[function])
            .inc_by(rows_out as f64);
        self.inner
            .invocation_seconds
            .with_label_values(&[function])
            .observe(secs.max(0.0));
    }

    /// Rows nulled (or expansions dropped) under the lenient error policy.
    pub fn record_nulled_rows(&self, function: &str, rows: u64) {
        if rows == 0 {
            return;
        }
        self.inner
            .nulled_rows
            .with_label_values(&[function])
            .inc_by(rows as f64);
    }

    /// Record a rejected batch. `phase` is the invocation state that failed.
    pub fn record_error(&self, function: &str, class: &str, phase: &str) {
        self.inner
            .errors
            .with_label_values(&[function, class, phase])
            .inc();
    }

    pub fn set_registered_functions(&self, kind: &str, count: u64) {
        self.inner
            .registered_functions
            .with_label_values(&[kind])
            .set(count as f64);
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let invocations = counter_vec(
            &registry,
            "fus_invocations_total",
            "Batches successfully processed per function",
            &["function", "kind"],
        );
        let rows_in = counter_vec(
            &registry,
            "fus_rows_in_total",
            "Input rows processed per function",
            &["function"],
        );
        let rows_out = counter_vec(
            &registry,
            "fus_rows_out_total",
            "Output rows produced per function",
            &["function"],
        );
        let nulled_rows = counter_vec(
            &registry,
            "fus_nulled_rows_total",
            "Rows replaced by null after a function fault",
            &["function"],
        );
        let errors = counter_vec(
            &registry,
            "fus_errors_total",
            "Rejected batches per function, error class and phase",
            &["function", "class", "phase"],
        );
        let invocation_seconds = histogram_vec(
            &registry,
            "fus_invocation_seconds",
            "Wall time spent per batch invocation",
            &["function"],
        );
        let registered_functions = gauge_vec(
            &registry,
            "fus_registered_functions",
            "Registered function definitions",
            &["kind"],
        );

        Self {
            registry,
            invocations,
            rows_in,
            rows_out,
            nulled_rows,
            errors,
            invocation_seconds,
            registered_functions,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_prometheus_text() {
        let m = MetricsRegistry::new();
        m.record_invocation("gcd", "scalar", 2, 2, 0.001);
        let text = m.render_prometheus();
        assert!(text.contains("fus_invocations_total"));
        assert!(text.contains("gcd"));
    }

    #[test]
    fn renders_all_metric_families() {
        let m = MetricsRegistry::new();
        m.record_invocation("series", "table", 2, 3, 0.002);
        m.record_nulled_rows("series", 1);
        m.record_error("series", "execution", "executing");
        m.set_registered_functions("table", 2);
        let text = m.render_prometheus();

        assert!(text.contains("fus_invocations_total"));
        assert!(text.contains("fus_rows_in_total"));
        assert!(text.contains("fus_rows_out_total"));
        assert!(text.contains("fus_nulled_rows_total"));
        assert!(text.contains("fus_errors_total"));
        assert!(text.contains("fus_invocation_seconds"));
        assert!(text.contains("fus_registered_functions"));
    }

    #[test]
    fn zero_nulled_rows_creates_no_series() {
        let m = MetricsRegistry::new();
        m.record_nulled_rows("gcd", 0);
        assert!(!m.render_prometheus().contains("fus_nulled_rows_total{"));
    }
}
