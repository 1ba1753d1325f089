// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

/// Live counters only; nothing here is persisted.
pub struct MetricsCollector {
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub backend_score: IntGaugeVec,
    pub idle_workers: IntGauge,
    pub active_tunnels: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of requests"),
            &["frontend", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Request duration in seconds",
            ),
            &["frontend"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let backend_score = IntGaugeVec::new(
            Opts::new("lb_backend_score", "Current load score of each backend"),
            &["frontend", "backend"],
        )?;
        registry.register(Box::new(backend_score.clone()))?;

        let idle_workers = IntGauge::new("lb_idle_workers", "Workers not running a request")?;
        registry.register(Box::new(idle_workers.clone()))?;

        let active_tunnels = IntGauge::new("lb_active_tunnels", "Open WebSocket tunnels")?;
        registry.register(Box::new(active_tunnels.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            backend_score,
            idle_workers,
            active_tunnels,
        })
    }

    pub fn record_request(&self, frontend: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[frontend, &status])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[frontend])
            .observe(duration.as_secs_f64());
    }

    pub fn update_backend_score(&self, frontend: &str, backend: &str, score: u64) {
        self.backend_score
            .with_label_values(&[frontend, backend])
            .set(score as i64);
    }

    pub fn update_idle_workers(&self, idle: usize) {
        self.idle_workers.set(idle as i64);
    }
}

// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
