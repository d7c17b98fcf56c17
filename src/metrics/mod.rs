//! Prometheus metrics for the spanwire proxy
//!
//! Exposes metrics via HTTP endpoint for Prometheus scraping.

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::OnceLock;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics::try_new().expect("static metric definitions are valid"))
}

/// spanwire metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Connection metrics
    /// Total client connections accepted
    pub connections_total: IntCounter,
    /// Current active client connections
    pub connections_active: IntGauge,
    /// Total client connections closed
    pub connections_closed: IntCounter,
    /// Handshakes rejected for bad credentials
    pub auth_failures_total: IntCounter,
    /// Connections upgraded to TLS
    pub tls_upgrades_total: IntCounter,

    // Query metrics
    /// Statements processed by route
    pub queries_total: IntCounterVec,
    /// Statement latency histogram (in seconds) by route
    pub query_duration_seconds: HistogramVec,
    /// Statement errors by kind
    pub query_errors_total: IntCounterVec,
}

impl Metrics {
    /// Create and register every metric
    pub fn try_new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections_total = IntCounter::new(
            "spanwire_connections_total",
            "Total number of client connections accepted",
        )?;
        let connections_active = IntGauge::new(
            "spanwire_connections_active",
            "Current number of active client connections",
        )?;
        let connections_closed = IntCounter::new(
            "spanwire_connections_closed_total",
            "Total number of client connections closed",
        )?;
        let auth_failures_total = IntCounter::new(
            "spanwire_auth_failures_total",
            "Total number of rejected client credentials",
        )?;
        let tls_upgrades_total = IntCounter::new(
            "spanwire_tls_upgrades_total",
            "Total number of connections upgraded to TLS",
        )?;

        let queries_total = IntCounterVec::new(
            Opts::new("spanwire_queries_total", "Total number of statements processed"),
            &["route"], // translated, bypass, execute
        )?;
        let query_duration_seconds = HistogramVec::new(
            HistogramOpts::new("spanwire_query_duration_seconds", "Statement latency in seconds")
                .buckets(vec![
                    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
                    5.0, 10.0,
                ]),
            &["route"],
        )?;
        let query_errors_total = IntCounterVec::new(
            Opts::new("spanwire_query_errors_total", "Total number of statement errors"),
            &["kind"], // parse_error, variable_error, backend_error, encode_error
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(connections_closed.clone()))?;
        registry.register(Box::new(auth_failures_total.clone()))?;
        registry.register(Box::new(tls_upgrades_total.clone()))?;
        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_duration_seconds.clone()))?;
        registry.register(Box::new(query_errors_total.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            connections_closed,
            auth_failures_total,
            tls_upgrades_total,
            queries_total,
            query_duration_seconds,
            query_errors_total,
        })
    }

    /// Record one statement
    pub fn record_query(&self, route: &str, duration_secs: f64) {
        self.queries_total.with_label_values(&[route]).inc();
        self.query_duration_seconds
            .with_label_values(&[route])
            .observe(duration_secs);
    }

    /// Record a statement error
    pub fn record_query_error(&self, kind: &str) {
        self.query_errors_total.with_label_values(&[kind]).inc();
    }

    /// Record a new connection
    pub fn record_connection_accepted(&self) {
        self.connections_total.inc();
        self.connections_active.inc();
    }

    /// Record a connection closed
    pub fn record_connection_closed(&self) {
        self.connections_active.dec();
        self.connections_closed.inc();
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures_total.inc();
    }

    pub fn record_tls_upgrade(&self) {
        self.tls_upgrades_total.inc();
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tracing::{error, info};

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    async fn handle_request(
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        match req.uri().path() {
            "/metrics" => {
                let mut response = respond(StatusCode::OK, metrics().gather());
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                );
                Ok(response)
            }
            "/health" => Ok(respond(StatusCode::OK, "OK")),
            _ => Ok(respond(StatusCode::NOT_FOUND, "Not Found")),
        }
    }

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!(error = %e, "Metrics server connection error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_recorded_series() {
        let metrics = Metrics::try_new().unwrap();
        metrics.record_connection_accepted();
        metrics.record_query("execute", 0.002);
        metrics.record_query_error("backend_error");

        let text = metrics.gather();
        assert!(text.contains("spanwire_connections_active 1"));
        assert!(text.contains("spanwire_queries_total{route=\"execute\"} 1"));
        assert!(text.contains("spanwire_query_errors_total{kind=\"backend_error\"} 1"));

        metrics.record_connection_closed();
        assert!(metrics.gather().contains("spanwire_connections_active 0"));
    }
}
