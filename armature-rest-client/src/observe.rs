//! Call observation hooks.
//!
//! Observers see one [`CallRecord`] per completed proxy call. They cannot
//! change the call's outcome.

use http::Method;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{ErrorKind, RestClientError};

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOutcome {
    /// 2xx or 3xx response.
    Success,
    /// 4xx response.
    ClientError,
    /// 5xx response.
    ServerError,
    /// Attempt or call deadline exceeded.
    Timeout,
    /// Connection could not be established or was reset.
    ConnectionError,
    /// Rejected by an open circuit breaker.
    CircuitOpen,
    /// Body could not be encoded or decoded.
    EncodingError,
    /// Anything else.
    Error,
}

impl CallOutcome {
    /// Classify a call result.
    pub fn of<T>(result: &Result<T, RestClientError>) -> Self {
        let Err(error) = result else {
            return Self::Success;
        };

        match error.kind() {
            ErrorKind::CircuitOpen => Self::CircuitOpen,
            ErrorKind::Encoding => Self::EncodingError,
            _ if error.is_timeout() => Self::Timeout,
            _ => match error.status_code() {
                Some(status) if status >= 500 => Self::ServerError,
                Some(status) if status >= 400 => Self::ClientError,
                _ if error.is_connection() => Self::ConnectionError,
                _ => Self::Error,
            },
        }
    }

    /// Label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::ClientError => "CLIENT_ERROR",
            Self::ServerError => "SERVER_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::EncodingError => "ENCODING_ERROR",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one completed call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Service name.
    pub service: Arc<str>,
    /// Endpoint name.
    pub endpoint: String,
    /// HTTP method.
    pub method: Method,
    /// Path template, not the rendered path, to keep label cardinality low.
    pub uri: String,
    /// Outcome.
    pub outcome: CallOutcome,
    /// Status of the last response, if any.
    pub status: Option<u16>,
    /// Transport attempts made.
    pub attempts: u32,
    /// Wall time of the whole call.
    pub latency: Duration,
}

/// Receives a record of every completed call.
pub trait CallObserver: Send + Sync {
    /// Called once per call, after it completed.
    fn on_call_complete(&self, record: &CallRecord);
}

impl<F> CallObserver for F
where
    F: Fn(&CallRecord) + Send + Sync,
{
    fn on_call_complete(&self, record: &CallRecord) {
        self(record)
    }
}

#[cfg(feature = "prometheus")]
pub use self::metrics::PrometheusObserver;

#[cfg(feature = "prometheus")]
mod metrics {
    use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

    use super::{CallObserver, CallRecord};
    use crate::{RestClientError, Result};

    const LABELS: &[&str] = &["service", "endpoint", "method", "uri", "outcome"];

    /// Records call latency and counts in Prometheus.
    #[derive(Debug, Clone)]
    pub struct PrometheusObserver {
        duration: HistogramVec,
        calls: IntCounterVec,
    }

    impl PrometheusObserver {
        /// Register the metrics in `registry`.
        pub fn new(registry: &Registry) -> Result<Self> {
            let duration = HistogramVec::new(
                HistogramOpts::new(
                    "http_client_request_duration_seconds",
                    "REST client call duration in seconds",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                LABELS,
            )
            .map_err(metrics_error)?;
            let calls = IntCounterVec::new(
                Opts::new("http_client_requests_total", "Total REST client calls"),
                LABELS,
            )
            .map_err(metrics_error)?;

            registry
                .register(Box::new(duration.clone()))
                .map_err(metrics_error)?;
            registry
                .register(Box::new(calls.clone()))
                .map_err(metrics_error)?;

            Ok(Self { duration, calls })
        }

        /// Register the metrics in the default registry.
        pub fn with_default_registry() -> Result<Self> {
            Self::new(prometheus::default_registry())
        }
    }

    fn metrics_error(e: prometheus::Error) -> RestClientError {
        RestClientError::config(format!("failed to register metrics: {e}"))
    }

    impl CallObserver for PrometheusObserver {
        fn on_call_complete(&self, record: &CallRecord) {
            let labels = [
                record.service.as_ref(),
                record.endpoint.as_str(),
                record.method.as_str(),
                record.uri.as_str(),
                record.outcome.as_str(),
            ];
            self.duration
                .with_label_values(&labels)
                .observe(record.latency.as_secs_f64());
            self.calls.with_label_values(&labels).inc();
        }
    }
}
