//! Monitoring surface: append-only notify sinks for per-batch metrics and
//! error records, with in-memory, JSONL file-backed, and Prometheus-registry
//! implementations.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::context::{Context, DataType, StageType};
use crate::errors::CategorizedError;
use crate::metrics;

/// One error-log row, keyed by lineage.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorLog {
    pub project_id: u64,
    pub job_id: u64,
    pub task_id: u64,
    pub data_type: DataType,
    pub stage_type: Option<StageType>,
    pub error_type: String,
    pub error_code: u16,
    pub error_description: String,
    pub dt_error: DateTime<Utc>,
}

impl ErrorLog {
    pub fn from_categorized(context: &Context, error: &CategorizedError) -> Self {
        Self {
            project_id: context.project_id,
            job_id: context.job_id,
            task_id: context.task_id,
            data_type: context.data_type,
            stage_type: context.stage,
            error_type: error.category.label().to_string(),
            error_code: error.code(),
            error_description: error.message.clone(),
            dt_error: Utc::now(),
        }
    }
}

/// One extract-metrics row: per-batch latency and throughput distributions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractMetrics {
    pub project_id: u64,
    pub job_id: u64,
    pub task_id: u64,
    pub data_type: Option<DataType>,
    pub stage_type: Option<StageType>,
    pub requests: usize,
    pub dt_started: Option<DateTime<Utc>>,
    pub dt_ended: Option<DateTime<Utc>>,
    pub duration: f64,
    pub latency_min: f64,
    pub latency_average: f64,
    pub latency_median: f64,
    pub latency_max: f64,
    pub latency_std: f64,
    pub throughput_min: f64,
    pub throughput_average: f64,
    pub throughput_median: f64,
    pub throughput_max: f64,
    pub throughput_std: f64,
    /// Ratio of summed latency to wall duration: effective parallelism.
    pub speedup: f64,
    /// Total response size in bytes.
    pub size: f64,
}

/// Append-only metrics sink. At most one row is persisted per call.
pub trait MetricsSink: Send + Sync {
    fn add(&self, metrics: ExtractMetrics);
}

/// Append-only error sink. At most one row is persisted per call.
pub trait ErrorSink: Send + Sync {
    fn add(&self, error: ErrorLog);
}

/// In-memory sinks, used in tests and as a default wiring.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    rows: Mutex<Vec<ExtractMetrics>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<ExtractMetrics> {
        self.rows.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn add(&self, metrics: ExtractMetrics) {
        self.rows.lock().unwrap().push(metrics);
    }
}

#[derive(Debug, Default)]
pub struct InMemoryErrorSink {
    rows: Mutex<Vec<ErrorLog>>,
}

impl InMemoryErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<ErrorLog> {
        self.rows.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for InMemoryErrorSink {
    fn add(&self, error: ErrorLog) {
        self.rows.lock().unwrap().push(error);
    }
}

/// File-backed sink appending one JSON document per line.
///
/// A row that cannot be serialized or written is dropped with a warning;
/// monitoring must never take the acquisition path down.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    fn append<T: Serialize>(&self, row: &T) {
        let _guard = self.guard.lock().unwrap();
        let line = match serde_json::to_string(row) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Dropping unserializable monitor row");
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to append monitor row");
        }
    }
}

impl MetricsSink for JsonlSink {
    fn add(&self, metrics: ExtractMetrics) {
        self.append(&metrics);
    }
}

impl ErrorSink for JsonlSink {
    fn add(&self, error: ErrorLog) {
        self.append(&error);
    }
}

/// Sink mirroring rows into the in-process Prometheus registry.
#[derive(Debug, Default)]
pub struct PrometheusSink;

impl PrometheusSink {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsSink for PrometheusSink {
    fn add(&self, m: ExtractMetrics) {
        let stage = m.stage_type.map(|s| s.label()).unwrap_or("unknown");
        metrics::BATCHES_TOTAL.with_label_values(&[stage]).inc();
        metrics::BATCH_REQUESTS_TOTAL
            .with_label_values(&[stage])
            .inc_by(m.requests as u64);
        metrics::BATCH_DURATION_SECONDS.observe(m.duration);
        if m.latency_average > 0.0 {
            metrics::BATCH_LATENCY_SECONDS.observe(m.latency_average);
        }
        metrics::BATCH_SPEEDUP.set(m.speedup);
    }
}

impl ErrorSink for PrometheusSink {
    fn add(&self, e: ErrorLog) {
        metrics::ACQUISITION_ERRORS_TOTAL
            .with_label_values(&[&e.error_type])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Category;
    use crate::errors::ErrorCategory;

    fn sample_metrics() -> ExtractMetrics {
        ExtractMetrics {
            project_id: 1,
            job_id: 2,
            task_id: 3,
            data_type: Some(DataType::AppData),
            stage_type: Some(StageType::Extract),
            requests: 10,
            duration: 0.5,
            latency_average: 0.1,
            speedup: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_in_memory_sinks_append() {
        let metrics_sink = InMemoryMetricsSink::new();
        metrics_sink.add(sample_metrics());
        metrics_sink.add(sample_metrics());
        assert_eq!(metrics_sink.len(), 2);
        assert_eq!(metrics_sink.rows()[0].requests, 10);

        let error_sink = InMemoryErrorSink::new();
        let context = Context::new(1, 2, Category::BOOKS, DataType::AppData);
        let err = CategorizedError {
            category: ErrorCategory::ServerError,
            status_code: Some(503),
            message: "unavailable".to_string(),
        };
        error_sink.add(ErrorLog::from_categorized(&context, &err));
        assert_eq!(error_sink.len(), 1);
        assert_eq!(error_sink.rows()[0].error_code, 503);
        assert_eq!(error_sink.rows()[0].error_type, "server_error");
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let sink = JsonlSink::new(&path);
        MetricsSink::add(&sink, sample_metrics());
        MetricsSink::add(&sink, sample_metrics());

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let row: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(row["requests"], 10);
        assert_eq!(row["stage_type"], "extract");
    }
}
