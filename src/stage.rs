//! ETL stages: extract over the dispatch session, transform into typed
//! entities, load into the repository, plus the monitoring wrapper that
//! turns each extract batch into an `ExtractMetrics` row.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::entity::{AppData, AppReview, Entities, RawAppData, RawAppReview};
use crate::errors::StageError;
use crate::monitor::{ExtractMetrics, MetricsSink};
use crate::profile::SessionStats;
use crate::repo::ContentRepository;
use crate::request::AsyncRequest;
use crate::response::AsyncResponse;
use crate::session::AsyncSession;
use crate::context::{DataType, StageType};

/// Extract: one dispatched batch. Fatal failures (no session) propagate.
pub struct ExtractStage {
    session: AsyncSession,
}

impl ExtractStage {
    pub fn new(session: AsyncSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &AsyncSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut AsyncSession {
        &mut self.session
    }

    pub async fn run(&mut self, async_request: &AsyncRequest) -> Result<AsyncResponse, StageError> {
        let mut staged = async_request.clone();
        staged.context = staged.context.for_stage(StageType::Extract);
        let response = self.session.get(&staged).await?;
        debug!(
            requests = response.request_count,
            responses = response.response_count(),
            records = response.record_count(),
            "Extract batch complete"
        );
        Ok(response)
    }
}

/// Monitoring wrapper around the extract stage.
///
/// Computes the per-batch latency and throughput distributions, speedup
/// (summed latency over wall duration) and total size, and hands the row to
/// the metrics sink. Failed slots contribute to nothing but the request
/// count.
pub struct MonitoredExtract {
    inner: ExtractStage,
    sink: Arc<dyn MetricsSink>,
}

impl MonitoredExtract {
    pub fn new(inner: ExtractStage, sink: Arc<dyn MetricsSink>) -> Self {
        Self { inner, sink }
    }

    pub fn inner(&self) -> &ExtractStage {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut ExtractStage {
        &mut self.inner
    }

    pub async fn run(&mut self, async_request: &AsyncRequest) -> Result<AsyncResponse, StageError> {
        let dt_started = Utc::now();
        let started = std::time::Instant::now();

        let response = self.inner.run(async_request).await?;

        let duration = started.elapsed().as_secs_f64();
        let latencies: Vec<f64> = response.arrived().map(|r| r.latency).collect();
        let throughputs: Vec<f64> = latencies
            .iter()
            .filter(|l| **l > 0.0)
            .map(|l| 1.0 / l)
            .collect();
        let latency_stats = SessionStats::from_samples(&latencies);
        let throughput_stats = SessionStats::from_samples(&throughputs);
        let total_latency: f64 = latencies.iter().sum();
        let size: f64 = response.arrived().map(|r| r.headers.size as f64).sum();

        let context = &response.context;
        self.sink.add(ExtractMetrics {
            project_id: context.project_id,
            job_id: context.job_id,
            task_id: context.task_id,
            data_type: Some(context.data_type),
            stage_type: context.stage,
            requests: response.request_count,
            dt_started: Some(dt_started),
            dt_ended: Some(Utc::now()),
            duration,
            latency_min: latency_stats.min,
            latency_average: latency_stats.average,
            latency_median: latency_stats.median,
            latency_max: latency_stats.max,
            latency_std: latency_stats.std,
            throughput_min: throughput_stats.min,
            throughput_average: throughput_stats.average,
            throughput_median: throughput_stats.median,
            throughput_max: throughput_stats.max,
            throughput_std: throughput_stats.std,
            speedup: if duration > 0.0 {
                total_latency / duration
            } else {
                0.0
            },
            size,
        });

        Ok(response)
    }
}

/// Outcome of a transform pass: the surviving entities and the number of
/// records that failed validation.
#[derive(Debug)]
pub struct TransformOutcome {
    pub entities: Entities,
    pub records_in: usize,
    pub errors: usize,
}

/// Transform: validate every record of every arrived response and map it to
/// its typed entity. Per-record failures are counted, not fatal; a non-empty
/// batch yielding nothing at all is.
#[derive(Debug, Default)]
pub struct TransformStage;

impl TransformStage {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, async_response: &AsyncResponse) -> Result<TransformOutcome, StageError> {
        let outcome = match async_response.context.data_type {
            DataType::AppData => self.transform_apps(async_response),
            DataType::AppReview => self.transform_reviews(async_response),
        };

        if outcome.records_in > 0 && outcome.entities.is_empty() {
            error!(
                records_in = outcome.records_in,
                errors = outcome.errors,
                "Transform produced no valid records"
            );
            return Err(StageError::EmptyTransform {
                records_in: outcome.records_in,
            });
        }

        debug!(
            records_in = outcome.records_in,
            records_out = outcome.entities.len(),
            errors = outcome.errors,
            "Transform batch complete"
        );
        Ok(outcome)
    }

    fn transform_apps(&self, async_response: &AsyncResponse) -> TransformOutcome {
        let mut apps = Vec::new();
        let mut records_in = 0;
        let mut errors = 0;
        for response in async_response.arrived() {
            for record in &response.content {
                records_in += 1;
                match serde_json::from_value::<RawAppData>(record.clone()) {
                    Ok(raw) => apps.push(AppData::from(raw)),
                    Err(e) => {
                        errors += 1;
                        warn!(error = %e, "Invalid app record");
                    }
                }
            }
        }
        TransformOutcome {
            entities: Entities::Apps(apps),
            records_in,
            errors,
        }
    }

    fn transform_reviews(&self, async_response: &AsyncResponse) -> TransformOutcome {
        // The review endpoint does not echo the app id in each record, so it
        // comes from the batch lineage instead.
        let app_id = async_response.context.app_id.unwrap_or_default();

        let mut reviews = Vec::new();
        let mut records_in = 0;
        let mut errors = 0;
        for response in async_response.arrived() {
            for record in &response.content {
                records_in += 1;
                match serde_json::from_value::<RawAppReview>(record.clone()) {
                    Ok(raw) => reviews.push(AppReview::from_raw(raw, app_id)),
                    Err(e) => {
                        errors += 1;
                        warn!(error = %e, "Invalid review record");
                    }
                }
            }
        }
        TransformOutcome {
            entities: Entities::Reviews(reviews),
            records_in,
            errors,
        }
    }
}

/// Load: batch upsert into the repository. Returns the written count.
pub struct LoadStage {
    repo: Arc<dyn ContentRepository>,
}

impl LoadStage {
    pub fn new(repo: Arc<dyn ContentRepository>) -> Self {
        Self { repo }
    }

    pub fn run(&self, entities: &Entities) -> Result<usize, StageError> {
        let written = match entities {
            Entities::Apps(apps) => self.repo.upsert_apps(apps),
            Entities::Reviews(reviews) => self.repo.upsert_reviews(reviews),
        }
        .map_err(|e| StageError::Load(e.to_string()))?;
        debug!(written, "Load batch complete");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Category, Context};
    use crate::profile::SessionControl;
    use crate::response::Response;
    use serde_json::json;

    fn app_context() -> Context {
        Context::new(1, 2, Category::BOOKS, DataType::AppData)
    }

    fn response_with_records(records: Vec<serde_json::Value>) -> Response {
        let mut response = Response::default();
        response.headers.status = 200;
        response.content = records;
        response
    }

    fn sample_app(track_id: u64) -> serde_json::Value {
        json!({
            "trackId": track_id,
            "trackName": "Reading Room",
            "primaryGenreId": 6018,
            "primaryGenreName": "Book",
            "averageUserRating": 4.0,
            "averageUserRatingForCurrentVersion": 4.2,
            "userRatingCount": 100,
            "userRatingCountForCurrentVersion": 20,
            "artistId": 7,
            "artistName": "Example Labs"
        })
    }

    #[test]
    fn test_transform_counts_invalid_records() {
        let envelope = AsyncResponse::new(
            1,
            vec![Some(response_with_records(vec![
                sample_app(1),
                json!({"trackId": "not-a-number"}),
                sample_app(2),
            ]))],
            SessionControl::default(),
            app_context(),
        );
        let outcome = TransformStage::new().run(&envelope).unwrap();
        assert_eq!(outcome.records_in, 3);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.entities.len(), 2);
    }

    #[test]
    fn test_transform_all_invalid_is_fatal() {
        let envelope = AsyncResponse::new(
            1,
            vec![Some(response_with_records(vec![json!({"bogus": true})]))],
            SessionControl::default(),
            app_context(),
        );
        let result = TransformStage::new().run(&envelope);
        assert!(matches!(
            result,
            Err(StageError::EmptyTransform { records_in: 1 })
        ));
    }

    #[test]
    fn test_transform_empty_batch_is_not_fatal() {
        let envelope = AsyncResponse::new(
            1,
            vec![None],
            SessionControl::default(),
            app_context(),
        );
        let outcome = TransformStage::new().run(&envelope).unwrap();
        assert_eq!(outcome.records_in, 0);
        assert!(outcome.entities.is_empty());
    }

    #[test]
    fn test_load_returns_written_count() {
        let repo = Arc::new(crate::repo::InMemoryRepository::new());
        let load = LoadStage::new(repo.clone());

        let envelope = AsyncResponse::new(
            1,
            vec![Some(response_with_records(vec![sample_app(1), sample_app(2)]))],
            SessionControl::default(),
            app_context(),
        );
        let outcome = TransformStage::new().run(&envelope).unwrap();
        let written = load.run(&outcome.entities).unwrap();
        assert_eq!(written, 2);
        assert_eq!(repo.app_count(), 2);
    }
}
