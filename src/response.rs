//! Parsed HTTP responses and the batched response envelope returned by the
//! dispatcher.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::context::{Context, DataType};
use crate::profile::SessionControl;

/// Header subset captured from every storefront response.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    pub server: String,
    pub server_datetime: Option<DateTime<Utc>>,
    pub connection: String,
    pub status: u16,
    /// Content-Length when present, otherwise the body size.
    pub size: u64,
    pub response_datetime: Option<DateTime<Utc>>,
    pub request_uuid: String,
}

/// One parsed response.
///
/// `content` holds the flattened record list for the request's data type:
/// the `results` array for app data, `userReviewList` for reviews. A body
/// without the expected key yields an empty list, counted by the transform
/// stage rather than failing the batch.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub headers: ResponseHeaders,
    pub content: Vec<Value>,
    pub dt_sent: Option<DateTime<Utc>>,
    pub dt_recv: Option<DateTime<Utc>>,
    /// Seconds between dt_sent and dt_recv; 0 when either stamp is missing.
    pub latency: f64,
    pub retries: usize,
}

impl Response {
    /// Stamps the dispatch instant. Starts the latency clock.
    pub fn mark_sent(&mut self) {
        self.dt_sent = Some(Utc::now());
    }

    /// Stamps the arrival instant and fixes the latency.
    pub fn mark_received(&mut self) {
        self.dt_recv = Some(Utc::now());
        self.latency = self.compute_latency();
    }

    fn compute_latency(&self) -> f64 {
        match (self.dt_sent, self.dt_recv) {
            (Some(sent), Some(recv)) => {
                let micros = (recv - sent).num_microseconds().unwrap_or(0);
                (micros.max(0) as f64) / 1_000_000.0
            }
            _ => 0.0,
        }
    }

    /// Captures the header subset from a reqwest response.
    pub fn parse_headers(&mut self, response: &reqwest::Response) {
        let headers = response.headers();
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        self.headers.server = get("server");
        self.headers.connection = get("connection");
        self.headers.request_uuid = get("x-apple-request-uuid");
        self.headers.status = response.status().as_u16();
        self.headers.server_datetime = headers
            .get("date")
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        self.headers.size = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        self.headers.response_datetime = Some(Utc::now());
    }

    /// Flattens the body into the record list for the data type.
    pub fn parse_content(&mut self, body: Value, data_type: DataType) {
        let key = match data_type {
            DataType::AppData => "results",
            DataType::AppReview => "userReviewList",
        };
        self.content = match body.get(key) {
            Some(Value::Array(records)) => records.clone(),
            // A bare array body is taken as the record list itself.
            None if body.is_array() => body.as_array().cloned().unwrap_or_default(),
            _ => Vec::new(),
        };
        if self.headers.size == 0 {
            self.headers.size = body.to_string().len() as u64;
        }
    }

    pub fn record_count(&self) -> usize {
        self.content.len()
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.headers.status)
    }
}

/// The batch envelope: one slot per dispatched request, `None` where all
/// retries were exhausted, plus the control triple in force when the batch
/// completed.
#[derive(Debug, Clone)]
pub struct AsyncResponse {
    pub request_count: usize,
    pub responses: Vec<Option<Response>>,
    pub session_control: SessionControl,
    pub context: Context,
}

impl AsyncResponse {
    pub fn new(
        request_count: usize,
        responses: Vec<Option<Response>>,
        session_control: SessionControl,
        context: Context,
    ) -> Self {
        Self {
            request_count,
            responses,
            session_control,
            context,
        }
    }

    /// Number of requests that produced a response.
    pub fn response_count(&self) -> usize {
        self.responses.iter().filter(|r| r.is_some()).count()
    }

    /// Number of slots whose retries were exhausted.
    pub fn failed_count(&self) -> usize {
        self.responses.len() - self.response_count()
    }

    /// Iterates the arrived responses, skipping failed slots.
    pub fn arrived(&self) -> impl Iterator<Item = &Response> {
        self.responses.iter().flatten()
    }

    /// Total records across arrived responses.
    pub fn record_count(&self) -> usize {
        self.arrived().map(Response::record_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Category;
    use serde_json::json;

    fn test_context() -> Context {
        Context::new(1, 1, Category::BOOKS, DataType::AppData)
    }

    #[test]
    fn test_latency_requires_both_stamps() {
        let mut response = Response::default();
        assert_eq!(response.latency, 0.0);
        response.mark_sent();
        response.mark_received();
        assert!(response.latency >= 0.0);
        assert!(response.dt_recv.unwrap() >= response.dt_sent.unwrap());
    }

    #[test]
    fn test_parse_content_flattens_results() {
        let mut response = Response::default();
        let body = json!({"resultCount": 2, "results": [{"trackId": 1}, {"trackId": 2}]});
        response.parse_content(body, DataType::AppData);
        assert_eq!(response.record_count(), 2);
    }

    #[test]
    fn test_parse_content_review_list() {
        let mut response = Response::default();
        let body = json!({"userReviewList": [{"userReviewId": "r1"}]});
        response.parse_content(body, DataType::AppReview);
        assert_eq!(response.record_count(), 1);
    }

    #[test]
    fn test_parse_content_missing_key_is_empty() {
        let mut response = Response::default();
        response.parse_content(json!({"unexpected": true}), DataType::AppData);
        assert_eq!(response.record_count(), 0);
    }

    #[test]
    fn test_parse_content_sets_size_fallback() {
        let mut response = Response::default();
        response.parse_content(json!({"results": []}), DataType::AppData);
        assert!(response.headers.size > 0);
    }

    #[test]
    fn test_async_response_counts() {
        let ok = Response {
            headers: ResponseHeaders {
                status: 200,
                ..Default::default()
            },
            ..Default::default()
        };
        let envelope = AsyncResponse::new(
            3,
            vec![Some(ok.clone()), None, Some(ok)],
            SessionControl::new(50.0, 5.0),
            test_context(),
        );
        assert_eq!(envelope.request_count, 3);
        assert_eq!(envelope.response_count(), 2);
        assert_eq!(envelope.failed_count(), 1);
        assert_eq!(envelope.arrived().count(), 2);
    }
}
