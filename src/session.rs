//! Asynchronous dispatch session.
//!
//! `AsyncSession` executes one `AsyncRequest` batch at a time as a
//! bounded-concurrency fan-out over a shared `reqwest::Client`, feeds the
//! observed latencies to the adaptive controller, applies the controller's
//! inter-batch delay, and rebuilds the underlying client once its request
//! budget is spent.
//!
//! Ordering within one `get` call is fixed: profile send happens before any
//! dispatch, every arrival happens before profile recv, recv happens before
//! adaptation, adaptation happens before the delay, and the delay happens
//! before the call returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::Adapter;
use crate::config::AppConfig;
use crate::context::Context;
use crate::errors::{CategorizedError, ErrorCategory, SessionError};
use crate::headers::BrowserHeaders;
use crate::metrics::{
    self, status_code_label, REQUEST_RETRIES_TOTAL, REQUEST_STATUS_CODES, REQUEST_TOTAL,
    SESSION_RESETS_TOTAL,
};
use crate::monitor::{ErrorLog, ErrorSink};
use crate::profile::{SessionHistory, SessionProfile};
use crate::request::{AsyncRequest, Request};
use crate::response::{AsyncResponse, Response};

/// Owns the HTTP client, the controller, and the telemetry window.
pub struct AsyncSession {
    client: Option<reqwest::Client>,
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Duration,
    tcp_keepalive: Option<Duration>,
    timeout: Duration,
    proxy: Option<String>,
    trust_env: bool,
    raise_for_status: bool,
    retries: usize,
    session_request_limit: usize,
    session_request_count: usize,
    concurrency: usize,
    adapter: Adapter,
    history: SessionHistory,
    headers: Arc<BrowserHeaders>,
    error_sink: Arc<dyn ErrorSink>,
    cancel: CancellationToken,
}

impl AsyncSession {
    pub fn new(config: &AppConfig, adapter: Adapter, error_sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            client: None,
            pool_max_idle_per_host: config.asession.pool_max_idle_per_host,
            pool_idle_timeout: config.asession.idle_timeout(),
            tcp_keepalive: config.asession.keepalive(),
            timeout: config.timeout(),
            proxy: config.proxy.clone(),
            trust_env: config.asession.trust_env,
            raise_for_status: config.asession.raise_for_status,
            retries: config.asession.retries.max(1),
            session_request_limit: config.asession.session_request_limit,
            session_request_count: 0,
            concurrency: config.asession.concurrency.max(1),
            adapter,
            history: SessionHistory::new(config.history_size()),
            headers: Arc::new(BrowserHeaders::new()),
            error_sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Installs the cooperative cancel signal propagated from the job.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn current_concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn session_request_count(&self) -> usize {
        self.session_request_count
    }

    /// Test hook: pre-load the per-session request counter.
    #[doc(hidden)]
    pub fn preset_request_count(&mut self, count: usize) {
        self.session_request_count = count;
    }

    /// Opens the underlying HTTP session. Idempotent.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.client.is_none() {
            self.create_session().await?;
        }
        Ok(())
    }

    /// Closes the underlying HTTP session; subsequent `get` calls reopen it.
    pub fn close(&mut self) {
        self.client = None;
    }

    /// Executes one batch and returns its response envelope.
    pub async fn get(
        &mut self,
        async_request: &AsyncRequest,
    ) -> Result<AsyncResponse, SessionError> {
        self.open().await?;
        let client = self
            .client
            .clone()
            .ok_or(SessionError::SessionClosed)?;

        let mut profile = SessionProfile::new(async_request.request_count);
        self.session_request_count += async_request.request_count;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        // Send stamp precedes every dispatch.
        profile.send();
        let mut handles = Vec::with_capacity(async_request.requests.len());
        for request in &async_request.requests {
            handles.push(tokio::spawn(make_request(RequestJob {
                client: client.clone(),
                request: request.clone(),
                context: async_request.context.clone(),
                semaphore: Arc::clone(&semaphore),
                headers: Arc::clone(&self.headers),
                retries: self.retries,
                raise_for_status: self.raise_for_status,
                error_sink: Arc::clone(&self.error_sink),
                cancel: self.cancel.clone(),
            })));
        }

        let mut responses: Vec<Option<Response>> = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(response) => responses.push(response),
                Err(e) => {
                    error!(error = %e, "Request task aborted");
                    responses.push(None);
                }
            }
        }
        profile.recv();

        profile.responses = responses.iter().filter(|r| r.is_some()).count();
        for response in responses.iter().flatten() {
            profile.add_latency(response.latency);
        }

        self.history.add(profile);
        self.adapter.adapt_requests(&self.history);
        let session_control = self.adapter.session_control();

        metrics::SESSION_CONTROL_RATE.set(session_control.rate);
        metrics::SESSION_CONTROL_CONCURRENCY.set(session_control.concurrency);
        metrics::SESSION_CONTROL_DELAY.set(session_control.delay);

        // Adaptation precedes the inter-batch delay; the delay precedes the
        // return to the caller.
        if session_control.delay > 0.0 && !self.cancel.is_cancelled() {
            tokio::time::sleep(Duration::from_secs_f64(session_control.delay)).await;
        }
        self.concurrency = (session_control.concurrency.round() as usize).max(1);

        let envelope = AsyncResponse::new(
            async_request.request_count,
            responses,
            session_control,
            async_request.context.clone(),
        );

        if self.session_request_count > self.session_request_limit {
            info!(
                requests = self.session_request_count,
                limit = self.session_request_limit,
                "Session request budget spent; rebuilding HTTP session"
            );
            SESSION_RESETS_TOTAL.inc();
            self.create_session().await?;
        }

        Ok(envelope)
    }

    /// Builds a fresh client with backoff. Exhaustion is fatal to the batch.
    async fn create_session(&mut self) -> Result<(), SessionError> {
        let mut last_error = String::new();
        for attempt in 0..self.retries {
            match self.build_client() {
                Ok(client) => {
                    self.client = Some(client);
                    self.session_request_count = 0;
                    debug!("HTTP session established");
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        attempt = attempt + 1,
                        error = %last_error,
                        "Failed to create HTTP session"
                    );
                    tokio::time::sleep(Duration::from_secs(1u64 << attempt)).await;
                }
            }
        }
        error!("Exhausted retries establishing an HTTP session");
        Err(SessionError::SessionCreate {
            attempts: self.retries,
            message: last_error,
        })
    }

    fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        // Pool settings are reapplied on every rebuild so connection reuse
        // behavior survives session resets.
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .cookie_store(true)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(self.pool_idle_timeout);
        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }
        if let Some(proxy_url) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }
        if !self.trust_env {
            builder = builder.no_proxy();
        }
        builder.build()
    }
}

/// Everything one request task needs, owned so it can cross the spawn
/// boundary.
struct RequestJob {
    client: reqwest::Client,
    request: Request,
    context: Context,
    semaphore: Arc<Semaphore>,
    headers: Arc<BrowserHeaders>,
    retries: usize,
    raise_for_status: bool,
    error_sink: Arc<dyn ErrorSink>,
    cancel: CancellationToken,
}

/// One request with retries. Absorbs its own failures: on exhaustion it
/// emits an error-log row and resolves to `None`.
async fn make_request(mut job: RequestJob) -> Option<Response> {
    let permit = Arc::clone(&job.semaphore).acquire_owned().await.ok()?;
    job.request.sent = Some(chrono::Utc::now());

    let headers = job
        .request
        .headers
        .clone()
        .unwrap_or_else(|| job.headers.next_headers());

    let mut last_error: Option<CategorizedError> = None;
    let mut attempt = 0;

    while attempt < job.retries {
        if job.cancel.is_cancelled() {
            debug!(request_id = %job.request.id, "Dispatch refused: cancelled");
            drop(permit);
            return None;
        }

        let mut response = Response {
            retries: attempt,
            ..Response::default()
        };
        response.mark_sent();
        REQUEST_TOTAL.inc();
        if attempt > 0 {
            REQUEST_RETRIES_TOTAL.inc();
        }

        let mut builder = job.client.get(&job.request.baseurl);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !job.request.params.is_empty() {
            builder = builder.query(&job.request.params);
        }

        match builder.send().await {
            Ok(http_response) => {
                let status = http_response.status().as_u16();
                REQUEST_STATUS_CODES
                    .with_label_values(&[status_code_label(status)])
                    .inc();

                let failure = if job.raise_for_status {
                    ErrorCategory::from_status_code(status)
                } else {
                    None
                };

                match failure {
                    None => {
                        response.parse_headers(&http_response);
                        match http_response.json::<serde_json::Value>().await {
                            Ok(body) => {
                                response.parse_content(body, job.request.data_type);
                                response.mark_received();
                                debug!(
                                    request_id = %job.request.id,
                                    status,
                                    records = response.record_count(),
                                    latency_secs = response.latency,
                                    "Request completed"
                                );
                                return Some(response);
                            }
                            Err(e) => {
                                last_error = Some(CategorizedError::from_reqwest(&e));
                            }
                        }
                    }
                    Some(category) => {
                        let err = CategorizedError {
                            category,
                            status_code: Some(status),
                            message: format!("HTTP {status} from {}", job.request.baseurl),
                        };
                        warn!(
                            request_id = %job.request.id,
                            status,
                            category = category.label(),
                            attempt = attempt + 1,
                            "Request failed"
                        );
                        if !category.is_retryable() {
                            emit_error(&job, &err);
                            drop(permit);
                            return None;
                        }
                        last_error = Some(err);
                    }
                }
            }
            Err(e) => {
                let err = CategorizedError::from_reqwest(&e);
                REQUEST_STATUS_CODES.with_label_values(&["error"]).inc();
                warn!(
                    request_id = %job.request.id,
                    category = err.category.label(),
                    error = %err.message,
                    attempt = attempt + 1,
                    "Request errored"
                );
                last_error = Some(err);
            }
        }

        attempt += 1;
        if attempt < job.retries {
            tokio::time::sleep(Duration::from_secs(1u64 << (attempt - 1))).await;
        }
    }

    if let Some(err) = &last_error {
        emit_error(&job, err);
    }
    error!(request_id = %job.request.id, "Exhausted retries; dropping request");
    drop(permit);
    None
}

fn emit_error(job: &RequestJob, err: &CategorizedError) {
    metrics::ACQUISITION_ERRORS_TOTAL
        .with_label_values(&[err.category.label()])
        .inc();
    job.error_sink
        .add(ErrorLog::from_categorized(&job.context, err));
}
