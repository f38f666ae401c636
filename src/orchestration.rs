//! Orchestration: a `Project` tracks cross-job progress, a `Job` iterates
//! request batches from a generator, and a `Task` runs the ETL triple over
//! one batch.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::{Category, Context, DataType};
use crate::errors::OrchestrationError;
use crate::request::{AsyncRequest, RequestGen};
use crate::stage::{LoadStage, MonitoredExtract, TransformStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStatus {
    Idle,
    Active,
}

/// Cross-job acquisition state for one (category, data type) pair.
#[derive(Debug, Clone)]
pub struct Project {
    pub project_id: u64,
    pub category: Category,
    pub data_type: DataType,
    /// Days between scheduled jobs.
    pub frequency: i64,
    pub max_page_processed: usize,
    pub last_page_processed: usize,
    pub dt_last_job_executed: Option<DateTime<Utc>>,
    pub dt_next_scheduled_job: Option<DateTime<Utc>>,
    pub job_count: u64,
    pub status: ProjectStatus,
}

impl Project {
    pub fn new(project_id: u64, category: Category, data_type: DataType, frequency: i64) -> Self {
        Self {
            project_id,
            category,
            data_type,
            frequency,
            max_page_processed: 0,
            last_page_processed: 0,
            dt_last_job_executed: None,
            dt_next_scheduled_job: None,
            job_count: 0,
            status: ProjectStatus::Idle,
        }
    }

    pub fn job_started(&mut self) {
        self.status = ProjectStatus::Active;
        self.dt_last_job_executed = Some(Utc::now());
    }

    /// Records the most recently processed page. The high-water mark only
    /// moves forward, keeping `last_page_processed <= max_page_processed`.
    pub fn update_progress(&mut self, page: usize) {
        self.last_page_processed = page;
        self.max_page_processed = self.max_page_processed.max(page);
    }

    pub fn job_completed(&mut self) {
        self.job_count += 1;
        self.status = ProjectStatus::Idle;
        let now = Utc::now();
        self.dt_last_job_executed = Some(now);
        self.dt_next_scheduled_job = Some(now + ChronoDuration::days(self.frequency));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    Scheduled,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    InProgress,
    Completed,
    Failed,
}

/// One iteration of the ETL triple over a single batch.
pub struct Task {
    pub task_id: u64,
    pub context: Context,
    pub status: TaskStatus,
    async_request: AsyncRequest,
}

impl Task {
    pub fn new(task_id: u64, async_request: AsyncRequest) -> Self {
        let context = async_request.context.for_task(task_id);
        Self {
            task_id,
            context,
            status: TaskStatus::Created,
            async_request,
        }
    }

    /// Highest page in the batch, used for progress tracking.
    pub fn last_page(&self) -> Option<usize> {
        self.async_request.requests.iter().map(|r| r.page).max()
    }

    /// Runs extract, transform, load in order. Stage-fatal errors mark the
    /// task failed and propagate.
    pub async fn execute(
        &mut self,
        extract: &mut MonitoredExtract,
        transform: &TransformStage,
        load: &LoadStage,
    ) -> Result<usize, OrchestrationError> {
        self.status = TaskStatus::InProgress;
        let mut staged = self.async_request.clone();
        staged.context = self.context.clone();

        let result = async {
            let response = extract.run(&staged).await?;
            let outcome = transform.run(&response)?;
            let written = load.run(&outcome.entities)?;
            Ok::<usize, crate::errors::StageError>(written)
        }
        .await;

        match result {
            Ok(written) => {
                self.status = TaskStatus::Completed;
                Ok(written)
            }
            Err(e) => {
                self.status = TaskStatus::Failed;
                error!(task_id = self.task_id, error = %e, "Task failed");
                Err(e.into())
            }
        }
    }
}

/// A scraping job: iterates batches from a generator, one task per batch.
pub struct Job {
    pub id: String,
    pub job_id: u64,
    pub description: String,
    pub created: DateTime<Utc>,
    pub scheduled: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub start_page: usize,
    pub last_page: usize,
    pub status: JobStatus,
    pub cancellation_reason: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    execution_time: f64,
    task_count: u64,
    cancel: CancellationToken,
}

impl Job {
    pub fn new(job_id: u64, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: name.into(),
            job_id,
            description: description.into(),
            created: Utc::now(),
            scheduled: None,
            started: None,
            updated: None,
            completed: None,
            start_page: 0,
            last_page: 0,
            status: JobStatus::Created,
            cancellation_reason: None,
            retry_count: 0,
            max_retries: 3,
            execution_time: 0.0,
            task_count: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn execution_time(&self) -> f64 {
        self.execution_time
    }

    /// Token observed by in-flight tasks and the dispatcher.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Schedules the job for a future instant.
    pub fn schedule(&mut self, scheduled: DateTime<Utc>) -> Result<(), OrchestrationError> {
        if scheduled < Utc::now() {
            return Err(OrchestrationError::ScheduleInPast);
        }
        if !matches!(self.status, JobStatus::Created | JobStatus::Scheduled) {
            return Err(self.invalid_transition("schedule"));
        }
        self.status = JobStatus::Scheduled;
        self.scheduled = Some(scheduled);
        self.touch();
        info!(job = %self.id, at = %scheduled, "Job scheduled");
        Ok(())
    }

    pub fn start(&mut self, project: &mut Project) -> Result<(), OrchestrationError> {
        if !matches!(self.status, JobStatus::Created | JobStatus::Scheduled) {
            return Err(self.invalid_transition("start"));
        }
        self.status = JobStatus::Running;
        self.started = Some(Utc::now());
        self.updated = self.started;
        project.job_started();
        info!(job = %self.id, "Job started");
        Ok(())
    }

    /// Records the last processed page on the job and its project.
    pub fn update_progress(
        &mut self,
        project: &mut Project,
        page: usize,
    ) -> Result<(), OrchestrationError> {
        self.check_running("update progress")?;
        self.last_page = page;
        project.update_progress(page);
        self.touch();
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<String>) {
        self.status = JobStatus::Canceled;
        self.cancellation_reason = reason.clone();
        self.cancel.cancel();
        self.touch();
        match reason {
            Some(reason) => warn!(job = %self.id, reason = %reason, "Job canceled"),
            None => warn!(job = %self.id, "Job canceled"),
        }
    }

    pub fn fail(&mut self) -> Result<(), OrchestrationError> {
        self.check_running("fail")?;
        self.status = JobStatus::Failed;
        self.touch();
        warn!(job = %self.id, "Job failed");
        Ok(())
    }

    pub fn complete(&mut self, project: &mut Project) -> Result<(), OrchestrationError> {
        self.check_running("complete")?;
        let now = Utc::now();
        self.completed = Some(now);
        self.status = JobStatus::Completed;
        self.updated = self.completed;
        project.job_completed();
        if let Some(started) = self.started {
            self.execution_time = (now - started).num_milliseconds() as f64 / 1000.0;
        }
        info!(
            job = %self.id,
            execution_secs = self.execution_time,
            "Job completed"
        );
        Ok(())
    }

    /// Re-enters the running state after a failure or cancellation, up to
    /// `max_retries` times.
    pub fn retry(&mut self) -> Result<(), OrchestrationError> {
        if !matches!(self.status, JobStatus::Failed | JobStatus::Canceled) {
            return Err(self.invalid_transition("retry"));
        }
        if self.retry_count >= self.max_retries {
            return Err(OrchestrationError::RetriesExhausted {
                job_id: self.id.clone(),
                max_retries: self.max_retries,
            });
        }
        self.retry_count += 1;
        self.status = JobStatus::Running;
        self.cancel = CancellationToken::new();
        self.started = Some(Utc::now());
        self.updated = self.started;
        info!(job = %self.id, retry = self.retry_count, "Job retry");
        Ok(())
    }

    /// Drives the generator to exhaustion, one task per batch. Task
    /// fatalities fail the job; a cancel request stops between batches.
    pub async fn run(
        &mut self,
        project: &mut Project,
        generator: &mut dyn RequestGen,
        extract: &mut MonitoredExtract,
        transform: &TransformStage,
        load: &LoadStage,
    ) -> Result<u64, OrchestrationError> {
        // A retried job is already Running; everything else must start.
        if self.status != JobStatus::Running {
            self.start(project)?;
        } else {
            project.job_started();
        }
        extract
            .inner_mut()
            .session_mut()
            .set_cancellation(self.cancel.clone());

        let mut tasks_completed = 0u64;
        while let Some(batch) = generator.next_batch() {
            if self.cancel.is_cancelled() {
                if self.status != JobStatus::Canceled {
                    self.cancel(Some("cancellation requested".to_string()));
                }
                return Ok(tasks_completed);
            }

            self.task_count += 1;
            let mut task = Task::new(self.task_count, batch);
            let last_page = task.last_page();

            if let Err(e) = task.execute(extract, transform, load).await {
                self.fail()?;
                return Err(e);
            }

            tasks_completed += 1;
            if let Some(page) = last_page {
                self.update_progress(project, page)?;
            }
        }

        self.complete(project)?;
        Ok(tasks_completed)
    }

    fn check_running(&self, action: &'static str) -> Result<(), OrchestrationError> {
        if self.status != JobStatus::Running {
            return Err(OrchestrationError::InvalidTransition {
                action,
                status: self.status.label().to_string(),
            });
        }
        Ok(())
    }

    fn invalid_transition(&self, action: &'static str) -> OrchestrationError {
        OrchestrationError::InvalidTransition {
            action,
            status: self.status.label().to_string(),
        }
    }

    fn touch(&mut self) {
        self.updated = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_project() -> Project {
        Project::new(1, Category::BOOKS, DataType::AppData, 7)
    }

    #[test]
    fn test_job_lifecycle_happy_path() {
        let mut project = test_project();
        let mut job = Job::new(1, "job-1", "acquire books");
        assert_eq!(job.status, JobStatus::Created);

        job.start(&mut project).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(project.status, ProjectStatus::Active);

        job.update_progress(&mut project, 12).unwrap();
        assert_eq!(job.last_page, 12);
        assert_eq!(project.last_page_processed, 12);
        assert_eq!(project.max_page_processed, 12);

        job.complete(&mut project).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(project.status, ProjectStatus::Idle);
        assert_eq!(project.job_count, 1);
        assert!(project.dt_next_scheduled_job.is_some());
    }

    #[test]
    fn test_cannot_start_twice() {
        let mut project = test_project();
        let mut job = Job::new(1, "job-1", "acquire books");
        job.start(&mut project).unwrap();
        assert!(matches!(
            job.start(&mut project),
            Err(OrchestrationError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_update_progress_requires_running() {
        let mut project = test_project();
        let mut job = Job::new(1, "job-1", "acquire books");
        assert!(job.update_progress(&mut project, 3).is_err());
    }

    #[test]
    fn test_schedule_rejects_past() {
        let mut job = Job::new(1, "job-1", "acquire books");
        let past = Utc::now() - ChronoDuration::hours(1);
        assert!(matches!(
            job.schedule(past),
            Err(OrchestrationError::ScheduleInPast)
        ));
    }

    #[test]
    fn test_schedule_then_start() {
        let mut project = test_project();
        let mut job = Job::new(1, "job-1", "acquire books");
        job.schedule(Utc::now() + ChronoDuration::hours(1)).unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);
        job.start(&mut project).unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_retry_cycle_and_exhaustion() {
        let mut project = test_project();
        let mut job = Job::new(1, "job-1", "acquire books").with_max_retries(3);
        job.start(&mut project).unwrap();

        for expected_retry in 1..=3 {
            job.fail().unwrap();
            job.retry().unwrap();
            assert_eq!(job.retry_count, expected_retry);
            assert_eq!(job.status, JobStatus::Running);
        }

        job.fail().unwrap();
        assert!(matches!(
            job.retry(),
            Err(OrchestrationError::RetriesExhausted { .. })
        ));
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_retry_requires_failed_or_canceled() {
        let mut job = Job::new(1, "job-1", "acquire books");
        assert!(matches!(
            job.retry(),
            Err(OrchestrationError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cancel_records_reason_and_trips_token() {
        let mut project = test_project();
        let mut job = Job::new(1, "job-1", "acquire books");
        job.start(&mut project).unwrap();
        let token = job.cancellation_token();
        job.cancel(Some("operator stop".to_string()));
        assert_eq!(job.status, JobStatus::Canceled);
        assert_eq!(job.cancellation_reason.as_deref(), Some("operator stop"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_project_progress_high_water_mark() {
        let mut project = test_project();
        project.update_progress(10);
        project.update_progress(4);
        assert_eq!(project.last_page_processed, 4);
        assert_eq!(project.max_page_processed, 10);
        assert!(project.last_page_processed <= project.max_page_processed);
    }
}
