use std::env;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use appharvest::adapter::Adapter;
use appharvest::config::AppConfig;
use appharvest::context::{Category, Context, DataType};
use appharvest::identity::{IdxGen, JobPassport, ProjectPassport};
use appharvest::metrics::register_metrics;
use appharvest::monitor::{InMemoryErrorSink, InMemoryMetricsSink, JsonlSink};
use appharvest::monitor::{ErrorSink, MetricsSink};
use appharvest::orchestration::{Job, Project};
use appharvest::repo::InMemoryRepository;
use appharvest::request::{
    AppDataGen, AppReviewGen, RequestGen, APPDATA_PAGE_LIMIT, REVIEW_PAGE_LIMIT,
};
use appharvest::session::AsyncSession;
use appharvest::stage::{ExtractStage, LoadStage, MonitoredExtract, TransformStage};

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    register_metrics()?;

    let config = AppConfig::from_env()?;

    let data_type = match env::var("DATA_TYPE").as_deref() {
        Ok("appreview") => DataType::AppReview,
        _ => DataType::AppData,
    };
    let category = Category::new(env_parse("CATEGORY_ID", Category::BOOKS.id));
    let max_requests: usize = env_parse("MAX_REQUESTS", 100);
    let batch_size: usize = env_parse("BATCH_SIZE", 10);
    let start_page: usize = env_parse("START_PAGE", 0);

    let ops_dir = config
        .ops_dir
        .clone()
        .unwrap_or_else(|| ".appharvest".to_string());
    let idxgen = IdxGen::new(&ops_dir)?;
    let project_passport = ProjectPassport::new(&idxgen, category, data_type, config.env)?;
    let job_passport = JobPassport::new(&idxgen, &project_passport)?;

    info!(
        project = %project_passport.passport.name,
        job = %job_passport.passport.name,
        data_type = data_type.label(),
        max_requests,
        batch_size,
        "Starting acquisition"
    );

    let context = Context::new(
        project_passport.project_id(),
        job_passport.job_id(),
        category,
        data_type,
    );

    let mut generator: Box<dyn RequestGen> = match data_type {
        DataType::AppData => Box::new(AppDataGen::new(
            context,
            category.id,
            max_requests,
            batch_size,
            start_page,
            env_parse("PAGE_LIMIT", APPDATA_PAGE_LIMIT),
        )),
        DataType::AppReview => Box::new(AppReviewGen::new(
            context,
            env_parse("APP_ID", 0u64),
            max_requests,
            batch_size,
            start_page,
            env_parse("PAGE_LIMIT", REVIEW_PAGE_LIMIT),
        )),
    };

    let error_sink: Arc<dyn ErrorSink> = match env::var("ERROR_LOG_PATH") {
        Ok(path) if !path.is_empty() => Arc::new(JsonlSink::new(path)),
        _ => Arc::new(InMemoryErrorSink::new()),
    };
    let metrics_sink: Arc<dyn MetricsSink> = match env::var("METRICS_LOG_PATH") {
        Ok(path) if !path.is_empty() => Arc::new(JsonlSink::new(path)),
        _ => Arc::new(InMemoryMetricsSink::new()),
    };

    let adapter = Adapter::new(config.adapter.clone());
    let session = AsyncSession::new(&config, adapter, Arc::clone(&error_sink));
    let mut extract = MonitoredExtract::new(ExtractStage::new(session), metrics_sink);
    let transform = TransformStage::new();
    let repo = Arc::new(InMemoryRepository::new());
    let load = LoadStage::new(repo.clone());

    let mut project = Project::new(
        project_passport.project_id(),
        category,
        data_type,
        env_parse("FREQUENCY_DAYS", 7),
    );
    let mut job = Job::new(
        job_passport.job_id(),
        job_passport.passport.name.clone(),
        format!(
            "Acquire {} for category {}",
            data_type.label(),
            category.id
        ),
    );

    match job
        .run(&mut project, generator.as_mut(), &mut extract, &transform, &load)
        .await
    {
        Ok(tasks) => {
            info!(
                tasks,
                last_page = job.last_page,
                apps = repo.app_count(),
                reviews = repo.review_count(),
                execution_secs = job.execution_time(),
                "Acquisition finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, status = job.status.label(), "Acquisition failed");
            Err(e.into())
        }
    }
}
