//! Shared vocabulary: data types, ETL stage types, storefront categories,
//! and the lineage context stamped through every artifact.

use serde::{Deserialize, Serialize};

/// Kind of content a project acquires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    AppData,
    AppReview,
}

impl DataType {
    pub fn label(&self) -> &'static str {
        match self {
            DataType::AppData => "appdata",
            DataType::AppReview => "appreview",
        }
    }
}

/// ETL stage discriminant recorded in metrics and error rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Extract,
    Transform,
    Load,
}

impl StageType {
    pub fn label(&self) -> &'static str {
        match self {
            StageType::Extract => "extract",
            StageType::Transform => "transform",
            StageType::Load => "load",
        }
    }
}

/// Storefront genre. The numeric id is what the search endpoint takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
}

impl Category {
    pub const BOOKS: Category = Category { id: 6018 };
    pub const BUSINESS: Category = Category { id: 6000 };
    pub const EDUCATION: Category = Category { id: 6017 };
    pub const ENTERTAINMENT: Category = Category { id: 6016 };
    pub const FINANCE: Category = Category { id: 6015 };
    pub const HEALTH_FITNESS: Category = Category { id: 6013 };
    pub const LIFESTYLE: Category = Category { id: 6012 };
    pub const MEDICAL: Category = Category { id: 6020 };
    pub const PRODUCTIVITY: Category = Category { id: 6007 };
    pub const SOCIAL_NETWORKING: Category = Category { id: 6005 };
    pub const UTILITIES: Category = Category { id: 6002 };

    pub fn new(id: u32) -> Self {
        Self { id }
    }
}

/// Lineage context carried by every artifact through the pipeline; keys the
/// metrics and error rows to (project, job, task, stage, data type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub project_id: u64,
    pub job_id: u64,
    pub task_id: u64,
    pub category: Category,
    pub data_type: DataType,
    pub stage: Option<StageType>,
    /// Target app for review batches; `None` for app-data batches.
    pub app_id: Option<u64>,
}

impl Context {
    pub fn new(project_id: u64, job_id: u64, category: Category, data_type: DataType) -> Self {
        Self {
            project_id,
            job_id,
            task_id: 0,
            category,
            data_type,
            stage: None,
            app_id: None,
        }
    }

    /// Returns a copy targeting the given app (review acquisition).
    pub fn for_app(&self, app_id: u64) -> Self {
        let mut ctx = self.clone();
        ctx.app_id = Some(app_id);
        ctx
    }

    /// Returns a copy stamped for the given task.
    pub fn for_task(&self, task_id: u64) -> Self {
        let mut ctx = self.clone();
        ctx.task_id = task_id;
        ctx
    }

    /// Returns a copy stamped for the given stage.
    pub fn for_stage(&self, stage: StageType) -> Self {
        let mut ctx = self.clone();
        ctx.stage = Some(stage);
        ctx
    }
}
