//! Thin persistence interface the load stage emits into.
//!
//! The relational layer proper lives outside this crate; the engine only
//! needs batch upsert semantics. The in-memory implementation backs tests
//! and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::entity::{AppData, AppReview};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Batch upsert interface for acquired content.
pub trait ContentRepository: Send + Sync {
    /// Upserts application records; categories are replaced per app
    /// (delete-then-insert). Returns the number of records written.
    fn upsert_apps(&self, apps: &[AppData]) -> Result<usize, RepoError>;

    /// Upserts review records. Returns the number of records written.
    fn upsert_reviews(&self, reviews: &[AppReview]) -> Result<usize, RepoError>;
}

/// Map-backed repository.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    apps: Mutex<HashMap<u64, AppData>>,
    app_categories: Mutex<HashMap<u64, Vec<u32>>>,
    reviews: Mutex<HashMap<String, AppReview>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_count(&self) -> usize {
        self.apps.lock().unwrap().len()
    }

    pub fn review_count(&self) -> usize {
        self.reviews.lock().unwrap().len()
    }

    pub fn get_app(&self, app_id: u64) -> Option<AppData> {
        self.apps.lock().unwrap().get(&app_id).cloned()
    }

    pub fn categories_of(&self, app_id: u64) -> Vec<u32> {
        self.app_categories
            .lock()
            .unwrap()
            .get(&app_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl ContentRepository for InMemoryRepository {
    fn upsert_apps(&self, apps: &[AppData]) -> Result<usize, RepoError> {
        let mut store = self.apps.lock().unwrap();
        let mut categories = self.app_categories.lock().unwrap();
        for app in apps {
            categories.remove(&app.app_id);
            categories.insert(app.app_id, app.categories.clone());
            store.insert(app.app_id, app.clone());
        }
        Ok(apps.len())
    }

    fn upsert_reviews(&self, reviews: &[AppReview]) -> Result<usize, RepoError> {
        let mut store = self.reviews.lock().unwrap();
        for review in reviews {
            store.insert(review.review_id.clone(), review.clone());
        }
        Ok(reviews.len())
    }
}
