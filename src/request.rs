//! Typed storefront requests, batched async requests, and the lazy batch
//! generators that drive a job.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::context::{Context, DataType};
use crate::headers::{storefront_headers, HeaderSet};

const STOREFRONT_HOST: &str = "https://itunes.apple.com";

/// Default records per page for the app-data search endpoint.
pub const APPDATA_PAGE_LIMIT: usize = 200;
/// Default records per page for the review endpoint.
pub const REVIEW_PAGE_LIMIT: usize = 400;

/// A single outbound GET.
///
/// `start_index`/`end_index` follow the page window invariant:
/// `start_index = page * limit`, `end_index = (page + 1) * limit`.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: String,
    pub data_type: DataType,
    /// Explicit headers; `None` draws from the rotating browser pool.
    pub headers: Option<HeaderSet>,
    pub baseurl: String,
    pub params: BTreeMap<String, String>,
    pub page: usize,
    pub limit: usize,
    pub method: &'static str,
    pub sent: Option<DateTime<Utc>>,
}

impl Request {
    /// App-data search query for one page of a category.
    pub fn app_data(category_id: u32, page: usize, limit: usize) -> Self {
        let mut params = BTreeMap::new();
        params.insert("media".to_string(), "software".to_string());
        params.insert("genreId".to_string(), category_id.to_string());
        params.insert("term".to_string(), "app".to_string());
        params.insert("country".to_string(), "us".to_string());
        params.insert("lang".to_string(), "en-us".to_string());
        params.insert("explicit".to_string(), "yes".to_string());
        params.insert("limit".to_string(), limit.to_string());
        params.insert("offset".to_string(), (page * limit).to_string());

        Self {
            id: format!("appdata-{category_id}-{page}"),
            data_type: DataType::AppData,
            headers: None,
            baseurl: format!("{STOREFRONT_HOST}/search"),
            params,
            page,
            limit,
            method: "GET",
            sent: None,
        }
    }

    /// Review query for one page of an app. The endpoint encodes the window
    /// in the path and requires the storefront header block.
    pub fn app_review(app_id: u64, page: usize, limit: usize) -> Self {
        let start_index = page * limit;
        let end_index = (page + 1) * limit;
        Self {
            id: format!("appreview-{app_id}-{page}"),
            data_type: DataType::AppReview,
            headers: Some(storefront_headers()),
            baseurl: format!(
                "{STOREFRONT_HOST}/WebObjects/MZStore.woa/wa/userReviewsRow?id={app_id}&displayable-kind=11&startIndex={start_index}&endIndex={end_index}&sort=1"
            ),
            params: BTreeMap::new(),
            page,
            limit,
            method: "GET",
            sent: None,
        }
    }

    pub fn start_index(&self) -> usize {
        self.page * self.limit
    }

    pub fn end_index(&self) -> usize {
        (self.page + 1) * self.limit
    }
}

/// A batch of requests dispatched concurrently under one semaphore width.
#[derive(Debug, Clone)]
pub struct AsyncRequest {
    pub request_count: usize,
    pub requests: Vec<Request>,
    pub context: Context,
}

impl AsyncRequest {
    pub fn new(context: Context) -> Self {
        Self {
            request_count: 0,
            requests: Vec::new(),
            context,
        }
    }

    pub fn add_request(&mut self, request: Request) {
        self.request_count += 1;
        self.requests.push(request);
    }
}

/// Lazy, finite producer of request batches. `None` signals exhaustion; a
/// new generator built with the same `start_page` reproduces the sequence.
pub trait RequestGen: Send {
    fn next_batch(&mut self) -> Option<AsyncRequest>;

    /// Current page cursor, readable for resume.
    fn bookmark(&self) -> usize;

    fn batch_size(&self) -> usize;

    fn max_requests(&self) -> usize;
}

/// Shared paging state for both generators.
#[derive(Debug)]
struct PageCursor {
    max_requests: usize,
    batch_size: usize,
    page: usize,
    limit: usize,
    emitted: usize,
}

impl PageCursor {
    fn new(max_requests: usize, batch_size: usize, start_page: usize, limit: usize) -> Self {
        Self {
            max_requests,
            batch_size: batch_size.max(1),
            page: start_page,
            limit: limit.max(1),
            emitted: 0,
        }
    }

    /// Pages making up the next batch, or `None` once exhausted.
    fn next_pages(&mut self) -> Option<std::ops::Range<usize>> {
        if self.emitted >= self.max_requests {
            return None;
        }
        let remaining = self.max_requests - self.emitted;
        let count = self.batch_size.min(remaining);
        let range = self.page..self.page + count;
        self.page += count;
        self.emitted += count;
        Some(range)
    }
}

/// Batch generator for app-data search pages of one category.
pub struct AppDataGen {
    context: Context,
    category_id: u32,
    cursor: PageCursor,
}

impl AppDataGen {
    pub fn new(
        context: Context,
        category_id: u32,
        max_requests: usize,
        batch_size: usize,
        start_page: usize,
        limit: usize,
    ) -> Self {
        Self {
            context,
            category_id,
            cursor: PageCursor::new(max_requests, batch_size, start_page, limit),
        }
    }
}

impl RequestGen for AppDataGen {
    fn next_batch(&mut self) -> Option<AsyncRequest> {
        let pages = self.cursor.next_pages()?;
        let mut batch = AsyncRequest::new(self.context.clone());
        for page in pages {
            batch.add_request(Request::app_data(self.category_id, page, self.cursor.limit));
        }
        Some(batch)
    }

    fn bookmark(&self) -> usize {
        self.cursor.page
    }

    fn batch_size(&self) -> usize {
        self.cursor.batch_size
    }

    fn max_requests(&self) -> usize {
        self.cursor.max_requests
    }
}

/// Batch generator for review pages of one app.
pub struct AppReviewGen {
    context: Context,
    app_id: u64,
    cursor: PageCursor,
}

impl AppReviewGen {
    pub fn new(
        context: Context,
        app_id: u64,
        max_requests: usize,
        batch_size: usize,
        start_page: usize,
        limit: usize,
    ) -> Self {
        Self {
            context: context.for_app(app_id),
            app_id,
            cursor: PageCursor::new(max_requests, batch_size, start_page, limit),
        }
    }
}

impl RequestGen for AppReviewGen {
    fn next_batch(&mut self) -> Option<AsyncRequest> {
        let pages = self.cursor.next_pages()?;
        let mut batch = AsyncRequest::new(self.context.clone());
        for page in pages {
            batch.add_request(Request::app_review(self.app_id, page, self.cursor.limit));
        }
        Some(batch)
    }

    fn bookmark(&self) -> usize {
        self.cursor.page
    }

    fn batch_size(&self) -> usize {
        self.cursor.batch_size
    }

    fn max_requests(&self) -> usize {
        self.cursor.max_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Category;

    fn test_context(data_type: DataType) -> Context {
        Context::new(1, 1, Category::BOOKS, data_type)
    }

    #[test]
    fn test_app_data_request_indices() {
        let req = Request::app_data(6018, 3, 10);
        assert_eq!(req.start_index(), 30);
        assert_eq!(req.end_index(), 40);
        assert_eq!(req.params["offset"], "30");
        assert_eq!(req.params["genreId"], "6018");
        assert_eq!(req.params["limit"], "10");
        assert!(req.headers.is_none());
    }

    #[test]
    fn test_app_review_request_url() {
        let req = Request::app_review(1234, 2, 400);
        assert!(req.baseurl.contains("id=1234"));
        assert!(req.baseurl.contains("startIndex=800"));
        assert!(req.baseurl.contains("endIndex=1200"));
        assert!(req.params.is_empty());
        // Review calls always carry the storefront block.
        let headers = req.headers.unwrap();
        assert!(headers.contains_key("X-Apple-Store-Front"));
    }

    #[test]
    fn test_generator_batches_and_exhaustion() {
        let mut gen = AppDataGen::new(test_context(DataType::AppData), 6018, 4, 2, 10, 10);

        let a = gen.next_batch().unwrap();
        assert_eq!(a.request_count, 2);
        assert_eq!(a.requests[0].page, 10);
        assert_eq!(a.requests[1].page, 11);

        let b = gen.next_batch().unwrap();
        assert_eq!(b.requests[0].page, 12);
        assert_eq!(b.requests[1].page, 13);

        assert!(gen.next_batch().is_none());
        assert_eq!(gen.bookmark(), 14);
    }

    #[test]
    fn test_generator_short_final_batch() {
        let mut gen = AppDataGen::new(test_context(DataType::AppData), 6018, 5, 2, 0, 200);
        assert_eq!(gen.next_batch().unwrap().request_count, 2);
        assert_eq!(gen.next_batch().unwrap().request_count, 2);
        assert_eq!(gen.next_batch().unwrap().request_count, 1);
        assert!(gen.next_batch().is_none());
    }

    #[test]
    fn test_generator_restartable() {
        let collect_pages = |gen: &mut dyn RequestGen| {
            let mut pages = Vec::new();
            while let Some(batch) = gen.next_batch() {
                pages.extend(batch.requests.iter().map(|r| r.page));
            }
            pages
        };

        let mut first = AppReviewGen::new(test_context(DataType::AppReview), 99, 7, 3, 5, 400);
        let mut second = AppReviewGen::new(test_context(DataType::AppReview), 99, 7, 3, 5, 400);
        assert_eq!(collect_pages(&mut first), collect_pages(&mut second));
    }
}
