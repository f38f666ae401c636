//! Request generator behavior: batch shapes, page windows, exhaustion, and
//! resume bookmarks.

use proptest::prelude::*;

use appharvest::context::{Category, Context, DataType};
use appharvest::request::{AppDataGen, AppReviewGen, RequestGen};

fn app_context() -> Context {
    Context::new(1, 1, Category::BOOKS, DataType::AppData)
}

#[test]
fn test_two_full_batches_then_exhaustion() {
    // category=6018, max=4, batch=2, start_page=10, limit=10
    let mut gen = AppDataGen::new(app_context(), 6018, 4, 2, 10, 10);

    let batch_a = gen.next_batch().expect("first batch");
    assert_eq!(batch_a.request_count, 2);
    let pages: Vec<_> = batch_a.requests.iter().map(|r| r.page).collect();
    assert_eq!(pages, vec![10, 11]);

    let batch_b = gen.next_batch().expect("second batch");
    let pages: Vec<_> = batch_b.requests.iter().map(|r| r.page).collect();
    assert_eq!(pages, vec![12, 13]);

    assert!(gen.next_batch().is_none());
    assert!(gen.next_batch().is_none());
}

#[test]
fn test_page_window_invariant() {
    let mut gen = AppDataGen::new(app_context(), 6018, 4, 2, 10, 10);
    while let Some(batch) = gen.next_batch() {
        for request in &batch.requests {
            assert_eq!(request.start_index(), request.page * 10);
            assert_eq!(request.end_index(), (request.page + 1) * 10);
            assert_eq!(
                request.params.get("offset").map(String::as_str),
                Some(request.start_index().to_string().as_str())
            );
        }
    }
}

#[test]
fn test_bookmark_tracks_cursor() {
    let mut gen = AppDataGen::new(app_context(), 6018, 10, 4, 5, 200);
    assert_eq!(gen.bookmark(), 5);
    gen.next_batch().unwrap();
    assert_eq!(gen.bookmark(), 9);
    gen.next_batch().unwrap();
    assert_eq!(gen.bookmark(), 13);
}

#[test]
fn test_review_generator_storefront_headers() {
    let review_context = Context::new(1, 1, Category::BOOKS, DataType::AppReview);
    let mut gen = AppReviewGen::new(review_context, 555, 2, 2, 0, 400);
    let batch = gen.next_batch().unwrap();
    assert_eq!(batch.context.app_id, Some(555));
    for request in &batch.requests {
        let headers = request.headers.as_ref().expect("storefront headers");
        assert!(headers.contains_key("X-Apple-Store-Front"));
        assert!(request.baseurl.contains("id=555"));
    }
}

proptest! {
    /// A generator over N requests in batches of B yields ceil(N/B) batches
    /// totalling exactly N requests, with consecutive pages starting at
    /// start_page.
    #[test]
    fn prop_batch_count_and_page_coverage(
        max_requests in 1usize..200,
        batch_size in 1usize..50,
        start_page in 0usize..1000,
    ) {
        let mut gen = AppDataGen::new(
            app_context(), 6018, max_requests, batch_size, start_page, 200,
        );

        let mut batches = 0usize;
        let mut pages = Vec::new();
        while let Some(batch) = gen.next_batch() {
            batches += 1;
            prop_assert!(batch.request_count <= batch_size);
            prop_assert_eq!(batch.request_count, batch.requests.len());
            pages.extend(batch.requests.iter().map(|r| r.page));
        }

        prop_assert_eq!(batches, max_requests.div_ceil(batch_size));
        prop_assert_eq!(pages.len(), max_requests);
        let expected: Vec<_> = (start_page..start_page + max_requests).collect();
        prop_assert_eq!(pages, expected);
    }

    /// Rebuilding a generator with identical inputs reproduces the sequence.
    #[test]
    fn prop_generator_restartable(
        max_requests in 1usize..100,
        batch_size in 1usize..20,
        start_page in 0usize..100,
    ) {
        let collect = |mut gen: AppDataGen| {
            let mut pages = Vec::new();
            while let Some(batch) = gen.next_batch() {
                pages.extend(batch.requests.iter().map(|r| r.page));
            }
            pages
        };
        let first = collect(AppDataGen::new(
            app_context(), 6018, max_requests, batch_size, start_page, 200,
        ));
        let second = collect(AppDataGen::new(
            app_context(), 6018, max_requests, batch_size, start_page, 200,
        ));
        prop_assert_eq!(first, second);
    }
}
