//! Outbound header pools.
//!
//! Requests that carry no explicit headers draw from a rotating pool of
//! realistic desktop browser profiles. The review endpoint additionally
//! requires the storefront header block identifying the US store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A single ready-to-send header set.
pub type HeaderSet = BTreeMap<String, String>;

const ACCEPT: &str = "application/json,text/javascript,*/*;q=0.01";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Rotating iterator over browser header profiles.
///
/// Rotation is shared across clones through an atomic cursor so concurrent
/// request tasks never reuse the same profile back to back.
#[derive(Debug, Default)]
pub struct BrowserHeaders {
    cursor: AtomicUsize,
}

impl BrowserHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next header profile in rotation.
    pub fn next_headers(&self) -> HeaderSet {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % USER_AGENTS.len();
        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), USER_AGENTS[idx].to_string());
        headers.insert("Accept".to_string(), ACCEPT.to_string());
        headers.insert("Accept-Language".to_string(), ACCEPT_LANGUAGE.to_string());
        headers.insert("Connection".to_string(), "keep-alive".to_string());
        headers
    }

    pub fn pool_size() -> usize {
        USER_AGENTS.len()
    }
}

/// Header block the review endpoint requires: store-front identity plus an
/// XHR marker. Without it the endpoint answers with an empty page.
pub fn storefront_headers() -> HeaderSet {
    let mut headers = BTreeMap::new();
    headers.insert("X-Apple-Store-Front".to_string(), "143441-1,29".to_string());
    headers.insert("Accept-Language".to_string(), "en-us".to_string());
    headers.insert("X-Requested-With".to_string(), "XMLHttpRequest".to_string());
    headers.insert(
        "User-Agent".to_string(),
        "iTunes/12.12 (Windows; Microsoft Windows 10 x64) AppleWebKit/7613".to_string(),
    );
    headers
}
