//! Typed storefront entities.
//!
//! `RawAppData` / `RawAppReview` mirror the JSON the storefront actually
//! returns; `AppData` / `AppReview` are the normalized records handed to the
//! load stage. Validation is serde-driven: a record missing a required field
//! fails deserialization and is counted by the transform stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the search endpoint's `results` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAppData {
    pub track_id: u64,
    pub track_name: String,
    pub track_censored_name: Option<String>,
    pub bundle_id: Option<String>,
    pub description: Option<String>,
    pub primary_genre_id: u32,
    pub primary_genre_name: String,
    #[serde(default)]
    pub average_user_rating: f64,
    #[serde(default)]
    pub average_user_rating_for_current_version: f64,
    #[serde(default)]
    pub user_rating_count: u64,
    #[serde(default)]
    pub user_rating_count_for_current_version: u64,
    pub artist_id: u64,
    pub artist_name: String,
    pub release_date: Option<DateTime<Utc>>,
    pub current_version_release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub price: f64,
    pub currency: Option<String>,
    pub genre_ids: Option<Vec<String>>,
    pub artist_view_url: Option<String>,
    pub seller_name: Option<String>,
    pub seller_url: Option<String>,
    pub track_content_rating: Option<String>,
    pub content_advisory_rating: Option<String>,
    /// The storefront serializes this as a decimal string.
    pub file_size_bytes: Option<String>,
    pub minimum_os_version: Option<String>,
    pub version: Option<String>,
    pub release_notes: Option<String>,
    pub artwork_url100: Option<String>,
    pub track_view_url: Option<String>,
    pub artwork_url512: Option<String>,
    pub artwork_url60: Option<String>,
    pub ipad_screenshot_urls: Option<Vec<String>>,
    pub screenshot_urls: Option<Vec<String>>,
    pub supported_devices: Option<Vec<String>>,
}

/// Normalized application record.
#[derive(Debug, Clone, Serialize)]
pub struct AppData {
    pub app_id: u64,
    pub app_name: String,
    pub app_censored_name: Option<String>,
    pub bundle_id: Option<String>,
    pub description: Option<String>,
    pub category_id: u32,
    pub category: String,
    pub rating_average: f64,
    pub rating_average_current_version: f64,
    pub rating_count: u64,
    pub rating_count_current_version: u64,
    pub developer_id: u64,
    pub developer_name: String,
    pub release_date: Option<DateTime<Utc>>,
    pub release_date_current_version: Option<DateTime<Utc>>,
    pub categories: Vec<u32>,
    pub price: f64,
    pub currency: Option<String>,
    pub rating_average_current_version_change: f64,
    pub rating_average_current_version_pct_change: f64,
    pub url_developer_view: Option<String>,
    pub seller_name: Option<String>,
    pub seller_url: Option<String>,
    pub app_content_rating: Option<String>,
    pub content_advisory_rating: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub minimum_os_version: Option<String>,
    pub version: Option<String>,
    pub release_notes: Option<String>,
    pub iphone_support: bool,
    pub ipad_support: bool,
    pub url_artwork_100: Option<String>,
    pub url_app_view: Option<String>,
    pub url_artwork_512: Option<String>,
    pub url_artwork_60: Option<String>,
    pub urls_screenshot_ipad: Vec<String>,
    pub urls_screenshot: Vec<String>,
    pub extract_date: DateTime<Utc>,
}

impl From<RawAppData> for AppData {
    fn from(raw: RawAppData) -> Self {
        let iphone_support = raw
            .supported_devices
            .as_deref()
            .is_some_and(|devices| devices.iter().any(|d| d.contains("iPhone")));
        let ipad_support = raw
            .supported_devices
            .as_deref()
            .is_some_and(|devices| devices.iter().any(|d| d.contains("iPad")));

        let rating_change = raw.average_user_rating_for_current_version - raw.average_user_rating;
        let rating_change_pct = if raw.average_user_rating > 0.0 {
            rating_change / raw.average_user_rating * 100.0
        } else {
            0.0
        };

        let categories = raw
            .genre_ids
            .unwrap_or_default()
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect();

        Self {
            app_id: raw.track_id,
            app_name: raw.track_name,
            app_censored_name: raw.track_censored_name,
            bundle_id: raw.bundle_id,
            description: raw.description,
            category_id: raw.primary_genre_id,
            category: raw.primary_genre_name,
            rating_average: raw.average_user_rating,
            rating_average_current_version: raw.average_user_rating_for_current_version,
            rating_count: raw.user_rating_count,
            rating_count_current_version: raw.user_rating_count_for_current_version,
            developer_id: raw.artist_id,
            developer_name: raw.artist_name,
            release_date: raw.release_date,
            release_date_current_version: raw.current_version_release_date,
            categories,
            price: raw.price,
            currency: raw.currency,
            rating_average_current_version_change: rating_change,
            rating_average_current_version_pct_change: rating_change_pct,
            url_developer_view: raw.artist_view_url,
            seller_name: raw.seller_name,
            seller_url: raw.seller_url,
            app_content_rating: raw.track_content_rating,
            content_advisory_rating: raw.content_advisory_rating,
            file_size_bytes: raw.file_size_bytes.and_then(|s| s.parse().ok()),
            minimum_os_version: raw.minimum_os_version,
            version: raw.version,
            release_notes: raw.release_notes,
            iphone_support,
            ipad_support,
            url_artwork_100: raw.artwork_url100,
            url_app_view: raw.track_view_url,
            url_artwork_512: raw.artwork_url512,
            url_artwork_60: raw.artwork_url60,
            urls_screenshot_ipad: raw.ipad_screenshot_urls.unwrap_or_default(),
            urls_screenshot: raw.screenshot_urls.unwrap_or_default(),
            extract_date: Utc::now(),
        }
    }
}

/// One entry of the review endpoint's `userReviewList`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAppReview {
    pub user_review_id: String,
    #[serde(default)]
    pub rating: f64,
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub vote_sum: i64,
    #[serde(default)]
    pub vote_count: i64,
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Normalized review record.
#[derive(Debug, Clone, Serialize)]
pub struct AppReview {
    pub review_id: String,
    pub app_id: u64,
    pub rating: f64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub vote_sum: i64,
    pub vote_count: i64,
    pub author: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub extract_date: DateTime<Utc>,
}

impl AppReview {
    pub fn from_raw(raw: RawAppReview, app_id: u64) -> Self {
        Self {
            review_id: raw.user_review_id,
            app_id,
            rating: raw.rating,
            title: raw.title,
            body: raw.body,
            vote_sum: raw.vote_sum,
            vote_count: raw.vote_count,
            author: raw.name,
            date: raw.date,
            extract_date: Utc::now(),
        }
    }
}

/// Artifact union flowing between stages.
#[derive(Debug, Clone)]
pub enum Entities {
    Apps(Vec<AppData>),
    Reviews(Vec<AppReview>),
}

impl Entities {
    pub fn len(&self) -> usize {
        match self {
            Entities::Apps(apps) => apps.len(),
            Entities::Reviews(reviews) => reviews.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_raw_app(track_id: u64) -> serde_json::Value {
        json!({
            "trackId": track_id,
            "trackName": "Reading Room",
            "trackCensoredName": "Reading Room",
            "bundleId": "com.example.readingroom",
            "description": "A reading app.",
            "primaryGenreId": 6018,
            "primaryGenreName": "Book",
            "averageUserRating": 4.0,
            "averageUserRatingForCurrentVersion": 4.4,
            "userRatingCount": 1200,
            "userRatingCountForCurrentVersion": 300,
            "artistId": 99,
            "artistName": "Example Labs",
            "releaseDate": "2020-01-15T08:00:00Z",
            "currentVersionReleaseDate": "2024-03-01T08:00:00Z",
            "price": 0.0,
            "currency": "USD",
            "genreIds": ["6018", "6000"],
            "fileSizeBytes": "52428800",
            "supportedDevices": ["iPhone15,2", "iPad13,1"]
        })
    }

    #[test]
    fn test_raw_app_data_deserializes() {
        let raw: RawAppData = serde_json::from_value(sample_raw_app(42)).unwrap();
        assert_eq!(raw.track_id, 42);
        assert_eq!(raw.primary_genre_id, 6018);
        assert_eq!(raw.file_size_bytes.as_deref(), Some("52428800"));
    }

    #[test]
    fn test_missing_required_field_fails() {
        let mut value = sample_raw_app(42);
        value.as_object_mut().unwrap().remove("trackName");
        assert!(serde_json::from_value::<RawAppData>(value).is_err());
    }

    #[test]
    fn test_app_data_mapping() {
        let raw: RawAppData = serde_json::from_value(sample_raw_app(42)).unwrap();
        let app = AppData::from(raw);
        assert_eq!(app.app_id, 42);
        assert_eq!(app.category_id, 6018);
        assert!(app.iphone_support);
        assert!(app.ipad_support);
        assert_eq!(app.categories, vec![6018, 6000]);
        assert_eq!(app.file_size_bytes, Some(52_428_800));
        assert!((app.rating_average_current_version_change - 0.4).abs() < 1e-9);
        assert!((app.rating_average_current_version_pct_change - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_review_mapping() {
        let raw: RawAppReview = serde_json::from_value(json!({
            "userReviewId": "r-1",
            "rating": 5.0,
            "title": "Great",
            "body": "Works well.",
            "voteSum": 3,
            "voteCount": 4,
            "name": "reader",
            "date": "2024-05-01T12:00:00Z"
        }))
        .unwrap();
        let review = AppReview::from_raw(raw, 42);
        assert_eq!(review.review_id, "r-1");
        assert_eq!(review.app_id, 42);
        assert_eq!(review.vote_count, 4);
    }

    #[test]
    fn test_entities_len() {
        let entities = Entities::Reviews(vec![]);
        assert!(entities.is_empty());
    }
}
