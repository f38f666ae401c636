//! Error taxonomy and crate error types.
//!
//! Request failures are classified into categories that decide the retry
//! policy: transient network/server conditions and timeouts are retried with
//! exponential backoff, 404 is dropped immediately, other client errors are
//! retried up to the configured limit and then dropped.

use std::fmt;
use thiserror::Error;

/// Categories of errors observed while acquiring storefront data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP 4xx other than 404
    ClientError,
    /// HTTP 404 - absent resource, never retried
    NotFound,
    /// HTTP 5xx
    ServerError,
    /// DNS, connect, and transport failures
    NetworkError,
    /// Per-call timeout expiry
    TimeoutError,
    /// TLS/certificate failures
    TlsError,
    /// Anything else
    OtherError,
}

impl ErrorCategory {
    /// Categorizes an HTTP status code. Success codes (2xx/3xx) yield `None`.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=399 => None,
            404 => Some(ErrorCategory::NotFound),
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorizes a transport-level reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::from_status_code(status.as_u16()).unwrap_or(ErrorCategory::OtherError);
        }
        if error.is_timeout() {
            ErrorCategory::TimeoutError
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode() {
            ErrorCategory::NetworkError
        } else {
            let error_msg = error.to_string().to_lowercase();
            if error_msg.contains("certificate")
                || error_msg.contains("tls")
                || error_msg.contains("ssl")
            {
                ErrorCategory::TlsError
            } else if error_msg.contains("timeout") {
                ErrorCategory::TimeoutError
            } else if error_msg.contains("dns")
                || error_msg.contains("resolve")
                || error_msg.contains("connect")
                || error_msg.contains("connection")
            {
                ErrorCategory::NetworkError
            } else {
                ErrorCategory::OtherError
            }
        }
    }

    /// Whether a request in this category should re-enter the retry loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCategory::NotFound)
    }

    /// Stable label for metrics and error-log rows.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::NotFound => "HTTP 404 Not Found",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }

    pub fn all() -> Vec<ErrorCategory> {
        vec![
            ErrorCategory::ClientError,
            ErrorCategory::NotFound,
            ErrorCategory::ServerError,
            ErrorCategory::NetworkError,
            ErrorCategory::TimeoutError,
            ErrorCategory::TlsError,
            ErrorCategory::OtherError,
        ]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A classified request failure carried through the retry loop.
#[derive(Debug, Clone)]
pub struct CategorizedError {
    pub category: ErrorCategory,
    pub status_code: Option<u16>,
    pub message: String,
}

impl CategorizedError {
    pub fn from_status(status_code: u16, message: String) -> Option<Self> {
        ErrorCategory::from_status_code(status_code).map(|category| Self {
            category,
            status_code: Some(status_code),
            message,
        })
    }

    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        Self {
            category: ErrorCategory::from_reqwest_error(error),
            status_code: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }

    /// Numeric code persisted to the error log: the HTTP status when one
    /// exists, otherwise a sentinel per category.
    pub fn code(&self) -> u16 {
        if let Some(status) = self.status_code {
            return status;
        }
        match self.category {
            ErrorCategory::TimeoutError => 408,
            ErrorCategory::NetworkError => 503,
            _ => 500,
        }
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => write!(f, "[{}] HTTP {}: {}", self.category.label(), status, self.message),
            None => write!(f, "[{}] {}", self.category.label(), self.message),
        }
    }
}

/// Dispatcher failures that are fatal to the whole batch.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unable to establish an HTTP session after {attempts} attempts: {message}")]
    SessionCreate { attempts: usize, message: String },
    #[error("dispatch refused: session is closed")]
    SessionClosed,
}

/// Stage failures surfaced to the task.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("transform produced no valid records from {records_in} inputs")]
    EmptyTransform { records_in: usize },
    #[error("load failed: {0}")]
    Load(String),
}

/// Lifecycle violations in the orchestration layer.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("cannot {action} from status {status}")]
    InvalidTransition { action: &'static str, status: String },
    #[error("scheduled time cannot be in the past")]
    ScheduleInPast,
    #[error("maximum retries ({max_retries}) exceeded for job {job_id}")]
    RetriesExhausted { job_id: String, max_retries: u32 },
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Identity subsystem failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("index store unavailable at {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt index record: {0}")]
    Corrupt(String),
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_success_codes() {
        assert_eq!(ErrorCategory::from_status_code(200), None);
        assert_eq!(ErrorCategory::from_status_code(204), None);
        assert_eq!(ErrorCategory::from_status_code(301), None);
    }

    #[test]
    fn test_categorize_4xx_errors() {
        assert_eq!(
            ErrorCategory::from_status_code(400),
            Some(ErrorCategory::ClientError)
        );
        assert_eq!(
            ErrorCategory::from_status_code(429),
            Some(ErrorCategory::ClientError)
        );
    }

    #[test]
    fn test_404_is_not_found_and_not_retryable() {
        let category = ErrorCategory::from_status_code(404).unwrap();
        assert_eq!(category, ErrorCategory::NotFound);
        assert!(!category.is_retryable());
    }

    #[test]
    fn test_categorize_5xx_errors() {
        assert_eq!(
            ErrorCategory::from_status_code(500),
            Some(ErrorCategory::ServerError)
        );
        assert_eq!(
            ErrorCategory::from_status_code(503),
            Some(ErrorCategory::ServerError)
        );
    }

    #[test]
    fn test_retryable_categories() {
        assert!(ErrorCategory::ServerError.is_retryable());
        assert!(ErrorCategory::TimeoutError.is_retryable());
        assert!(ErrorCategory::NetworkError.is_retryable());
        assert!(ErrorCategory::ClientError.is_retryable());
    }

    #[test]
    fn test_labels() {
        assert_eq!(ErrorCategory::ClientError.label(), "client_error");
        assert_eq!(ErrorCategory::NotFound.label(), "not_found");
        assert_eq!(ErrorCategory::TimeoutError.label(), "timeout_error");
    }

    #[test]
    fn test_categorized_error_code_fallbacks() {
        let err = CategorizedError {
            category: ErrorCategory::TimeoutError,
            status_code: None,
            message: "deadline exceeded".to_string(),
        };
        assert_eq!(err.code(), 408);

        let err = CategorizedError::from_status(429, "too many requests".to_string()).unwrap();
        assert_eq!(err.code(), 429);
    }

    #[test]
    fn test_categorized_error_display() {
        let err = CategorizedError::from_status(503, "unavailable".to_string()).unwrap();
        let display = format!("{}", err);
        assert!(display.contains("server_error"));
        assert!(display.contains("503"));
    }

    #[test]
    fn test_all_categories() {
        assert_eq!(ErrorCategory::all().len(), 7);
    }
}
