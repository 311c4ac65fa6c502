use std::time::Duration;

use thiserror::Error;

use crate::fetch::retry::RetryClass;
use crate::vendors::Vendor;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    /// Credentials or token rejected by the vendor after a fresh token was tried.
    #[error("authentication failed for {vendor}: {message}")]
    Authentication { vendor: Vendor, message: String },
    /// The vendor signalled that the per-window call budget was exceeded.
    #[error("rate limited by {vendor}")]
    RateLimited {
        vendor: Vendor,
        retry_after: Option<Duration>,
    },
    /// Connection failure, client-side timeout or 5xx response.
    #[error("transient failure from {vendor}: {message}")]
    Transient { vendor: Vendor, message: String },
    /// Response body did not have the expected shape.
    #[error("unexpected payload from {vendor}: {message}")]
    DataFormat { vendor: Vendor, message: String },
    /// Vendor answered with a non-retryable error code or 4xx status.
    #[error("{vendor} rejected the request ({code}): {message}")]
    Rejected {
        vendor: Vendor,
        code: String,
        message: String,
    },
    #[error("{vendor} request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        vendor: Vendor,
        attempts: u32,
        last: Box<AppError>,
    },
    #[error("deadline exceeded")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("token store failure: {0}")]
    TokenStore(String),
    #[error("{vendor} does not support {operation}")]
    Unsupported {
        vendor: Vendor,
        operation: &'static str,
    },
    #[error("token manager is shut down")]
    Closed,
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Config(Vec<String>),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn data_format<T: Into<String>>(vendor: Vendor, msg: T) -> Self {
        AppError::DataFormat {
            vendor,
            message: msg.into(),
        }
    }

    pub fn transient<T: Into<String>>(vendor: Vendor, msg: T) -> Self {
        AppError::Transient {
            vendor,
            message: msg.into(),
        }
    }

    pub fn authentication<T: Into<String>>(vendor: Vendor, msg: T) -> Self {
        AppError::Authentication {
            vendor,
            message: msg.into(),
        }
    }

    /// How the resilient client should react to this error on a single attempt.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Authentication { .. } => RetryClass::Reauthenticate,
            Self::RateLimited { .. } | Self::Transient { .. } => RetryClass::WithBackoff,
            _ => RetryClass::Never,
        }
    }

    /// Errors that abort a whole batch instead of a single work item.
    pub fn is_process_fatal(&self) -> bool {
        match self {
            Self::TokenStore(_) | Self::Closed => true,
            Self::RetriesExhausted { last, .. } => last.is_process_fatal(),
            _ => false,
        }
    }

    /// Server-provided delay hint, when the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_retry_behaviour() {
        let auth = AppError::authentication(Vendor::Kiwoom, "expired");
        assert_eq!(auth.retry_class(), RetryClass::Reauthenticate);

        let limited = AppError::RateLimited {
            vendor: Vendor::KoreaInvestment,
            retry_after: None,
        };
        assert_eq!(limited.retry_class(), RetryClass::WithBackoff);

        let transient = AppError::transient(Vendor::Kiwoom, "502 Bad Gateway");
        assert_eq!(transient.retry_class(), RetryClass::WithBackoff);

        let malformed = AppError::data_format(Vendor::Kiwoom, "missing list");
        assert_eq!(malformed.retry_class(), RetryClass::Never);
        assert_eq!(AppError::Timeout.retry_class(), RetryClass::Never);
    }

    #[test]
    fn token_store_failures_are_process_fatal() {
        assert!(AppError::TokenStore("disk full".into()).is_process_fatal());
        assert!(!AppError::data_format(Vendor::Kiwoom, "bad").is_process_fatal());

        let wrapped = AppError::RetriesExhausted {
            vendor: Vendor::Kiwoom,
            attempts: 3,
            last: Box::new(AppError::TokenStore("read-only".into())),
        };
        assert!(wrapped.is_process_fatal());
    }

    #[test]
    fn config_error_lists_every_issue() {
        let err = AppError::Config(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "invalid configuration:\n  - a\n  - b");
    }
}
