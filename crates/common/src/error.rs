//! Unified error type for the weather dashboard, plus the classified
//! failure handed to every caller waiting on a fetch.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The provider never answered (connect error, timeout, reset).
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Upstream error (status={status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Shared cache error: {0}")]
    SharedCache(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status the provider answered with, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Upstream { status, .. } => Some(*status),
            Error::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Server-supplied `retry-after` hint, in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::Upstream { retry_after_ms, .. } | Error::RateLimited { retry_after_ms, .. } => {
                *retry_after_ms
            }
            _ => None,
        }
    }

    /// Human-readable message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Upstream { message, .. } | Error::RateLimited { message, .. } => message.clone(),
            Error::Http(msg)
            | Error::Malformed(msg)
            | Error::SharedCache(msg)
            | Error::Config(msg)
            | Error::Other(msg) => msg.clone(),
            Error::Json(e) => e.to_string(),
            Error::Io(e) => e.to_string(),
        }
    }
}

/// Coarse failure category used by callers to pick a transport response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    RateLimited,
    /// Transport error or 5xx that survived the retry budget.
    Transient,
    /// 4xx other than 429.
    Permanent,
    Malformed,
    Internal,
}

/// The single failure object every coalesced waiter receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct FetchFailure {
    pub class: FailureClass,
    pub status: Option<u16>,
    pub message: String,
    /// Upstream attempts made before giving up (0 if none were made).
    pub attempts: u32,
}

impl FetchFailure {
    pub fn from_error(err: &Error, attempts: u32) -> Self {
        let class = match err {
            Error::RateLimited { .. } => FailureClass::RateLimited,
            Error::Http(_) => FailureClass::Transient,
            Error::Upstream { status, .. } if (500..=599).contains(status) => {
                FailureClass::Transient
            }
            Error::Upstream { .. } => FailureClass::Permanent,
            Error::Malformed(_) | Error::Json(_) => FailureClass::Malformed,
            _ => FailureClass::Internal,
        };

        Self {
            class,
            status: err.status(),
            message: err.message(),
            attempts,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Internal,
            status: None,
            message: message.into(),
            attempts: 0,
        }
    }
}
