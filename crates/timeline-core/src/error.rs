//! Error types shared by the store, history sources and the runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimelineErrorCategory {
    /// Command not valid in the current state.
    Config,
    /// Transport failure inside the chat SDK.
    Network,
    RateLimited,
    /// Room or message does not exist (or is not loaded).
    NotFound,
    Internal,
}

impl TimelineErrorCategory {
    /// Whether repeating the same request may succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::RateLimited)
    }
}

/// Failure reported by a history source or raised for a rejected command.
///
/// Renderers key on `code`; `message` is for logs and humans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{code} ({category:?}): {message}")]
pub struct TimelineError {
    pub category: TimelineErrorCategory,
    pub code: String,
    pub message: String,
    /// Back-off requested by a rate-limited source.
    pub retry_after_ms: Option<u64>,
}

impl TimelineError {
    pub fn new(
        category: TimelineErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(TimelineErrorCategory::Network, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(TimelineErrorCategory::NotFound, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(TimelineErrorCategory::Internal, code, message)
    }

    /// Rate-limit failure carrying the source's back-off hint.
    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
        Self {
            retry_after_ms: Some(retry_after_ms),
            ..Self::new(TimelineErrorCategory::RateLimited, "rate_limited", message)
        }
    }

    /// A room-scoped command arrived while no room is open.
    pub fn no_open_room(action: &str) -> Self {
        Self::new(
            TimelineErrorCategory::Config,
            "no_open_room",
            format!("'{action}' needs an open room"),
        )
    }

    /// The window cannot be centered on a serial that is not in the sequence.
    pub fn message_not_loaded(serial: &str) -> Self {
        Self::not_found("message_not_loaded", format!("message {serial} is not loaded"))
    }

    pub fn is_transient(&self) -> bool {
        self.category.is_transient()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }
}

/// Per-item anomaly found while merging a batch.
///
/// Logged and reported in the batch outcome; never aborts the batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineMergeError {
    /// The serial index knows a serial the sequence does not contain.
    #[error("serial '{0}' is indexed but missing from the message sequence")]
    IndexCorruption(String),
}
