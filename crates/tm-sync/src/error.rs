//! Error types for edit coordination
//!
//! - Remote API failures ([`ApiError`])
//! - Local validation that blocks a save
//! - Version and lock conflicts that need a user decision or read-only mode
//! - Configuration problems

use crate::lock::LockTransitionError;
use chrono::{DateTime, Utc};
use tm_model::{HolderId, ModelError, VersionStamp};

/// Failures talking to the threat-designer backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Request never produced a response
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status
    #[error("status {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Response body could not be decoded
    #[error("cannot decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Create status error
    #[inline]
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Whether the request may succeed if repeated
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
        }
    }

    /// Whether the backend reported the resource missing
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::status(status.as_u16(), e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Main coordination error type
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Local structure is invalid; nothing was sent
    #[error("validation failed: {0}")]
    Validation(#[from] ModelError),

    /// Server version moved since the document was loaded
    #[error("version conflict: local {local}, server {server}")]
    Conflict {
        /// Version the local edit is based on
        local: VersionStamp,
        /// Version currently on the server
        server: VersionStamp,
    },

    /// Another session holds the edit lock
    #[error("model locked by {holder} since {acquired_at}")]
    LockConflict {
        /// Current holder
        holder: HolderId,
        /// When the holder acquired the lock
        acquired_at: DateTime<Utc>,
    },

    /// Backend call failed
    #[error("network error: {0}")]
    Network(#[from] ApiError),

    /// Lock operation not valid in the current lock state
    #[error("lock state error: {0}")]
    LockState(#[from] LockTransitionError),

    /// Edit attempted without edit rights or the lock
    #[error("session is read-only")]
    ReadOnly,

    /// Model data has not been loaded yet
    #[error("model not loaded")]
    NotLoaded,

    /// Sharing change refused
    #[error("sharing rejected: {0}")]
    Sharing(String),

    /// Conflict resolution requested without a pending conflict
    #[error("no pending conflict to resolve")]
    NoPendingConflict,

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Check if the operation may be retried unchanged
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Check if the user must decide how to proceed
    #[inline]
    #[must_use]
    pub fn requires_user_choice(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if the caller should fall back to read-only mode
    #[inline]
    #[must_use]
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }

    /// Create configuration error
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for coordination operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let network = SyncError::from(ApiError::Transport("reset".into()));
        assert!(network.is_retryable());
        assert!(!network.requires_user_choice());

        let conflict = SyncError::Conflict {
            local: VersionStamp::new("v1"),
            server: VersionStamp::new("v2"),
        };
        assert!(conflict.requires_user_choice());
        assert!(!conflict.is_retryable());

        let invalid = SyncError::from(ModelError::EmptyTree);
        assert!(!invalid.is_retryable());
        assert!(!invalid.requires_user_choice());
    }

    #[test]
    fn conflict_display() {
        let err = SyncError::Conflict {
            local: VersionStamp::new("v1"),
            server: VersionStamp::new("v2"),
        };
        assert_eq!(err.to_string(), "version conflict: local v1, server v2");
    }

    #[test]
    fn transient_statuses() {
        assert!(ApiError::status(503, "busy").is_transient());
        assert!(!ApiError::status(400, "bad").is_transient());
        assert!(ApiError::status(404, "gone").is_not_found());
    }
}
