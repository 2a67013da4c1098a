//! Remote seams
//!
//! Every coordinator talks to the backend through one of these traits.
//! [`crate::http::HttpBackend`] implements all of them over HTTP; tests use
//! in-memory or mocked implementations.

use crate::error::ApiError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tm_model::{CorrelationId, HolderId, ModelId, StatusReport, TreeId, VersionStamp};

/// A granted or renewed edit lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockGrant {
    /// Session holding the lock
    pub holder: HolderId,
    /// When the lock was first acquired
    pub acquired_at: DateTime<Utc>,
    /// When the lock lapses without a heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Another session's lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Session holding the lock
    pub holder: HolderId,
    /// When that session acquired it
    pub acquired_at: DateTime<Utc>,
}

/// Lock acquisition result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockResponse {
    /// Lock is ours
    Granted(LockGrant),
    /// Lock belongs to someone else
    Held(LockHolder),
}

/// Heartbeat result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    /// Lock extended
    Renewed(LockGrant),
    /// Lock now belongs to someone else
    Stolen(LockHolder),
}

/// A persisted document addressed on the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentRef {
    /// A model's threat catalog
    Catalog(ModelId),
    /// One attack tree of a model
    AttackTree {
        /// Owning model
        model: ModelId,
        /// Tree id
        tree: TreeId,
    },
}

impl DocumentRef {
    /// Catalog reference
    #[inline]
    pub fn catalog(model: impl Into<ModelId>) -> Self {
        Self::Catalog(model.into())
    }

    /// Attack tree reference
    #[inline]
    pub fn attack_tree(model: impl Into<ModelId>, tree: impl Into<TreeId>) -> Self {
        Self::AttackTree {
            model: model.into(),
            tree: tree.into(),
        }
    }

    /// Owning model
    #[inline]
    #[must_use]
    pub fn model(&self) -> &ModelId {
        match self {
            Self::Catalog(model) | Self::AttackTree { model, .. } => model,
        }
    }

    /// Same document under another model (used for clones)
    #[must_use]
    pub fn with_model(&self, model: ModelId) -> Self {
        match self {
            Self::Catalog(_) => Self::Catalog(model),
            Self::AttackTree { tree, .. } => Self::AttackTree {
                model,
                tree: tree.clone(),
            },
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog(model) => write!(f, "catalog:{model}"),
            Self::AttackTree { model, tree } => write!(f, "attack-tree:{model}/{tree}"),
        }
    }
}

/// A document body with its server version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Server version
    pub version: VersionStamp,
    /// Semantic payload
    pub body: serde_json::Value,
}

/// Result of a versioned write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// Written; the document now has this version
    Saved(VersionStamp),
    /// Base version was stale
    Conflict {
        /// Version currently on the server
        server_version: VersionStamp,
    },
}

/// How an interrupt event was handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckStatus {
    /// Applied to the model
    Applied,
    /// Could not be applied
    Rejected {
        /// Why
        reason: String,
    },
}

/// Acknowledgment sent back to the collaborating agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptAck {
    /// Event being acknowledged
    pub correlation_id: CorrelationId,
    /// Outcome
    #[serde(flatten)]
    pub status: AckStatus,
}

impl InterruptAck {
    /// Applied acknowledgment
    #[inline]
    #[must_use]
    pub fn applied(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            status: AckStatus::Applied,
        }
    }

    /// Rejected acknowledgment
    #[inline]
    pub fn rejected(correlation_id: CorrelationId, reason: impl Into<String>) -> Self {
        Self {
            correlation_id,
            status: AckStatus::Rejected {
                reason: reason.into(),
            },
        }
    }

    /// Whether the event was applied
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self.status, AckStatus::Applied)
    }
}

/// Collaborator access level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    /// View only
    ReadOnly,
    /// View and edit
    Edit,
}

impl AccessLevel {
    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "READ_ONLY",
            Self::Edit => "EDIT",
        }
    }

    /// Whether this level permits edits
    #[inline]
    #[must_use]
    pub fn can_edit(self) -> bool {
        matches!(self, Self::Edit)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "READ_ONLY" | "READ" => Ok(Self::ReadOnly),
            "EDIT" | "WRITE" => Ok(Self::Edit),
            other => Err(format!("unknown access level '{other}'")),
        }
    }
}

/// A user the model is shared with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    /// User id
    pub user_id: String,
    /// Access granted
    pub access_level: AccessLevel,
    /// Whether this user owns the model
    #[serde(default)]
    pub is_owner: bool,
}

impl Collaborator {
    /// Create a collaborator entry
    #[inline]
    pub fn new(user_id: impl Into<String>, access_level: AccessLevel) -> Self {
        Self {
            user_id: user_id.into(),
            access_level,
            is_owner: false,
        }
    }

    /// Mark as owner
    #[inline]
    #[must_use]
    pub fn as_owner(mut self) -> Self {
        self.is_owner = true;
        self
    }
}

/// Backend processing status
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch the current status of a model
    async fn fetch_status(&self, model: &ModelId) -> Result<StatusReport, ApiError>;
}

/// Edit lock service
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LockService: Send + Sync {
    /// Try to take the lock
    async fn acquire(&self, model: &ModelId, holder: &HolderId) -> Result<LockResponse, ApiError>;

    /// Extend a held lock
    async fn renew(&self, model: &ModelId, holder: &HolderId) -> Result<RenewOutcome, ApiError>;

    /// Give the lock up
    async fn release(&self, model: &ModelId, holder: &HolderId) -> Result<(), ApiError>;
}

/// Versioned document persistence
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current server version of a document
    async fn current_version(&self, doc: &DocumentRef) -> Result<VersionStamp, ApiError>;

    /// Fetch a document body
    async fn fetch(&self, doc: &DocumentRef) -> Result<StoredDocument, ApiError>;

    /// Write a body based on `base_version`
    async fn put(
        &self,
        doc: &DocumentRef,
        body: serde_json::Value,
        base_version: &VersionStamp,
    ) -> Result<PutOutcome, ApiError>;

    /// Create a new model holding `body`; returns the copy's reference
    async fn create_copy(
        &self,
        doc: &DocumentRef,
        body: serde_json::Value,
    ) -> Result<DocumentRef, ApiError>;
}

/// Interrupt acknowledgment channel
#[async_trait::async_trait]
pub trait AckSink: Send + Sync {
    /// Send one acknowledgment
    async fn acknowledge(&self, model: &ModelId, ack: InterruptAck) -> Result<(), ApiError>;
}

/// Model sharing
#[async_trait::async_trait]
pub trait CollaboratorService: Send + Sync {
    /// Everyone with access, owner included
    async fn list(&self, model: &ModelId) -> Result<Vec<Collaborator>, ApiError>;

    /// Grant access to a user
    async fn add(&self, model: &ModelId, user: &str, level: AccessLevel) -> Result<(), ApiError>;

    /// Revoke a user's access
    async fn remove(&self, model: &ModelId, user: &str) -> Result<(), ApiError>;

    /// Change a user's access level
    async fn update_access(
        &self,
        model: &ModelId,
        user: &str,
        level: AccessLevel,
    ) -> Result<(), ApiError>;
}

/// Architecture diagram images
#[async_trait::async_trait]
pub trait ImageSource: Send + Sync {
    /// Short-lived download URL for a model's diagram
    async fn presigned_url(&self, model: &ModelId) -> Result<String, ApiError>;

    /// Download a blob
    async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ack_wire_format() {
        let ack = InterruptAck::rejected(CorrelationId::new("c-1"), "unknown threat");
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "correlation_id": "c-1",
                "status": "rejected",
                "reason": "unknown threat"
            })
        );
    }

    #[test]
    fn access_level_parsing() {
        assert_eq!("read_only".parse::<AccessLevel>().unwrap(), AccessLevel::ReadOnly);
        assert_eq!("EDIT".parse::<AccessLevel>().unwrap(), AccessLevel::Edit);
        assert!("owner".parse::<AccessLevel>().is_err());
        assert_eq!(
            serde_json::to_string(&AccessLevel::ReadOnly).unwrap(),
            "\"READ_ONLY\""
        );
    }

    #[test]
    fn document_ref_clone_target() {
        let doc = DocumentRef::attack_tree("tm-1", "t-9");
        let copy = doc.with_model(ModelId::new("tm-2"));
        assert_eq!(copy, DocumentRef::attack_tree("tm-2", "t-9"));
        assert_eq!(copy.to_string(), "attack-tree:tm-2/t-9");
    }
}
