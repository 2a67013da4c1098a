//! Collaborative edit coordination for threat models
//!
//! Keeps a local session consistent with a shared backend:
//!
//! - [`StatusPoller`]: observe backend generation runs, one callback per transition
//! - [`LockCoordinator`]: exclusive edit lock with heartbeat and RAII release
//! - [`InterruptQueue`] / [`InterruptPump`]: buffered, de-duplicated replay of
//!   agent-pushed catalog edits
//! - [`SaveCoordinator`]: validated, version-checked saves with explicit
//!   conflict resolution
//! - [`ImageCache`], [`Sharing`]: diagram blobs and collaborator management
//! - [`EditSession`]: all of the above for one model
//!
//! Every backend interaction goes through the async traits in [`api`];
//! [`HttpBackend`] implements them over HTTP.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tm_sync::{Backends, EditSession, HttpBackend, SessionOptions, SyncConfig};
//!
//! # async fn run() -> Result<(), tm_sync::SyncError> {
//! let config = SyncConfig::default().with_base_url("https://tm.example.com/api");
//! let backend = Arc::new(HttpBackend::new(&config)?);
//!
//! let mut session = EditSession::new(
//!     Backends::shared(backend),
//!     "tm-42".into(),
//!     SessionOptions::default(),
//!     config,
//! );
//! session.open(|t| println!("{:?} -> {}", t.from, t.to)).await?;
//! if !session.is_read_only() {
//!     session.edit(|m| m.title = "Payments API".to_string())?;
//!     session.save().await?;
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod api;
pub mod config;
pub mod error;
pub mod handle;
pub mod http;
pub mod images;
pub mod interrupts;
pub mod lock;
pub mod poller;
pub mod save;
pub mod session;
pub mod sharing;

pub use api::{
    AccessLevel, AckSink, AckStatus, Collaborator, CollaboratorService, DocumentRef,
    DocumentStore, ImageSource, InterruptAck, LockGrant, LockHolder, LockResponse, LockService,
    PutOutcome, RenewOutcome, StatusSource, StoredDocument,
};
pub use config::SyncConfig;
pub use error::{ApiError, SyncError, SyncResult};
pub use handle::ModelHandle;
pub use http::HttpBackend;
pub use images::{ImageCache, ImageCacheStats};
pub use interrupts::{InterruptPump, InterruptQueue};
pub use lock::{
    allowed_transitions, validate_transition, HeartbeatTracker, LockCoordinator, LockGuard,
    LockSnapshot, LockState, LockTransitionError,
};
pub use poller::{PollOutcome, PollerHandle, StatusPoller, StatusTransition, TransitionDetector};
pub use save::{
    AttackTreeDocument, ConflictChoice, Document, PendingConflict, Resolution, SaveCoordinator,
    SaveOutcome,
};
pub use session::{model_from_stored, Backends, EditSession, SessionOptions};
pub use sharing::{effective_read_only, Sharing};
