//! Versioned saves
//!
//! [`SaveCoordinator::save`] runs the save pipeline for one document:
//!
//! 1. Validate locally; invalid documents never reach the network
//! 2. Serialize the semantic payload (view state stripped)
//! 3. Compare the caller's version with the server's; a mismatch is a
//!    [`SyncError::Conflict`] that must be resolved explicitly
//! 4. Write, then clear the dirty flag and show the success indicator
//!
//! Edits recorded with [`SaveCoordinator::mark_dirty`] while a write is in
//! flight keep the document dirty, since the payload was taken before them.
//!
//! A save already in flight turns further calls into
//! [`SaveOutcome::Suppressed`].

use crate::api::{DocumentRef, DocumentStore, PutOutcome, StoredDocument};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tm_model::{AttackTree, ModelError, ModelId, ThreatModel, TreeId, VersionStamp};
use tokio::time::Instant;

/// Something the coordinator can persist
pub trait Document {
    /// Backend address
    fn reference(&self) -> DocumentRef;

    /// Local structural checks
    ///
    /// # Errors
    /// [`ModelError`] describing the first problem found.
    fn validate(&self) -> Result<(), ModelError>;

    /// Semantic body sent to the backend
    ///
    /// # Errors
    /// [`SyncError::Serialization`] if encoding fails.
    fn payload(&self) -> SyncResult<serde_json::Value>;
}

impl Document for ThreatModel {
    fn reference(&self) -> DocumentRef {
        DocumentRef::Catalog(self.id.clone())
    }

    fn validate(&self) -> Result<(), ModelError> {
        let mut names = HashSet::new();
        for threat in &self.threats {
            if threat.name.trim().is_empty() {
                return Err(ModelError::BlankThreatName);
            }
            if !names.insert(threat.name.as_str()) {
                return Err(ModelError::DuplicateThreat(threat.name.clone()));
            }
        }
        Ok(())
    }

    fn payload(&self) -> SyncResult<serde_json::Value> {
        Ok(serde_json::to_value(self.catalog_payload())?)
    }
}

/// An attack tree together with its address
#[derive(Debug, Clone, PartialEq)]
pub struct AttackTreeDocument {
    /// Owning model
    pub model: ModelId,
    /// Tree id
    pub tree_id: TreeId,
    /// Tree contents, view state included
    pub tree: AttackTree,
}

impl AttackTreeDocument {
    /// Wrap a tree
    #[inline]
    pub fn new(model: impl Into<ModelId>, tree_id: impl Into<TreeId>, tree: AttackTree) -> Self {
        Self {
            model: model.into(),
            tree_id: tree_id.into(),
            tree,
        }
    }
}

impl Document for AttackTreeDocument {
    fn reference(&self) -> DocumentRef {
        DocumentRef::AttackTree {
            model: self.model.clone(),
            tree: self.tree_id.clone(),
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.tree.validate()
    }

    fn payload(&self) -> SyncResult<serde_json::Value> {
        Ok(serde_json::to_value(self.tree.to_persisted())?)
    }
}

/// Result of a save request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written; the document is at this version
    Saved(VersionStamp),
    /// Another save was in flight; nothing was done
    Suppressed,
}

/// How to settle a version conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Write the local payload over the server version
    Overwrite,
    /// Discard local edits and take the server document
    ReloadServer,
    /// Keep both: write the local payload to a new copy
    ///
    /// The coordinator stays based on the version it had, so saving the
    /// original again conflicts until the caller reloads it.
    SaveAsClone,
}

/// Result of a conflict resolution
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Local payload written over the server version
    Overwritten(VersionStamp),
    /// Server document to adopt
    Reloaded(StoredDocument),
    /// Local payload written to a copy
    Cloned(DocumentRef),
    /// Another save was in flight
    Suppressed,
}

/// An unresolved version conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConflict {
    /// Document in conflict
    pub document: DocumentRef,
    /// Version the local edit was based on
    pub local: VersionStamp,
    /// Version found on the server
    pub server: VersionStamp,
}

#[derive(Debug)]
struct SaveState {
    version: VersionStamp,
    dirty: bool,
    /// Bumped by every local edit
    edits: u64,
    banner_until: Option<Instant>,
    pending: Option<PendingConflict>,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_start(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Save pipeline for one document
pub struct SaveCoordinator {
    store: Arc<dyn DocumentStore>,
    banner_duration: Duration,
    state: Mutex<SaveState>,
    in_flight: AtomicBool,
}

impl std::fmt::Debug for SaveCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveCoordinator")
            .field("state", &*self.state.lock())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SaveCoordinator {
    /// Coordinator for a document loaded at `version`
    pub fn new(store: Arc<dyn DocumentStore>, version: VersionStamp, config: &SyncConfig) -> Self {
        Self {
            store,
            banner_duration: config.success_banner(),
            state: Mutex::new(SaveState {
                version,
                dirty: false,
                edits: 0,
                banner_until: None,
                pending: None,
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Version the local copy is based on
    #[must_use]
    pub fn version(&self) -> VersionStamp {
        self.state.lock().version.clone()
    }

    /// Record a local edit
    pub fn mark_dirty(&self) {
        let mut state = self.state.lock();
        state.dirty = true;
        state.edits += 1;
    }

    /// Whether there are unsaved edits
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Whether the success indicator is showing
    #[must_use]
    pub fn success_visible(&self) -> bool {
        self.state
            .lock()
            .banner_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Whether a save is running
    #[inline]
    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Conflict awaiting a [`ConflictChoice`]
    #[must_use]
    pub fn pending_conflict(&self) -> Option<PendingConflict> {
        self.state.lock().pending.clone()
    }

    /// Save based on the coordinator's current version
    ///
    /// # Errors
    /// See [`SaveCoordinator::save`].
    pub async fn save_current(&self, document: &(impl Document + Sync)) -> SyncResult<SaveOutcome> {
        let version = self.version();
        self.save(document, &version).await
    }

    /// Save `document`, asserting the server is still at `last_known`
    ///
    /// # Errors
    /// - [`SyncError::Validation`] before any network call
    /// - [`SyncError::Conflict`] if the server version differs
    /// - [`SyncError::Network`] on backend failures; the dirty flag is kept
    pub async fn save(
        &self,
        document: &(impl Document + Sync),
        last_known: &VersionStamp,
    ) -> SyncResult<SaveOutcome> {
        let Some(_guard) = InFlight::try_start(&self.in_flight) else {
            tracing::debug!("save already in flight, suppressed");
            return Ok(SaveOutcome::Suppressed);
        };
        let reference = document.reference();
        let edits = self.state.lock().edits;

        document.validate()?;
        let payload = document.payload()?;

        let server = self.store.current_version(&reference).await?;
        if server != *last_known {
            return Err(self.conflict(reference, last_known.clone(), server));
        }

        match self.store.put(&reference, payload, last_known).await? {
            PutOutcome::Saved(version) => {
                self.saved(version.clone(), edits);
                tracing::info!(document = %reference, %version, "saved");
                Ok(SaveOutcome::Saved(version))
            }
            PutOutcome::Conflict { server_version } => {
                Err(self.conflict(reference, last_known.clone(), server_version))
            }
        }
    }

    /// Settle the pending conflict
    ///
    /// # Errors
    /// - [`SyncError::NoPendingConflict`] if there is nothing to resolve
    /// - [`SyncError::Validation`] if an overwrite or clone payload is invalid
    /// - [`SyncError::Conflict`] if the server moved again during an overwrite
    /// - [`SyncError::Network`] on backend failures
    pub async fn resolve_conflict(
        &self,
        document: &(impl Document + Sync),
        choice: ConflictChoice,
    ) -> SyncResult<Resolution> {
        let Some(_guard) = InFlight::try_start(&self.in_flight) else {
            return Ok(Resolution::Suppressed);
        };
        let pending = self
            .state
            .lock()
            .pending
            .clone()
            .ok_or(SyncError::NoPendingConflict)?;
        tracing::info!(document = %pending.document, ?choice, "resolving conflict");
        let edits = self.state.lock().edits;

        match choice {
            ConflictChoice::Overwrite => {
                document.validate()?;
                let payload = document.payload()?;
                match self.store.put(&pending.document, payload, &pending.server).await? {
                    PutOutcome::Saved(version) => {
                        self.saved(version.clone(), edits);
                        Ok(Resolution::Overwritten(version))
                    }
                    PutOutcome::Conflict { server_version } => Err(self.conflict(
                        pending.document,
                        pending.local,
                        server_version,
                    )),
                }
            }
            ConflictChoice::ReloadServer => {
                let stored = self.store.fetch(&pending.document).await?;
                let mut state = self.state.lock();
                state.version = stored.version.clone();
                state.dirty = false;
                state.pending = None;
                Ok(Resolution::Reloaded(stored))
            }
            ConflictChoice::SaveAsClone => {
                document.validate()?;
                let payload = document.payload()?;
                let copy = self.store.create_copy(&pending.document, payload).await?;
                let mut state = self.state.lock();
                if state.edits == edits {
                    state.dirty = false;
                }
                state.pending = None;
                tracing::info!(copy = %copy, "saved as copy");
                Ok(Resolution::Cloned(copy))
            }
        }
    }

    /// Record a write whose payload was taken when `edits` edits had been made
    fn saved(&self, version: VersionStamp, edits: u64) {
        let mut state = self.state.lock();
        state.version = version;
        if state.edits == edits {
            state.dirty = false;
        } else {
            tracing::debug!("edited during save, still dirty");
        }
        state.pending = None;
        state.banner_until = Some(Instant::now() + self.banner_duration);
    }

    fn conflict(
        &self,
        document: DocumentRef,
        local: VersionStamp,
        server: VersionStamp,
    ) -> SyncError {
        tracing::warn!(%document, %local, %server, "version conflict");
        self.state.lock().pending = Some(PendingConflict {
            document,
            local: local.clone(),
            server: server.clone(),
        });
        SyncError::Conflict { local, server }
    }
}
