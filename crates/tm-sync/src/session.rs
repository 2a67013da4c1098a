//! Edit session
//!
//! [`EditSession`] wires one model's coordinators together:
//!
//! - the interrupt pump starts first so early events are buffered
//! - [`EditSession::open`] fetches the catalog, takes the lock (a conflict
//!   makes the session read-only), starts status polling and releases the
//!   buffered interrupts
//! - [`EditSession::close`] stops polling and releases the lock
//!
//! The session also owns the diagram cache for its model.

use crate::api::{
    AccessLevel, AckSink, DocumentRef, DocumentStore, ImageSource, LockService, StatusSource,
    StoredDocument,
};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::handle::ModelHandle;
use crate::images::ImageCache;
use crate::interrupts::InterruptPump;
use crate::lock::{LockCoordinator, LockGuard};
use crate::poller::{PollerHandle, StatusPoller, StatusTransition};
use crate::save::{ConflictChoice, Resolution, SaveCoordinator, SaveOutcome};
use crate::sharing::effective_read_only;
use serde::Deserialize;
use std::sync::Arc;
use tm_model::{HolderId, InterruptEvent, ModelId, ProcessingStatus, Threat, ThreatModel};

/// Remote seams used by a session
#[derive(Clone)]
pub struct Backends {
    /// Processing status
    pub status: Arc<dyn StatusSource>,
    /// Edit locks
    pub locks: Arc<dyn LockService>,
    /// Document persistence
    pub documents: Arc<dyn DocumentStore>,
    /// Interrupt acknowledgments
    pub acks: Arc<dyn AckSink>,
    /// Architecture diagrams
    pub images: Arc<dyn ImageSource>,
}

impl Backends {
    /// Use one implementation for every seam
    pub fn shared<B>(backend: Arc<B>) -> Self
    where
        B: StatusSource + LockService + DocumentStore + AckSink + ImageSource + 'static,
    {
        Self {
            status: backend.clone(),
            locks: backend.clone(),
            documents: backend.clone(),
            acks: backend.clone(),
            images: backend,
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Session parameters
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Local session id presented to the lock service
    pub holder: HolderId,
    /// Caller's access to the model
    pub access: AccessLevel,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            holder: HolderId::generate(),
            access: AccessLevel::Edit,
        }
    }
}

impl SessionOptions {
    /// Set holder id
    #[inline]
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<HolderId>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Set access level
    #[inline]
    #[must_use]
    pub fn with_access(mut self, access: AccessLevel) -> Self {
        self.access = access;
        self
    }
}

#[derive(Deserialize)]
struct CatalogBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    assumptions: Vec<String>,
    #[serde(default)]
    threats: Vec<Threat>,
    #[serde(default)]
    architecture_diagram: Option<String>,
    #[serde(default)]
    status: Option<ProcessingStatus>,
}

/// Build a model from a fetched catalog document
///
/// # Errors
/// [`SyncError::Serialization`] if the body is not a catalog.
pub fn model_from_stored(id: ModelId, stored: StoredDocument) -> SyncResult<ThreatModel> {
    let body: CatalogBody = serde_json::from_value(stored.body)?;
    let mut model = ThreatModel::new(id, stored.version)
        .with_title(body.title)
        .with_threats(body.threats);
    model.description = body.description;
    model.assumptions = body.assumptions;
    model.architecture_diagram = body.architecture_diagram;
    model.status = body.status;
    Ok(model)
}

/// One model opened for collaborative editing
pub struct EditSession {
    model: ModelId,
    config: SyncConfig,
    access: AccessLevel,
    backends: Backends,
    handle: ModelHandle,
    lock: LockCoordinator,
    guard: Option<LockGuard>,
    pump: Option<InterruptPump>,
    poller: Option<PollerHandle>,
    saver: Option<SaveCoordinator>,
    images: ImageCache,
}

impl std::fmt::Debug for EditSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("model", &self.model)
            .field("access", &self.access)
            .field("lock", &self.lock.state())
            .field("loaded", &self.handle.is_loaded())
            .finish_non_exhaustive()
    }
}

impl EditSession {
    /// Prepare a session; interrupts pushed from now on are buffered
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        backends: Backends,
        model: ModelId,
        options: SessionOptions,
        config: SyncConfig,
    ) -> Self {
        let handle = ModelHandle::new();
        let pump = InterruptPump::spawn(model.clone(), handle.clone(), backends.acks.clone());
        let lock = LockCoordinator::new(
            backends.locks.clone(),
            model.clone(),
            options.holder,
            &config,
        );
        let images = ImageCache::from_config(&config, backends.images.clone());
        Self {
            model,
            config,
            access: options.access,
            backends,
            handle,
            lock,
            guard: None,
            pump: Some(pump),
            poller: None,
            saver: None,
            images,
        }
    }

    /// Load the model, take the lock and start polling
    ///
    /// A lock conflict leaves the session open and read-only.
    ///
    /// # Errors
    /// [`SyncError::Network`] or [`SyncError::Serialization`] if the model
    /// cannot be loaded; other lock errors are propagated.
    pub async fn open<F>(&mut self, on_status: F) -> SyncResult<()>
    where
        F: FnMut(&StatusTransition) + Send + 'static,
    {
        let reference = DocumentRef::Catalog(self.model.clone());
        let stored = self.backends.documents.fetch(&reference).await?;
        let model = model_from_stored(self.model.clone(), stored)?;
        tracing::info!(
            model = %self.model,
            version = %model.version,
            threats = model.threats.len(),
            "model loaded"
        );
        self.saver = Some(SaveCoordinator::new(
            self.backends.documents.clone(),
            model.version.clone(),
            &self.config,
        ));
        self.handle.set(model);

        if self.access.can_edit() {
            match self.lock.acquire().await {
                Ok(guard) => self.guard = Some(guard),
                Err(e) if e.is_lock_conflict() => {
                    tracing::info!(model = %self.model, error = %e, "opened read-only");
                }
                Err(e) => return Err(e),
            }
        } else {
            tracing::info!(model = %self.model, "read-only access, lock not requested");
        }

        let handle = self.handle.clone();
        let mut on_status = on_status;
        self.poller = Some(StatusPoller::spawn(
            self.backends.status.clone(),
            self.model.clone(),
            self.config.poll_interval(),
            move |transition| {
                handle.update(|m| m.status = Some(transition.to));
                on_status(transition);
            },
        ));

        if let Some(pump) = &self.pump {
            pump.mark_ready();
        }
        Ok(())
    }

    /// Model id
    #[inline]
    #[must_use]
    pub fn model_id(&self) -> &ModelId {
        &self.model
    }

    /// Shared model handle
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    /// Lock coordinator
    #[inline]
    #[must_use]
    pub fn lock(&self) -> &LockCoordinator {
        &self.lock
    }

    /// Status poller, once opened
    #[inline]
    #[must_use]
    pub fn poller(&mut self) -> Option<&mut PollerHandle> {
        self.poller.as_mut()
    }

    /// Save pipeline, once opened
    #[inline]
    #[must_use]
    pub fn saver(&self) -> Option<&SaveCoordinator> {
        self.saver.as_ref()
    }

    /// Diagram cache
    #[inline]
    #[must_use]
    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    /// Architecture diagram of this model, cached after the first download
    ///
    /// # Errors
    /// [`SyncError::Network`] if the diagram cannot be fetched.
    pub async fn diagram(&self) -> SyncResult<Arc<Vec<u8>>> {
        Ok(self.images.get(&self.model).await?)
    }

    /// Whether edits are blocked
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        effective_read_only(self.access, !self.lock.is_read_only())
    }

    /// Hand an interrupt event to the session
    ///
    /// # Errors
    /// [`SyncError::Config`] after the session was closed.
    pub fn push_interrupt(&self, event: InterruptEvent) -> SyncResult<()> {
        match &self.pump {
            Some(pump) => pump.push(event),
            None => Err(SyncError::config("session closed")),
        }
    }

    /// Apply a local edit and mark the model dirty
    ///
    /// # Errors
    /// [`SyncError::ReadOnly`] or [`SyncError::NotLoaded`].
    pub fn edit<R>(&self, f: impl FnOnce(&mut ThreatModel) -> R) -> SyncResult<R> {
        if self.is_read_only() {
            return Err(SyncError::ReadOnly);
        }
        let saver = self.saver.as_ref().ok_or(SyncError::NotLoaded)?;
        let result = self.handle.update(f).ok_or(SyncError::NotLoaded)?;
        saver.mark_dirty();
        Ok(result)
    }

    /// Save the catalog
    ///
    /// # Errors
    /// [`SyncError::ReadOnly`], [`SyncError::NotLoaded`] or any save error.
    pub async fn save(&self) -> SyncResult<SaveOutcome> {
        if self.is_read_only() {
            return Err(SyncError::ReadOnly);
        }
        let saver = self.saver.as_ref().ok_or(SyncError::NotLoaded)?;
        let model = self.handle.snapshot().ok_or(SyncError::NotLoaded)?;
        let outcome = saver.save_current(&model).await?;
        if let SaveOutcome::Saved(version) = &outcome {
            self.handle.update(|m| m.version = version.clone());
        }
        Ok(outcome)
    }

    /// Settle a pending save conflict
    ///
    /// # Errors
    /// See [`SaveCoordinator::resolve_conflict`].
    pub async fn resolve_conflict(&self, choice: ConflictChoice) -> SyncResult<Resolution> {
        let saver = self.saver.as_ref().ok_or(SyncError::NotLoaded)?;
        let model = self.handle.snapshot().ok_or(SyncError::NotLoaded)?;
        let resolution = saver.resolve_conflict(&model, choice).await?;
        match &resolution {
            Resolution::Overwritten(version) => {
                self.handle.update(|m| m.version = version.clone());
            }
            Resolution::Reloaded(stored) => {
                let reloaded = model_from_stored(self.model.clone(), stored.clone())?;
                self.handle.set(reloaded);
            }
            Resolution::Cloned(_) | Resolution::Suppressed => {}
        }
        Ok(resolution)
    }

    /// Stop polling, drain interrupts and release the lock
    ///
    /// # Errors
    /// [`SyncError::Network`] if the lock release fails.
    pub async fn close(mut self) -> SyncResult<()> {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        if let Some(pump) = self.pump.take() {
            pump.shutdown().await;
        }
        let released = match self.guard.take() {
            Some(guard) => guard.release().await,
            None => Ok(()),
        };
        tracing::info!(model = %self.model, "session closed");
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tm_model::VersionStamp;

    #[test]
    fn catalog_body_to_model() {
        let stored = StoredDocument {
            version: VersionStamp::new("v4"),
            body: serde_json::json!({
                "title": "Billing",
                "threats": [{"name": "Replay", "likelihood": "High"}],
                "status": "COMPLETE"
            }),
        };
        let model = model_from_stored(ModelId::new("tm-9"), stored).unwrap();

        assert_eq!(model.id.as_str(), "tm-9");
        assert_eq!(model.version.as_str(), "v4");
        assert_eq!(model.title, "Billing");
        assert_eq!(model.threats.len(), 1);
        assert_eq!(model.status, Some(ProcessingStatus::Complete));
    }

    #[test]
    fn non_catalog_body_is_rejected() {
        let stored = StoredDocument {
            version: VersionStamp::new("v1"),
            body: serde_json::json!(["not", "a", "catalog"]),
        };
        assert!(matches!(
            model_from_stored(ModelId::new("tm-1"), stored),
            Err(SyncError::Serialization(_))
        ));
    }
}
