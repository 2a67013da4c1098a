//! Testing utilities for the threat-sync workspace
//!
//! - [`InMemoryBackend`]: every remote seam backed by in-process maps, with
//!   scripted statuses, failure injection and call counters
//! - Fixtures for models, threats and attack trees

#![allow(missing_docs)]

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tm_model::{
    AttackEdge, AttackNode, AttackNodeKind, AttackTree, HolderId, ModelId, ProcessingStatus,
    StatusReport, Threat, ThreatModel, TreeId, VersionStamp,
};
use tm_sync::{
    AccessLevel, AckSink, ApiError, Collaborator, CollaboratorService, DocumentRef, DocumentStore,
    ImageSource, InterruptAck, LockGrant, LockHolder, LockResponse, LockService, PutOutcome,
    RenewOutcome, StatusSource, StoredDocument,
};

/// Backend operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Status,
    Acquire,
    Renew,
    Release,
    Version,
    Fetch,
    Put,
    Copy,
    Ack,
    Collaborators,
    Image,
}

/// In-process implementation of every remote seam
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    statuses: Mutex<HashMap<ModelId, VecDeque<StatusReport>>>,
    locks: DashMap<ModelId, LockGrant>,
    documents: DashMap<DocumentRef, StoredDocument>,
    acks: Mutex<Vec<(ModelId, InterruptAck)>>,
    collaborators: DashMap<ModelId, Vec<Collaborator>>,
    images: DashMap<ModelId, Vec<u8>>,
    failures: Mutex<HashMap<Op, VecDeque<ApiError>>>,
    calls: DashMap<Op, usize>,
    next_version: AtomicU64,
    next_copy: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, op: Op) -> Result<(), ApiError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.lock().get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn bump_version(&self) -> VersionStamp {
        let n = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        VersionStamp::new(format!("srv-{n}"))
    }

    /// Fail the next `times` calls of `op` with `err`
    pub fn inject(&self, op: Op, times: usize, err: ApiError) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(op).or_default();
        queue.extend(std::iter::repeat(err).take(times));
    }

    /// Calls made to `op`, failed ones included
    pub fn calls(&self, op: Op) -> usize {
        self.calls.get(&op).map_or(0, |c| *c)
    }

    /// Total calls across all operations
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|e| *e.value()).sum()
    }

    /// Store a model's catalog at its version
    pub fn seed_model(&self, model: &ThreatModel) {
        let body = serde_json::to_value(model.catalog_payload()).unwrap_or_default();
        self.documents.insert(
            DocumentRef::Catalog(model.id.clone()),
            StoredDocument {
                version: model.version.clone(),
                body,
            },
        );
    }

    /// Store an attack tree at `version`
    pub fn seed_tree(&self, model: &ModelId, tree_id: &TreeId, tree: &AttackTree, version: &str) {
        let body = serde_json::to_value(tree.to_persisted()).unwrap_or_default();
        self.documents.insert(
            DocumentRef::AttackTree {
                model: model.clone(),
                tree: tree_id.clone(),
            },
            StoredDocument {
                version: VersionStamp::new(version),
                body,
            },
        );
    }

    /// Simulate another writer moving a document to a new version
    pub fn touch(&self, doc: &DocumentRef) -> Option<VersionStamp> {
        let next = self.bump_version();
        let mut stored = self.documents.get_mut(doc)?;
        stored.version = next.clone();
        Some(next)
    }

    /// Stored document, if any
    pub fn document(&self, doc: &DocumentRef) -> Option<StoredDocument> {
        self.documents.get(doc).map(|d| d.clone())
    }

    /// Script status reports; the last one repeats
    pub fn script_status(&self, model: &ModelId, statuses: &[ProcessingStatus]) {
        let reports = statuses.iter().copied().map(StatusReport::new).collect();
        self.statuses.lock().insert(model.clone(), reports);
    }

    /// Give the lock to another session
    pub fn steal_lock(&self, model: &ModelId, holder: &str) {
        self.locks.insert(
            model.clone(),
            LockGrant {
                holder: HolderId::new(holder),
                acquired_at: Utc::now(),
                expires_at: None,
            },
        );
    }

    /// Current lock holder
    pub fn lock_holder(&self, model: &ModelId) -> Option<HolderId> {
        self.locks.get(model).map(|g| g.holder.clone())
    }

    /// Acknowledgments received, in order
    pub fn acks(&self) -> Vec<InterruptAck> {
        self.acks.lock().iter().map(|(_, a)| a.clone()).collect()
    }

    /// Register collaborators for a model
    pub fn seed_collaborators(&self, model: &ModelId, collaborators: Vec<Collaborator>) {
        self.collaborators.insert(model.clone(), collaborators);
    }

    /// Register a diagram blob
    pub fn seed_image(&self, model: &ModelId, blob: Vec<u8>) {
        self.images.insert(model.clone(), blob);
    }

    /// Ids of every model with a stored catalog
    pub fn models(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = self
            .documents
            .iter()
            .filter_map(|e| match e.key() {
                DocumentRef::Catalog(id) => Some(id.clone()),
                DocumentRef::AttackTree { .. } => None,
            })
            .collect();
        ids.sort();
        ids
    }
}

fn not_found(what: impl std::fmt::Display) -> ApiError {
    ApiError::status(404, format!("{what} not found"))
}

#[async_trait::async_trait]
impl StatusSource for InMemoryBackend {
    async fn fetch_status(&self, model: &ModelId) -> Result<StatusReport, ApiError> {
        self.enter(Op::Status)?;
        let mut statuses = self.statuses.lock();
        let script = statuses.get_mut(model).ok_or_else(|| not_found(model))?;
        let report = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        report.ok_or_else(|| not_found(model))
    }
}

#[async_trait::async_trait]
impl LockService for InMemoryBackend {
    async fn acquire(&self, model: &ModelId, holder: &HolderId) -> Result<LockResponse, ApiError> {
        self.enter(Op::Acquire)?;
        let entry = self.locks.entry(model.clone()).or_insert_with(|| LockGrant {
            holder: holder.clone(),
            acquired_at: Utc::now(),
            expires_at: None,
        });
        if entry.holder == *holder {
            Ok(LockResponse::Granted(entry.clone()))
        } else {
            Ok(LockResponse::Held(LockHolder {
                holder: entry.holder.clone(),
                acquired_at: entry.acquired_at,
            }))
        }
    }

    async fn renew(&self, model: &ModelId, holder: &HolderId) -> Result<RenewOutcome, ApiError> {
        self.enter(Op::Renew)?;
        let grant = self.locks.get(model).ok_or_else(|| not_found("lock"))?;
        if grant.holder == *holder {
            Ok(RenewOutcome::Renewed(grant.clone()))
        } else {
            Ok(RenewOutcome::Stolen(LockHolder {
                holder: grant.holder.clone(),
                acquired_at: grant.acquired_at,
            }))
        }
    }

    async fn release(&self, model: &ModelId, holder: &HolderId) -> Result<(), ApiError> {
        self.enter(Op::Release)?;
        self.locks.remove_if(model, |_, grant| grant.holder == *holder);
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryBackend {
    async fn current_version(&self, doc: &DocumentRef) -> Result<VersionStamp, ApiError> {
        self.enter(Op::Version)?;
        self.documents
            .get(doc)
            .map(|d| d.version.clone())
            .ok_or_else(|| not_found(doc))
    }

    async fn fetch(&self, doc: &DocumentRef) -> Result<StoredDocument, ApiError> {
        self.enter(Op::Fetch)?;
        self.document(doc).ok_or_else(|| not_found(doc))
    }

    async fn put(
        &self,
        doc: &DocumentRef,
        body: serde_json::Value,
        base_version: &VersionStamp,
    ) -> Result<PutOutcome, ApiError> {
        self.enter(Op::Put)?;
        let mut stored = self.documents.get_mut(doc).ok_or_else(|| not_found(doc))?;
        if stored.version != *base_version {
            return Ok(PutOutcome::Conflict {
                server_version: stored.version.clone(),
            });
        }
        let version = self.bump_version();
        stored.version = version.clone();
        stored.body = body;
        Ok(PutOutcome::Saved(version))
    }

    async fn create_copy(
        &self,
        doc: &DocumentRef,
        body: serde_json::Value,
    ) -> Result<DocumentRef, ApiError> {
        self.enter(Op::Copy)?;
        let n = self.next_copy.fetch_add(1, Ordering::SeqCst) + 1;
        let copy = doc.with_model(ModelId::new(format!("{}-copy-{n}", doc.model())));
        let version = self.bump_version();
        self.documents
            .insert(copy.clone(), StoredDocument { version, body });
        Ok(copy)
    }
}

#[async_trait::async_trait]
impl AckSink for InMemoryBackend {
    async fn acknowledge(&self, model: &ModelId, ack: InterruptAck) -> Result<(), ApiError> {
        self.enter(Op::Ack)?;
        self.acks.lock().push((model.clone(), ack));
        Ok(())
    }
}

#[async_trait::async_trait]
impl CollaboratorService for InMemoryBackend {
    async fn list(&self, model: &ModelId) -> Result<Vec<Collaborator>, ApiError> {
        self.enter(Op::Collaborators)?;
        Ok(self
            .collaborators
            .get(model)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn add(&self, model: &ModelId, user: &str, level: AccessLevel) -> Result<(), ApiError> {
        self.enter(Op::Collaborators)?;
        self.collaborators
            .entry(model.clone())
            .or_default()
            .push(Collaborator::new(user, level));
        Ok(())
    }

    async fn remove(&self, model: &ModelId, user: &str) -> Result<(), ApiError> {
        self.enter(Op::Collaborators)?;
        if let Some(mut list) = self.collaborators.get_mut(model) {
            list.retain(|c| c.user_id != user);
        }
        Ok(())
    }

    async fn update_access(
        &self,
        model: &ModelId,
        user: &str,
        level: AccessLevel,
    ) -> Result<(), ApiError> {
        self.enter(Op::Collaborators)?;
        let mut list = self.collaborators.get_mut(model).ok_or_else(|| not_found(model))?;
        let entry = list
            .iter_mut()
            .find(|c| c.user_id == user)
            .ok_or_else(|| not_found(user))?;
        entry.access_level = level;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ImageSource for InMemoryBackend {
    async fn presigned_url(&self, model: &ModelId) -> Result<String, ApiError> {
        self.enter(Op::Image)?;
        if !self.images.contains_key(model) {
            return Err(not_found(model));
        }
        Ok(format!("mem://{model}"))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.enter(Op::Image)?;
        let model = url
            .strip_prefix("mem://")
            .ok_or_else(|| ApiError::Transport(format!("unsupported url {url}")))?;
        self.images
            .get(&ModelId::new(model))
            .map(|blob| blob.clone())
            .ok_or_else(|| not_found(url))
    }
}

/// Threat with category, likelihood and target
pub fn threat(name: &str, category: &str, likelihood: &str, target: &str) -> Threat {
    Threat::new(name)
        .with_category(category)
        .with_likelihood(likelihood)
        .with_target(target)
}

/// Small catalog covering several categories and targets
pub fn sample_model(id: &str, version: &str) -> ThreatModel {
    ThreatModel::new(id, version)
        .with_title("Payments API")
        .with_threats(vec![
            threat("Token replay", "Spoofing", "High", "API Gateway"),
            threat("Ledger tampering", "Tampering", "Medium", "Ledger DB"),
            threat("Log wiping", "Repudiation", "Low", "Audit Log"),
            threat("Card data leak", "Information Disclosure", "High", "Ledger DB"),
        ])
}

/// Root with an OR gate over two attacks and one countermeasure
pub fn sample_tree() -> AttackTree {
    AttackTree::new()
        .with_node(AttackNode::new("root", AttackNodeKind::RootGoal, "Steal card data").at(0.0, 0.0))
        .with_node(AttackNode::new("or", AttackNodeKind::OrGate, "Any path").at(0.0, 100.0))
        .with_node(AttackNode::new("sqli", AttackNodeKind::AttackVector, "SQL injection"))
        .with_node(AttackNode::new("phish", AttackNodeKind::AttackVector, "Phish an admin"))
        .with_node(AttackNode::new("mfa", AttackNodeKind::Countermeasure, "Enforce MFA"))
        .with_edge(AttackEdge::new("e1", "root", "or"))
        .with_edge(AttackEdge::new("e2", "or", "sqli"))
        .with_edge(AttackEdge::new("e3", "or", "phish"))
        .with_edge(AttackEdge::new("e4", "phish", "mfa"))
}
