//! Model sharing

use crate::api::{AccessLevel, Collaborator, CollaboratorService};
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use tm_model::ModelId;

/// Whether a session must be read-only
///
/// Edits need both edit access and the held lock.
#[inline]
#[must_use]
pub fn effective_read_only(access: AccessLevel, lock_held: bool) -> bool {
    !access.can_edit() || !lock_held
}

/// Collaborator management for one model
#[derive(Clone)]
pub struct Sharing {
    service: Arc<dyn CollaboratorService>,
    model: ModelId,
}

impl std::fmt::Debug for Sharing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sharing")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Sharing {
    /// Sharing for `model`
    pub fn new(service: Arc<dyn CollaboratorService>, model: ModelId) -> Self {
        Self { service, model }
    }

    /// Everyone with access, owner first
    ///
    /// # Errors
    /// [`SyncError::Network`] on backend failures.
    pub async fn list(&self) -> SyncResult<Vec<Collaborator>> {
        let mut collaborators = self.service.list(&self.model).await?;
        collaborators.sort_by_key(|c| !c.is_owner);
        Ok(collaborators)
    }

    /// Access level of `user`, if any
    ///
    /// # Errors
    /// [`SyncError::Network`] on backend failures.
    pub async fn access_for(&self, user: &str) -> SyncResult<Option<AccessLevel>> {
        Ok(self
            .service
            .list(&self.model)
            .await?
            .into_iter()
            .find(|c| c.user_id == user)
            .map(|c| if c.is_owner { AccessLevel::Edit } else { c.access_level }))
    }

    /// Share with a new user
    ///
    /// # Errors
    /// [`SyncError::Sharing`] if `user` is the owner or already a collaborator.
    pub async fn add(&self, user: &str, level: AccessLevel) -> SyncResult<()> {
        let user = user.trim();
        if user.is_empty() {
            return Err(SyncError::Sharing("user id must not be empty".to_string()));
        }
        let current = self.service.list(&self.model).await?;
        if let Some(existing) = current.iter().find(|c| c.user_id == user) {
            let reason = if existing.is_owner {
                format!("{user} owns {}", self.model)
            } else {
                format!("{user} already has {} access", existing.access_level)
            };
            return Err(SyncError::Sharing(reason));
        }
        self.service.add(&self.model, user, level).await?;
        tracing::info!(model = %self.model, user, %level, "collaborator added");
        Ok(())
    }

    /// Revoke a user's access
    ///
    /// # Errors
    /// [`SyncError::Sharing`] if `user` is the owner or not a collaborator.
    pub async fn remove(&self, user: &str) -> SyncResult<()> {
        self.existing_collaborator(user).await?;
        self.service.remove(&self.model, user).await?;
        tracing::info!(model = %self.model, user, "collaborator removed");
        Ok(())
    }

    /// Change a user's access level
    ///
    /// # Errors
    /// [`SyncError::Sharing`] if `user` is the owner or not a collaborator.
    pub async fn update_access(&self, user: &str, level: AccessLevel) -> SyncResult<()> {
        let existing = self.existing_collaborator(user).await?;
        if existing.access_level == level {
            return Ok(());
        }
        self.service.update_access(&self.model, user, level).await?;
        tracing::info!(model = %self.model, user, %level, "collaborator access changed");
        Ok(())
    }

    async fn existing_collaborator(&self, user: &str) -> SyncResult<Collaborator> {
        let collaborator = self
            .service
            .list(&self.model)
            .await?
            .into_iter()
            .find(|c| c.user_id == user)
            .ok_or_else(|| SyncError::Sharing(format!("{user} is not a collaborator")))?;
        if collaborator.is_owner {
            return Err(SyncError::Sharing(format!("cannot change owner {user}")));
        }
        Ok(collaborator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    struct Roster {
        entries: Mutex<Vec<Collaborator>>,
    }

    impl Roster {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(vec![
                    Collaborator::new("bob", AccessLevel::ReadOnly),
                    Collaborator::new("owner", AccessLevel::Edit).as_owner(),
                ]),
            })
        }
    }

    #[async_trait::async_trait]
    impl CollaboratorService for Roster {
        async fn list(&self, _model: &ModelId) -> Result<Vec<Collaborator>, ApiError> {
            Ok(self.entries.lock().clone())
        }

        async fn add(&self, _model: &ModelId, user: &str, level: AccessLevel) -> Result<(), ApiError> {
            self.entries.lock().push(Collaborator::new(user, level));
            Ok(())
        }

        async fn remove(&self, _model: &ModelId, user: &str) -> Result<(), ApiError> {
            self.entries.lock().retain(|c| c.user_id != user);
            Ok(())
        }

        async fn update_access(
            &self,
            _model: &ModelId,
            user: &str,
            level: AccessLevel,
        ) -> Result<(), ApiError> {
            for c in self.entries.lock().iter_mut().filter(|c| c.user_id == user) {
                c.access_level = level;
            }
            Ok(())
        }
    }

    fn sharing() -> Sharing {
        Sharing::new(Roster::new(), ModelId::new("tm-1"))
    }

    #[tokio::test]
    async fn list_puts_owner_first() {
        let users: Vec<String> = sharing()
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.user_id)
            .collect();
        assert_eq!(users, vec!["owner".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn add_rejects_owner_and_duplicates() {
        let sharing = sharing();
        assert!(matches!(
            sharing.add("owner", AccessLevel::ReadOnly).await,
            Err(SyncError::Sharing(_))
        ));
        assert!(matches!(
            sharing.add("bob", AccessLevel::Edit).await,
            Err(SyncError::Sharing(_))
        ));

        sharing.add("carol", AccessLevel::Edit).await.unwrap();
        assert_eq!(sharing.access_for("carol").await.unwrap(), Some(AccessLevel::Edit));
    }

    #[tokio::test]
    async fn update_and_remove() {
        let sharing = sharing();
        sharing.update_access("bob", AccessLevel::Edit).await.unwrap();
        assert_eq!(sharing.access_for("bob").await.unwrap(), Some(AccessLevel::Edit));

        assert!(sharing.remove("owner").await.is_err());
        sharing.remove("bob").await.unwrap();
        assert_eq!(sharing.access_for("bob").await.unwrap(), None);
        assert!(sharing.remove("bob").await.is_err());
    }

    #[test]
    fn read_only_derivation() {
        assert!(effective_read_only(AccessLevel::ReadOnly, true));
        assert!(effective_read_only(AccessLevel::Edit, false));
        assert!(!effective_read_only(AccessLevel::Edit, true));
    }
}
