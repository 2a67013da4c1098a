//! Shared in-memory model

use parking_lot::RwLock;
use std::sync::Arc;
use tm_model::ThreatModel;

/// Cloneable handle to the session's model
///
/// Empty until the model has been fetched. All coordinators mutate the model
/// through [`ModelHandle::update`].
#[derive(Debug, Clone, Default)]
pub struct ModelHandle {
    inner: Arc<RwLock<Option<ThreatModel>>>,
}

impl ModelHandle {
    /// Handle with no model loaded
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle holding `model`
    #[inline]
    #[must_use]
    pub fn loaded(model: ThreatModel) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(model))),
        }
    }

    /// Whether a model is present
    #[inline]
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Replace the model
    pub fn set(&self, model: ThreatModel) {
        *self.inner.write() = Some(model);
    }

    /// Clone of the current model
    #[must_use]
    pub fn snapshot(&self) -> Option<ThreatModel> {
        self.inner.read().clone()
    }

    /// Read from the model
    pub fn read<R>(&self, f: impl FnOnce(&ThreatModel) -> R) -> Option<R> {
        self.inner.read().as_ref().map(f)
    }

    /// Mutate the model; `None` if nothing is loaded
    pub fn update<R>(&self, f: impl FnOnce(&mut ThreatModel) -> R) -> Option<R> {
        self.inner.write().as_mut().map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tm_model::Threat;

    #[test]
    fn update_requires_loaded_model() {
        let handle = ModelHandle::new();
        assert!(handle.update(|m| m.threats.len()).is_none());

        handle.set(ThreatModel::new("tm-1", "v1"));
        let clone = handle.clone();
        clone.update(|m| m.threats.push(Threat::new("x")));

        assert_eq!(handle.read(|m| m.threats.len()), Some(1));
    }
}
