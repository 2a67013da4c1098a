//! Threat model record and catalog operations
//!
//! Catalog edits are keyed by threat name and applied atomically: a batch
//! that fails validation leaves the catalog untouched.

use crate::error::ModelError;
use crate::ids::{ModelId, VersionStamp};
use crate::interrupt::InterruptOp;
use crate::status::ProcessingStatus;
use crate::threat::Threat;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A threat model as loaded by a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatModel {
    /// Model id
    pub id: ModelId,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Summary of the modeled system
    #[serde(default)]
    pub description: String,
    /// Modeling assumptions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assumptions: Vec<String>,
    /// Threat catalog
    #[serde(default)]
    pub threats: Vec<Threat>,
    /// Object key of the architecture diagram
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture_diagram: Option<String>,
    /// Last known processing status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessingStatus>,
    /// Server version stamp used for conflict detection
    pub version: VersionStamp,
}

/// Semantic catalog body sent on save
#[derive(Debug, Clone, Serialize)]
pub struct CatalogPayload<'a> {
    /// Title
    pub title: &'a str,
    /// Description
    pub description: &'a str,
    /// Assumptions
    pub assumptions: &'a [String],
    /// Threats
    pub threats: &'a [Threat],
}

impl ThreatModel {
    /// Create an empty model
    #[must_use]
    pub fn new(id: impl Into<ModelId>, version: impl Into<VersionStamp>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            assumptions: Vec::new(),
            threats: Vec::new(),
            architecture_diagram: None,
            status: None,
            version: version.into(),
        }
    }

    /// With title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// With threats
    #[inline]
    #[must_use]
    pub fn with_threats(mut self, threats: Vec<Threat>) -> Self {
        self.threats = threats;
        self
    }

    /// Find threat by name
    #[must_use]
    pub fn threat(&self, name: &str) -> Option<&Threat> {
        self.threats.iter().find(|t| t.name == name)
    }

    /// Catalog body for persistence
    #[must_use]
    pub fn catalog_payload(&self) -> CatalogPayload<'_> {
        CatalogPayload {
            title: &self.title,
            description: &self.description,
            assumptions: &self.assumptions,
            threats: &self.threats,
        }
    }

    /// Append threats
    ///
    /// # Errors
    /// [`ModelError::BlankThreatName`] or [`ModelError::DuplicateThreat`]
    /// (against the catalog or within the batch). Nothing is added on error.
    pub fn add_threats(&mut self, threats: Vec<Threat>) -> Result<usize, ModelError> {
        let mut seen: HashSet<&str> = self.threats.iter().map(|t| t.name.as_str()).collect();
        for threat in &threats {
            check_name(&threat.name)?;
            if !seen.insert(threat.name.as_str()) {
                return Err(ModelError::DuplicateThreat(threat.name.clone()));
            }
        }

        let count = threats.len();
        self.threats.extend(threats);
        Ok(count)
    }

    /// Replace existing threats by name
    ///
    /// # Errors
    /// [`ModelError::UnknownThreat`] if any name is not in the catalog.
    pub fn edit_threats(&mut self, threats: Vec<Threat>) -> Result<usize, ModelError> {
        let positions = threats
            .iter()
            .map(|t| self.position(&t.name))
            .collect::<Result<Vec<_>, _>>()?;

        let count = threats.len();
        for (idx, threat) in positions.into_iter().zip(threats) {
            self.threats[idx] = threat;
        }
        Ok(count)
    }

    /// Remove threats by name
    ///
    /// # Errors
    /// [`ModelError::UnknownThreat`] if any name is not in the catalog.
    pub fn delete_threats(&mut self, threats: &[Threat]) -> Result<usize, ModelError> {
        for threat in threats {
            self.position(&threat.name)?;
        }

        let doomed: HashSet<&str> = threats.iter().map(|t| t.name.as_str()).collect();
        let before = self.threats.len();
        self.threats.retain(|t| !doomed.contains(t.name.as_str()));
        Ok(before - self.threats.len())
    }

    /// Apply an interrupt operation
    ///
    /// Returns the number of threats affected.
    ///
    /// # Errors
    /// Propagates the catalog operation's error.
    pub fn apply(&mut self, operation: &InterruptOp) -> Result<usize, ModelError> {
        match operation {
            InterruptOp::AddThreats(threats) => self.add_threats(threats.clone()),
            InterruptOp::EditThreats(threats) => self.edit_threats(threats.clone()),
            InterruptOp::DeleteThreats(threats) => self.delete_threats(threats),
        }
    }

    fn position(&self, name: &str) -> Result<usize, ModelError> {
        self.threats
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| ModelError::UnknownThreat(name.to_string()))
    }
}

fn check_name(name: &str) -> Result<(), ModelError> {
    if name.trim().is_empty() {
        Err(ModelError::BlankThreatName)
    } else {
        Ok(())
    }
}
