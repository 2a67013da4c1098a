//! Out-of-band update events pushed by a collaborating agent

use crate::ids::CorrelationId;
use crate::threat::Threat;
use serde::{Deserialize, Serialize};

/// Catalog operation carried by an interrupt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InterruptOp {
    /// Append new threats
    AddThreats(Vec<Threat>),
    /// Replace existing threats (matched by name)
    EditThreats(Vec<Threat>),
    /// Remove threats (matched by name)
    DeleteThreats(Vec<Threat>),
}

impl InterruptOp {
    /// Wire tag of the operation
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddThreats(_) => "add_threats",
            Self::EditThreats(_) => "edit_threats",
            Self::DeleteThreats(_) => "delete_threats",
        }
    }

    /// Threats in the payload
    #[must_use]
    pub fn threats(&self) -> &[Threat] {
        match self {
            Self::AddThreats(t) | Self::EditThreats(t) | Self::DeleteThreats(t) => t,
        }
    }
}

/// An interrupt event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptEvent {
    /// Correlation id, echoed in the acknowledgment
    pub correlation_id: CorrelationId,
    /// Operation to apply
    pub operation: InterruptOp,
}

impl InterruptEvent {
    /// Create event
    #[inline]
    #[must_use]
    pub fn new(correlation_id: impl Into<CorrelationId>, operation: InterruptOp) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            operation,
        }
    }
}
