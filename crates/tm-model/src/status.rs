//! Processing status reported by the threat-modeling backend

use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend processing state
///
/// Ordered `Start → Processing → Finalize → Complete`; `Failed` is terminal and
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    /// Job accepted, not yet running
    Start,
    /// Model generation in progress
    Processing,
    /// Results being written
    Finalize,
    /// Done
    Complete,
    /// Aborted with an error
    Failed,
}

impl ProcessingStatus {
    /// Whether polling should stop
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Position along the forward path. `Failed` has no rank.
    #[must_use]
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Start => Some(0),
            Self::Processing => Some(1),
            Self::Finalize => Some(2),
            Self::Complete => Some(3),
            Self::Failed => None,
        }
    }

    /// True when moving `from → to` goes backwards along the forward path
    ///
    /// A regression means a new run was started (for example a replay).
    #[must_use]
    pub fn is_regression(from: Self, to: Self) -> bool {
        match (from.rank(), to.rank()) {
            (Some(a), Some(b)) => b < a,
            // Leaving Failed for any ranked state is a restart.
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Start => "START",
            Self::Processing => "PROCESSING",
            Self::Finalize => "FINALIZE",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// Body of the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Current state
    pub status: ProcessingStatus,
    /// Progress or failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Backend run identifier; changes when a new run starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Reflection iteration counter
    #[serde(default)]
    pub iteration: u32,
}

impl StatusReport {
    /// Report with only a status
    #[inline]
    #[must_use]
    pub fn new(status: ProcessingStatus) -> Self {
        Self {
            status,
            detail: None,
            session_id: None,
            iteration: 0,
        }
    }

    /// With detail message
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// With backend session id
    #[inline]
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ProcessingStatus::Complete.is_terminal());
        assert!(ProcessingStatus::Failed.is_terminal());
        assert!(!ProcessingStatus::Finalize.is_terminal());
    }

    #[test]
    fn regression_detection() {
        use ProcessingStatus::*;
        assert!(ProcessingStatus::is_regression(Complete, Start));
        assert!(ProcessingStatus::is_regression(Failed, Processing));
        assert!(!ProcessingStatus::is_regression(Start, Processing));
        assert!(!ProcessingStatus::is_regression(Processing, Failed));
        assert!(!ProcessingStatus::is_regression(Processing, Processing));
    }

    #[test]
    fn report_wire_format() {
        let report: StatusReport = serde_json::from_str(
            r#"{"status":"PROCESSING","detail":"Reflection","sessionId":"s1","iteration":2}"#,
        )
        .unwrap();

        assert_eq!(report.status, ProcessingStatus::Processing);
        assert_eq!(report.session_id.as_deref(), Some("s1"));
        assert_eq!(report.iteration, 2);
    }

    #[test]
    fn report_minimal_body() {
        let report: StatusReport = serde_json::from_str(r#"{"status":"COMPLETE"}"#).unwrap();
        assert_eq!(report, StatusReport::new(ProcessingStatus::Complete));
    }
}
