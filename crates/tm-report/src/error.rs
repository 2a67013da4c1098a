//! Error types for reporting
//!
//! - Chart rendering failures (contained by the supervisor)
//! - Layout store I/O and decoding
//! - Export failures

use crate::render::ChartId;
use std::path::PathBuf;

/// A chart could not be rendered from the summary it was given
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Buckets do not add up to the number of threats
    #[error("{chart}: {actual} threats bucketed, expected {expected}")]
    InconsistentTotals {
        /// Chart being rendered
        chart: ChartId,
        /// Threat count in the summary
        expected: usize,
        /// Sum of the buckets
        actual: usize,
    },

    /// A stacked series does not cover the whole domain
    #[error("{chart}: series {series} has {actual} points, expected {expected}")]
    RaggedSeries {
        /// Chart being rendered
        chart: ChartId,
        /// Series name
        series: String,
        /// Domain size
        expected: usize,
        /// Points present
        actual: usize,
    },

    /// A ranking is longer than allowed or out of order
    #[error("{chart}: ranking invalid ({reason})")]
    InvalidRanking {
        /// Chart being rendered
        chart: ChartId,
        /// What is wrong
        reason: String,
    },
}

impl RenderError {
    /// Chart the error belongs to
    #[must_use]
    pub fn chart(&self) -> ChartId {
        match self {
            Self::InconsistentTotals { chart, .. }
            | Self::RaggedSeries { chart, .. }
            | Self::InvalidRanking { chart, .. } => *chart,
        }
    }
}

/// Errors from a key-value store backing persisted client state
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("io error on {path}: {source}")]
    Io {
        /// Store file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Store contents are not valid JSON
    #[error("corrupt store {path}: {source}")]
    Corrupt {
        /// Store file
        path: PathBuf,
        /// Decode error
        #[source]
        source: serde_json::Error,
    },

    /// Value could not be encoded
    #[error("cannot encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Export failures
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Format name not recognised
    #[error("unsupported export format: '{0}'")]
    UnsupportedFormat(String),

    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_display() {
        let err = RenderError::InconsistentTotals {
            chart: ChartId::Category,
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "category: 2 threats bucketed, expected 3");
        assert_eq!(err.chart(), ChartId::Category);
    }

    #[test]
    fn ranking_error_display() {
        let err = RenderError::InvalidRanking {
            chart: ChartId::TopTargets,
            reason: "11 entries".to_string(),
        };
        assert!(err.to_string().contains("11 entries"));
    }
}
