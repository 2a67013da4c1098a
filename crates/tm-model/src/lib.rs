//! Threat model data types
//!
//! The shared vocabulary of the workspace:
//! - [`ThreatModel`] and its [`Threat`] catalog
//! - STRIDE ([`StrideCategory`]) and [`Likelihood`] classification
//! - [`ProcessingStatus`] of backend generation runs
//! - [`AttackTree`] graphs with view state separated from semantics
//! - [`InterruptEvent`]s pushed by a collaborating agent
//!
//! # Example
//!
//! ```rust
//! use tm_model::{Threat, ThreatModel, StrideCategory};
//!
//! let model = ThreatModel::new("tm-1", "v1")
//!     .with_threats(vec![Threat::new("Token replay").with_category("spoofing")]);
//!
//! assert_eq!(model.threats[0].stride(), Some(StrideCategory::Spoofing));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod attack_tree;
pub mod error;
pub mod ids;
pub mod interrupt;
pub mod model;
pub mod status;
pub mod threat;

pub use attack_tree::{
    AttackEdge, AttackNode, AttackNodeKind, AttackTree, Dimensions, EdgeView, NodeView,
    PersistedEdge, PersistedNode, PersistedTree, Position, WireEdge, WireNode, WireNodeData,
    WireTree,
};
pub use error::ModelError;
pub use ids::{CorrelationId, HolderId, ModelId, TreeId, VersionStamp};
pub use interrupt::{InterruptEvent, InterruptOp};
pub use model::{CatalogPayload, ThreatModel};
pub use status::{ProcessingStatus, StatusReport};
pub use threat::{Likelihood, StrideCategory, Threat, UNKNOWN_SOURCE, UNKNOWN_TARGET};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
