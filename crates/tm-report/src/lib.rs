//! Dashboard and export surface for threat models
//!
//! - [`aggregate`]: pure threat-list aggregation into chart data
//! - [`render`]: per-chart rendering with sticky failure containment
//! - [`layout`]: persisted dashboard layout with default fallback
//! - [`export`]: JSON and Markdown documents
//!
//! # Example
//!
//! ```rust
//! use tm_model::Threat;
//! use tm_report::{summarize, DashboardLayout, RenderSupervisor};
//!
//! let threats = vec![Threat::new("Replay").with_likelihood("High")];
//! let summary = summarize(&threats);
//! let mut supervisor = RenderSupervisor::new();
//!
//! let views = supervisor.render_layout(&DashboardLayout::default(), &summary);
//! assert!(views.iter().all(|v| !v.is_fallback()));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod aggregate;
pub mod error;
pub mod export;
pub mod layout;
pub mod render;

pub use aggregate::{
    category_by_likelihood, count_by_category, count_by_likelihood, count_by_source,
    count_by_target, summarize, target_by_likelihood, top_targets, BucketCount,
    DashboardSummary, LevelCount, Series, TOP_TARGETS,
};
pub use error::{ExportError, RenderError, StoreError};
pub use export::{export, exporter_for, file_name, ExportFormat, Exporter};
pub use layout::{
    ChartPlacement, DashboardLayout, FileStore, KeyValueStore, LayoutStore, MemoryStore,
    LAYOUT_KEY,
};
pub use render::{ChartId, ChartRenderer, ChartView, RenderSupervisor, StandardRenderer};
