//! Persisted dashboard layout
//!
//! The layout lives under a fixed key in a [`KeyValueStore`]. Loading never
//! fails: a missing, unreadable or incomplete layout yields the default one.

use crate::error::StoreError;
use crate::render::ChartId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Store key for the dashboard layout
pub const LAYOUT_KEY: &str = "threat-dashboard-layout";

/// Position of one chart on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPlacement {
    /// Chart shown
    pub chart: ChartId,
    /// Grid column (0-based)
    pub column: u8,
    /// Grid width in columns
    pub width: u8,
}

/// Ordered chart placements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardLayout {
    /// Placements in display order
    pub placements: Vec<ChartPlacement>,
}

impl Default for DashboardLayout {
    fn default() -> Self {
        let placements = ChartId::ALL
            .into_iter()
            .enumerate()
            .map(|(i, chart)| match chart {
                ChartId::CategoryLikelihood | ChartId::TargetLikelihood => ChartPlacement {
                    chart,
                    column: 0,
                    width: 2,
                },
                _ => ChartPlacement {
                    chart,
                    column: u8::from(i % 2 == 0),
                    width: 1,
                },
            })
            .collect();
        Self { placements }
    }
}

impl DashboardLayout {
    /// Charts in display order
    pub fn charts(&self) -> impl Iterator<Item = ChartId> + '_ {
        self.placements.iter().map(|p| p.chart)
    }

    /// Required charts missing from this layout
    #[must_use]
    pub fn missing_charts(&self) -> Vec<ChartId> {
        ChartId::ALL
            .into_iter()
            .filter(|c| !self.placements.iter().any(|p| p.chart == *c))
            .collect()
    }

    /// Whether every required chart is placed
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_charts().is_empty()
    }

    /// Move a chart to a new display index
    ///
    /// Returns `false` if the chart is not placed.
    pub fn move_chart(&mut self, chart: ChartId, index: usize) -> bool {
        let Some(from) = self.placements.iter().position(|p| p.chart == chart) else {
            return false;
        };
        let placement = self.placements.remove(from);
        let index = index.min(self.placements.len());
        self.placements.insert(index, placement);
        true
    }
}

/// String key-value persistence for client state
pub trait KeyValueStore {
    /// Read a value
    ///
    /// # Errors
    /// [`StoreError`] when the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value
    ///
    /// # Errors
    /// [`StoreError`] when the backing storage cannot be written.
    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// JSON object file holding every key
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store backed by `path` (created on first write)
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StoreError::io_error(&self.path, e)),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        // A corrupt file is replaced rather than blocking every future write.
        let mut entries = match self.read_all() {
            Err(StoreError::Corrupt { .. }) => BTreeMap::new(),
            other => other?,
        };
        entries.insert(key.to_string(), value);
        let text = serde_json::to_string_pretty(&entries)?;
        std::fs::write(&self.path, text).map_err(|e| StoreError::io_error(&self.path, e))
    }
}

/// Load/save lifecycle for the dashboard layout
#[derive(Debug)]
pub struct LayoutStore<S> {
    store: S,
}

impl<S: KeyValueStore> LayoutStore<S> {
    /// Wrap a store
    #[inline]
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Saved layout, or the default if none is usable
    #[must_use]
    pub fn load(&self) -> DashboardLayout {
        let raw = match self.store.get(LAYOUT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return DashboardLayout::default(),
            Err(e) => {
                tracing::warn!(error = %e, "layout store unreadable, using default layout");
                return DashboardLayout::default();
            }
        };

        match serde_json::from_str::<DashboardLayout>(&raw) {
            Ok(layout) if layout.is_complete() => layout,
            Ok(layout) => {
                tracing::info!(missing = ?layout.missing_charts(), "saved layout incomplete, using default");
                DashboardLayout::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "saved layout invalid, using default");
                DashboardLayout::default()
            }
        }
    }

    /// Persist a layout
    ///
    /// # Errors
    /// [`StoreError`] if encoding or writing fails.
    pub fn save(&self, layout: &DashboardLayout) -> Result<(), StoreError> {
        let raw = serde_json::to_string(layout)?;
        self.store.set(LAYOUT_KEY, raw)
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_layout_is_complete() {
        let layout = DashboardLayout::default();
        assert!(layout.is_complete());
        assert_eq!(layout.charts().count(), ChartId::ALL.len());
    }

    #[test]
    fn load_without_saved_layout() {
        let store = LayoutStore::new(MemoryStore::new());
        assert_eq!(store.load(), DashboardLayout::default());
    }

    #[test]
    fn save_and_load_reordered_layout() {
        let store = LayoutStore::new(MemoryStore::new());
        let mut layout = DashboardLayout::default();
        assert!(layout.move_chart(ChartId::TargetLikelihood, 0));

        store.save(&layout).unwrap();
        let loaded = store.load();

        assert_eq!(loaded, layout);
        assert_eq!(loaded.charts().next(), Some(ChartId::TargetLikelihood));
    }

    #[test]
    fn incomplete_layout_falls_back() {
        let store = LayoutStore::new(MemoryStore::new());
        let mut layout = DashboardLayout::default();
        layout.placements.retain(|p| p.chart != ChartId::Sources);
        store.save(&layout).unwrap();

        assert_eq!(store.load(), DashboardLayout::default());
    }

    #[test]
    fn garbage_layout_falls_back() {
        let store = LayoutStore::new(MemoryStore::new());
        store.store().set(LAYOUT_KEY, "{not json".to_string()).unwrap();
        assert_eq!(store.load(), DashboardLayout::default());
    }

    fn file_store(dir: &tempfile::TempDir) -> FileStore {
        FileStore::new(dir.path().join("dashboard.json"))
    }

    #[test]
    fn missing_file_loads_default_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayoutStore::new(file_store(&dir));

        assert_eq!(store.store().get(LAYOUT_KEY).unwrap(), None);
        assert_eq!(store.load(), DashboardLayout::default());
        assert!(!store.store().path().exists());
    }

    #[test]
    fn corrupt_file_is_replaced_on_set() {
        let dir = tempfile::tempdir().unwrap();
        let files = file_store(&dir);
        std::fs::write(files.path(), "][ definitely not json").unwrap();

        assert!(matches!(files.get(LAYOUT_KEY), Err(StoreError::Corrupt { .. })));
        assert_eq!(LayoutStore::new(files.clone()).load(), DashboardLayout::default());

        files.set("theme", "dark".to_string()).unwrap();
        assert_eq!(files.get("theme").unwrap(), Some("dark".to_string()));
    }

    #[test]
    fn file_round_trip_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayoutStore::new(file_store(&dir));
        store.store().set("theme", "dark".to_string()).unwrap();

        let mut layout = DashboardLayout::default();
        assert!(layout.move_chart(ChartId::Sources, 0));
        store.save(&layout).unwrap();

        let reopened = LayoutStore::new(file_store(&dir));
        assert_eq!(reopened.load(), layout);
        assert_eq!(reopened.store().get("theme").unwrap(), Some("dark".to_string()));
    }

    #[test]
    fn move_unknown_chart() {
        let mut layout = DashboardLayout {
            placements: Vec::new(),
        };
        assert!(!layout.move_chart(ChartId::Summary, 0));
    }
}
