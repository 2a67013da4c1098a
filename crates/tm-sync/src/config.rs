//! Client configuration
//!
//! Loaded from TOML; every field has a default so a partial file works.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Coordination settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Backend base URL
    pub base_url: String,
    /// Status poll interval
    pub poll_interval_ms: u64,
    /// Lock heartbeat interval
    pub heartbeat_interval_ms: u64,
    /// Consecutive heartbeat failures before the lock counts as lost
    pub max_heartbeat_failures: u32,
    /// How long the save success indicator stays visible
    pub success_banner_ms: u64,
    /// Per-request timeout
    pub request_timeout_ms: u64,
    /// Maximum cached diagram images
    pub image_cache_capacity: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            poll_interval_ms: 1_000,
            heartbeat_interval_ms: 30_000,
            max_heartbeat_failures: 3,
            success_banner_ms: 3_000,
            request_timeout_ms: 10_000,
            image_cache_capacity: 32,
        }
    }
}

impl SyncConfig {
    /// Parse from TOML text
    ///
    /// # Errors
    /// [`SyncError::Config`] on syntax errors or invalid values.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SyncError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// [`SyncError::Config`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "loading sync config");
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`SyncError::Config`] naming the first offending field.
    pub fn validate(&self) -> SyncResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::config("base_url must not be empty"));
        }
        let zero = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("max_heartbeat_failures", u64::from(self.max_heartbeat_failures)),
            ("success_banner_ms", self.success_banner_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("image_cache_capacity", self.image_cache_capacity),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);
        match zero {
            Some((field, _)) => Err(SyncError::config(format!("{field} must be greater than zero"))),
            None => Ok(()),
        }
    }

    /// Set base URL
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Set heartbeat interval
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = duration_ms(interval);
        self
    }

    /// Set heartbeat failure limit
    #[inline]
    #[must_use]
    pub fn with_max_heartbeat_failures(mut self, max: u32) -> Self {
        self.max_heartbeat_failures = max;
        self
    }

    /// Set success indicator duration
    #[inline]
    #[must_use]
    pub fn with_success_banner(mut self, duration: Duration) -> Self {
        self.success_banner_ms = duration_ms(duration);
        self
    }

    /// Set request timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set image cache capacity
    #[inline]
    #[must_use]
    pub fn with_image_cache_capacity(mut self, capacity: u64) -> Self {
        self.image_cache_capacity = capacity;
        self
    }

    /// Poll interval
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Heartbeat interval
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Success indicator duration
    #[inline]
    #[must_use]
    pub fn success_banner(&self) -> Duration {
        Duration::from_millis(self.success_banner_ms)
    }

    /// Request timeout
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.max_heartbeat_failures, 3);
        assert_eq!(config.success_banner(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            base_url = "https://tm.example.com/api"
            poll_interval_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "https://tm.example.com/api");
        assert_eq!(config.poll_interval(), Duration::from_millis(2500));
        assert_eq!(config.heartbeat_interval_ms, 30_000);
    }

    #[test]
    fn zero_interval_rejected() {
        let err = SyncConfig::from_toml_str("heartbeat_interval_ms = 0").unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval_ms"));
    }

    #[test]
    fn empty_base_url_rejected() {
        let config = SyncConfig::default().with_base_url("  ");
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "image_cache_capacity = 4").unwrap();

        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.image_cache_capacity, 4);
    }

    #[test]
    fn builders() {
        let config = SyncConfig::default()
            .with_poll_interval(Duration::from_millis(250))
            .with_max_heartbeat_failures(5);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_heartbeat_failures, 5);
    }
}
