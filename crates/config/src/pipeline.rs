//! Pipeline configuration types
//!
//! All sections have serde defaults, so an empty TOML document yields a
//! working configuration (with an unconfigured backend - see
//! [`BackendConfig`]).

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Top-level pipeline configuration
///
/// # Example
///
/// ```toml
/// shard = 3
/// ingest_capacity = 16384
///
/// [backend]
/// url = "kafka-1:9092"
/// topic = "app-logs"
///
/// [overflow]
/// dir = "/var/spool/ferry"
/// max_segments = 16
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Whether the pipeline runs at all
    pub enabled: bool,

    /// Shard identifier baked into every record id (0..1024)
    pub shard: u16,

    /// Ingest ring capacity in events (rounded up to a power of two)
    pub ingest_capacity: usize,

    /// Transport ring capacity in records (rounded up to a power of two)
    pub transport_capacity: usize,

    /// Event category prefixes that are silently discarded
    ///
    /// Guards against the pipeline's own diagnostics re-entering it.
    pub exclude_categories: Vec<String>,

    /// Milliseconds the shutdown path spends draining the overflow store
    /// into the transport before persisting the rest to disk
    pub drain_timeout_ms: u64,

    /// Message-queue backend endpoint
    pub backend: BackendConfig,

    /// Transport stage tuning
    pub transport: TransportConfig,

    /// Overflow store tuning
    pub overflow: OverflowSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shard: 0,
            ingest_capacity: 16_384,
            transport_capacity: 8_192,
            exclude_categories: vec!["ferry".to_string()],
            drain_timeout_ms: 5_000,
            backend: BackendConfig::default(),
            transport: TransportConfig::default(),
            overflow: OverflowSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    ///
    /// A missing backend URL or topic is deliberately *not* an error:
    /// the pipeline starts degraded and spills to the overflow store
    /// until a backend appears.
    pub fn validate(&self) -> Result<()> {
        if self.shard >= 1024 {
            return Err(ConfigError::invalid(
                "pipeline",
                "shard",
                format!("{} is out of range (0..1024)", self.shard),
            ));
        }
        if self.ingest_capacity < 2 {
            return Err(ConfigError::invalid(
                "pipeline",
                "ingest_capacity",
                "must be at least 2",
            ));
        }
        if self.transport_capacity < 2 {
            return Err(ConfigError::invalid(
                "pipeline",
                "transport_capacity",
                "must be at least 2",
            ));
        }
        self.transport.validate()?;
        self.overflow.validate()?;

        if !self.backend.is_configured() {
            tracing::warn!("backend url/topic not configured, pipeline will run degraded");
        }
        Ok(())
    }

    /// Shutdown drain budget as a [`Duration`]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    #[must_use]
    pub fn with_shard(mut self, shard: u16) -> Self {
        self.shard = shard;
        self
    }

    #[must_use]
    pub fn with_ingest_capacity(mut self, capacity: usize) -> Self {
        self.ingest_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_transport_capacity(mut self, capacity: usize) -> Self {
        self.transport_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_exclude_categories(mut self, prefixes: Vec<String>) -> Self {
        self.exclude_categories = prefixes;
        self
    }

    #[must_use]
    pub fn with_backend(mut self, url: impl Into<String>, topic: impl Into<String>) -> Self {
        self.backend.url = Some(url.into());
        self.backend.topic = Some(topic.into());
        self
    }

    #[must_use]
    pub fn with_overflow_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.overflow.dir = dir.into();
        self
    }
}

/// Message-queue backend endpoint
///
/// Both fields optional: an unconfigured backend is a degraded state,
/// not a startup failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Broker address
    pub url: Option<String>,

    /// Destination topic
    pub topic: Option<String>,
}

impl BackendConfig {
    /// Whether the producer has enough to attempt a connection
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.topic.is_some()
    }
}

/// Transport stage tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Records sent between flushes
    pub batch_size: usize,

    /// Consecutive send failures before the backend is marked not ready
    pub failure_threshold: u32,

    /// Minimum milliseconds between unchanged-id confirmations
    pub confirm_interval_ms: u64,

    /// Milliseconds between heartbeat probes while not ready
    pub heartbeat_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            failure_threshold: 10,
            confirm_interval_ms: 1_000,
            heartbeat_interval_ms: 5_000,
        }
    }
}

impl TransportConfig {
    pub fn confirm_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid(
                "transport",
                "batch_size",
                "must be at least 1",
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "transport",
                "failure_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Overflow store tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverflowSettings {
    /// Folder for segment files and the cursor index
    pub dir: PathBuf,

    /// Segment file name prefix
    pub file_prefix: String,

    /// Total queued payload bytes before records are rejected
    pub capacity_bytes: u64,

    /// Coalescing buffer size in bytes (one buffer becomes one block)
    pub buffer_capacity: usize,

    /// Segment file size at which rotation happens
    pub segment_capacity: u64,

    /// Sealed segments kept before the oldest is pruned
    pub max_segments: usize,
}

impl Default for OverflowSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("ferry-overflow"),
            file_prefix: "overflow".to_string(),
            capacity_bytes: 256 * 1024 * 1024,
            buffer_capacity: 1024 * 1024,
            segment_capacity: 64 * 1024 * 1024,
            max_segments: 8,
        }
    }
}

impl OverflowSettings {
    fn validate(&self) -> Result<()> {
        if self.buffer_capacity < 64 {
            return Err(ConfigError::invalid(
                "overflow",
                "buffer_capacity",
                "must be at least 64 bytes",
            ));
        }
        if self.segment_capacity < self.buffer_capacity as u64 {
            return Err(ConfigError::invalid(
                "overflow",
                "segment_capacity",
                "must be at least buffer_capacity",
            ));
        }
        if self.capacity_bytes == 0 {
            return Err(ConfigError::invalid(
                "overflow",
                "capacity_bytes",
                "must be nonzero",
            ));
        }
        if self.max_segments == 0 {
            return Err(ConfigError::invalid(
                "overflow",
                "max_segments",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert!(config.enabled);
        assert_eq!(config.transport.batch_size, 100);
        assert_eq!(config.overflow.max_segments, 8);
        assert!(!config.backend.is_configured());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config.ingest_capacity, 16_384);
        assert_eq!(config.exclude_categories, vec!["ferry".to_string()]);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = PipelineConfig::from_toml(
            r#"
            shard = 7
            ingest_capacity = 256

            [backend]
            url = "mq:9092"
            topic = "logs"

            [transport]
            batch_size = 25

            [overflow]
            dir = "/tmp/ferry"
            max_segments = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.shard, 7);
        assert_eq!(config.ingest_capacity, 256);
        assert!(config.backend.is_configured());
        assert_eq!(config.transport.batch_size, 25);
        assert_eq!(config.overflow.dir, PathBuf::from("/tmp/ferry"));
        assert_eq!(config.overflow.max_segments, 2);
        // Untouched sections keep their defaults.
        assert_eq!(config.transport.failure_threshold, 10);
        assert_eq!(config.overflow.file_prefix, "overflow");
    }

    #[test]
    fn test_shard_out_of_range_rejected() {
        let err = PipelineConfig::from_toml("shard = 1024").unwrap_err();
        assert!(err.to_string().contains("shard"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = PipelineConfig::from_toml("[transport]\nbatch_size = 0").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_missing_backend_is_not_an_error() {
        let config = PipelineConfig::from_toml("[backend]\nurl = \"mq:9092\"").unwrap();
        assert!(!config.backend.is_configured());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ferry.toml");
        std::fs::write(&path, "shard = 3\n").unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.shard, 3);

        let err = PipelineConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn test_builder_setters() {
        let config = PipelineConfig::default()
            .with_shard(5)
            .with_backend("mq:9092", "logs")
            .with_overflow_dir("/tmp/spool");

        assert_eq!(config.shard, 5);
        assert!(config.backend.is_configured());
        assert_eq!(config.overflow.dir, PathBuf::from("/tmp/spool"));
    }
}
