//! Store configuration
//!
//! # Usage
//!
//! ```rust
//! use mailvault_meta::config::{Durability, StoreConfig};
//!
//! let config = StoreConfig::default()
//!     .durability(Durability::Fast)
//!     .backfill_batch_size(250);
//! assert!(config.validate().is_ok());
//! ```
//!
//! # YAML (v1)
//!
//! ```yaml
//! version: 1
//! database:
//!   path: /var/lib/gmvault/metadata.sqlite
//!   durability: durable
//! index:
//!   fields: [labels, thread_id, internal_date, category, location]
//! ```

pub mod durability;
pub mod error;
pub mod io;

pub use durability::Durability;
pub use error::{ConfigError, ConfigResult};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::models::fields;
use io::ConfigFileV1;

/// Supported YAML schema versions
pub const SUPPORTED_VERSIONS: [u32; 1] = [1];

/// Backing database settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite file; `None` opens a private in-memory database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub durability: Durability,
    /// SQLite busy handler timeout
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            durability: Durability::default(),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Secondary index settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Fields registered when the store opens
    pub fields: Vec<String>,
    /// Records re-derived per backfill/rebuild transaction
    pub backfill_batch_size: usize,
    /// Run pending backfills while opening
    pub backfill_on_open: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            fields: [
                fields::LABELS,
                fields::FLAGS,
                fields::THREAD_ID,
                fields::INTERNAL_DATE,
                fields::MESSAGE_ID,
                fields::CATEGORY,
                fields::LOCATION,
            ]
            .iter()
            .map(|f| f.to_string())
            .collect(),
            backfill_batch_size: 500,
            backfill_on_open: true,
        }
    }
}

/// Placement derivation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlacementConfig {
    /// First path segment that marks a chat message
    pub chat_area: String,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            chat_area: "chats".to_string(),
        }
    }
}

/// Query engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Records hydrated per read transaction by `find`
    pub page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

/// Complete store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    pub index: IndexConfig,
    pub placement: PlacementConfig,
    pub query: QueryConfig,
}

impl StoreConfig {
    /// Default configuration backed by the SQLite file at `path`
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self::default().path(path)
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database.path = Some(path.into());
        self
    }

    pub fn durability(mut self, durability: Durability) -> Self {
        self.database.durability = durability;
        self
    }

    /// Replace the fields registered on open
    pub fn index_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn backfill_batch_size(mut self, size: usize) -> Self {
        self.index.backfill_batch_size = size;
        self
    }

    pub fn backfill_on_open(mut self, enabled: bool) -> Self {
        self.index.backfill_on_open = enabled;
        self
    }

    pub fn chat_area(mut self, area: impl Into<String>) -> Self {
        self.placement.chat_area = area.into();
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.query.page_size = size;
        self
    }

    /// Check ranges and shapes
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.busy_timeout_ms > 600_000 {
            return Err(ConfigError::range_with_hint(
                "database.busy_timeout_ms",
                self.database.busy_timeout_ms,
                0,
                600_000,
                "Use at most ten minutes",
            ));
        }

        if !(1..=100_000).contains(&self.index.backfill_batch_size) {
            return Err(ConfigError::range_with_hint(
                "index.backfill_batch_size",
                self.index.backfill_batch_size,
                1,
                100_000,
                "Each backfill batch must cover at least one record",
            ));
        }

        if let Some(field) = self.index.fields.iter().find(|f| f.trim().is_empty()) {
            return Err(ConfigError::invalid_field(
                "index.fields",
                format!("field name {:?} is empty", field),
            ));
        }

        let area = &self.placement.chat_area;
        if area.is_empty() || area.contains(['/', '\\']) || area == "." || area == ".." {
            return Err(ConfigError::invalid_field(
                "placement.chat_area",
                format!("{:?} is not a single path segment", area),
            ));
        }

        if !(1..=10_000).contains(&self.query.page_size) {
            return Err(ConfigError::range_with_hint(
                "query.page_size",
                self.query.page_size,
                1,
                10_000,
                "Pages must hold at least one record",
            ));
        }

        Ok(())
    }

    /// Load from YAML file (v1 schema)
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;

        // Version check
        let version = file.version.ok_or(ConfigError::MissingVersion)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let config = Self {
            database: file.database,
            index: file.index,
            placement: file.placement,
            query: file.query,
        };
        config.validate()?;
        Ok(config)
    }

    /// Export as YAML (v1 schema)
    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: Some(1),
            database: self.database.clone(),
            index: self.index.clone(),
            placement: self.placement.clone(),
            query: self.query.clone(),
        };
        Ok(serde_yaml::to_string(&file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.path.is_none());
        assert_eq!(config.index.fields.len(), 7);
        assert_eq!(config.placement.chat_area, "chats");
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = StoreConfig::at_path("/tmp/meta.sqlite")
            .durability(Durability::Durable)
            .index_fields(["labels", "thread_id"]);

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("durability: durable"));

        let loaded = StoreConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_yaml_loading_with_partial_sections() {
        let yaml_content = r#"
version: 1
database:
  durability: fast
index:
  fields: [labels, subject]
  backfill_batch_size: 10
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = StoreConfig::from_yaml(temp_file.path()).unwrap();
        assert_eq!(config.database.durability, Durability::Fast);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.index.fields, vec!["labels", "subject"]);
        assert_eq!(config.index.backfill_batch_size, 10);
        assert!(config.index.backfill_on_open);
        assert_eq!(config.query.page_size, 100);
    }

    #[test]
    fn test_yaml_missing_version() {
        let result = StoreConfig::from_yaml_str("database:\n  durability: fast\n");
        assert!(matches!(result, Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let result = StoreConfig::from_yaml_str("version: 2\n");
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let result = StoreConfig::from_yaml_str("version: 1\nindex:\n  feilds: [labels]\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_yaml_durability_names() {
        let config =
            StoreConfig::from_yaml_str("version: 1\ndatabase:\n  durability: Durable\n").unwrap();
        assert_eq!(config.database.durability, Durability::Durable);

        let err = StoreConfig::from_yaml_str("version: 1\ndatabase:\n  durability: paranoid\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
        assert!(err.to_string().contains("Unknown durability 'paranoid'"));
    }

    #[test]
    fn test_yaml_range_checked() {
        let result = StoreConfig::from_yaml_str("version: 1\nquery:\n  page_size: 0\n");
        assert!(matches!(result, Err(ConfigError::Range { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(StoreConfig::default().backfill_batch_size(0).validate().is_err());
        assert!(StoreConfig::default().page_size(10_001).validate().is_err());
        assert!(StoreConfig::default().chat_area("a/b").validate().is_err());
        assert!(StoreConfig::default().chat_area("").validate().is_err());
        assert!(StoreConfig::default()
            .index_fields(["labels", " "])
            .validate()
            .is_err());

        let mut config = StoreConfig::default();
        config.database.busy_timeout_ms = 600_001;
        assert!(config.validate().is_err());
    }
}
