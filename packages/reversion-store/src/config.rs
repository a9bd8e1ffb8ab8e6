//! Versioning configuration
//!
//! Defaults cover the common case; a versioned YAML document overrides them:
//!
//! ```yaml
//! version: 1
//! reversion:
//!   manager_slug: articles
//!   default_format: msgpack
//!   history_order: descending
//!   ignore_duplicates: true
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::HistoryOrder;

/// Supported YAML schema versions.
pub const SUPPORTED_CONFIG_VERSIONS: &[u32] = &[1];

/// Default moderated-status field on live objects.
pub const DEFAULT_STATUS_FIELD: &str = "moderated_status";

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing version field in YAML
    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    /// Unsupported version
    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    /// Empty value for a required setting
    #[error("Setting '{field}' must not be empty")]
    Empty { field: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration result type
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Settings shared by every component of one revision manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReversionConfig {
    /// Grouping key stamped on every revision this manager creates.
    pub manager_slug: String,

    /// Serialization format used when a registration does not pick one.
    pub default_format: String,

    /// Ordering of history and deleted-object listings.
    pub history_order: HistoryOrder,

    /// Skip revisions whose payloads all match the latest stored ones.
    pub ignore_duplicates: bool,

    /// Denormalized moderation status field on live objects.
    pub status_field: String,
}

impl Default for ReversionConfig {
    fn default() -> Self {
        Self {
            manager_slug: "default".to_string(),
            default_format: "json".to_string(),
            history_order: HistoryOrder::Ascending,
            ignore_duplicates: false,
            status_field: DEFAULT_STATUS_FIELD.to_string(),
        }
    }
}

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigExportV1 {
    /// Schema version (always 1 for v1)
    version: Option<u32>,

    #[serde(default)]
    reversion: ReversionConfig,
}

impl ReversionConfig {
    pub fn with_manager_slug(mut self, slug: impl Into<String>) -> Self {
        self.manager_slug = slug.into();
        self
    }

    pub fn with_default_format(mut self, format: impl Into<String>) -> Self {
        self.default_format = format.into();
        self
    }

    pub fn with_history_order(mut self, order: HistoryOrder) -> Self {
        self.history_order = order;
        self
    }

    pub fn with_ignore_duplicates(mut self, ignore: bool) -> Self {
        self.ignore_duplicates = ignore;
        self
    }

    pub fn with_status_field(mut self, field: impl Into<String>) -> Self {
        self.status_field = field.into();
        self
    }

    /// Load from a YAML file.
    pub fn from_yaml(path: &str) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let export: ConfigExportV1 = serde_yaml::from_str(content)?;

        let version = export.version.ok_or(ConfigError::MissingVersion)?;
        if !SUPPORTED_CONFIG_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_CONFIG_VERSIONS.to_vec(),
            });
        }

        export.reversion.validate()?;
        Ok(export.reversion)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let export = ConfigExportV1 {
            version: Some(1),
            reversion: self.clone(),
        };
        serde_yaml::to_string(&export).map_err(ConfigError::Yaml)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("manager_slug", &self.manager_slug),
            ("default_format", &self.default_format),
            ("status_field", &self.status_field),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}
