//! Configuration file support.
//!
//! All settings have defaults, so a config file only needs the keys it
//! changes. Sections map to [`ParseConfig`], [`ValidateConfig`] and
//! [`SqlConfig`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagStormError};

/// Settings for the whole tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagStormConfig {
    #[serde(default)]
    pub parse: ParseConfig,

    #[serde(default)]
    pub validate: ValidateConfig,

    #[serde(default)]
    pub sql: SqlConfig,
}

/// Tag storm text reader settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Maximum stanza nesting depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Column multiple a tab advances to.
    #[serde(default = "default_tab_stop")]
    pub tab_stop: usize,
}

/// Schema validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateConfig {
    /// Stop after this many errors.
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
}

/// SQL emitter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlConfig {
    /// Name of the created table.
    #[serde(default = "default_table")]
    pub table: String,

    /// Fields that get an index.
    #[serde(default)]
    pub key_fields: Vec<String>,

    /// Prefix length used when indexing string columns.
    #[serde(default = "default_index_prefix")]
    pub index_prefix: usize,

    /// Longest string stored as varchar; longer ones become longblob.
    #[serde(default = "default_max_varchar")]
    pub max_varchar: usize,

    /// Row width ceiling in bytes.
    #[serde(default = "default_row_width_limit")]
    pub row_width_limit: usize,
}

fn default_max_depth() -> usize {
    32
}

fn default_tab_stop() -> usize {
    8
}

fn default_max_errors() -> usize {
    10
}

fn default_table() -> String {
    "tagStorm".to_string()
}

fn default_index_prefix() -> usize {
    16
}

fn default_max_varchar() -> usize {
    255
}

fn default_row_width_limit() -> usize {
    65535
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            tab_stop: default_tab_stop(),
        }
    }
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            max_errors: default_max_errors(),
        }
    }
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            key_fields: Vec::new(),
            index_prefix: default_index_prefix(),
            max_varchar: default_max_varchar(),
            row_width_limit: default_row_width_limit(),
        }
    }
}

impl TagStormConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TagStormError::Config(e.to_string()))
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TagStormError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| TagStormError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| TagStormError::io(path, e))
    }

    pub fn builder() -> TagStormConfigBuilder {
        TagStormConfigBuilder::new()
    }
}

/// Builder for [`TagStormConfig`].
#[derive(Default)]
pub struct TagStormConfigBuilder {
    config: TagStormConfig,
}

impl TagStormConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.parse.max_depth = depth;
        self
    }

    pub fn tab_stop(mut self, tab_stop: usize) -> Self {
        self.config.parse.tab_stop = tab_stop;
        self
    }

    pub fn max_errors(mut self, max_errors: usize) -> Self {
        self.config.validate.max_errors = max_errors;
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.config.sql.table = table.into();
        self
    }

    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.config.sql.key_fields.push(field.into());
        self
    }

    pub fn index_prefix(mut self, prefix: usize) -> Self {
        self.config.sql.index_prefix = prefix;
        self
    }

    pub fn max_varchar(mut self, max: usize) -> Self {
        self.config.sql.max_varchar = max;
        self
    }

    pub fn row_width_limit(mut self, limit: usize) -> Self {
        self.config.sql.row_width_limit = limit;
        self
    }

    pub fn build(self) -> TagStormConfig {
        self.config
    }
}
