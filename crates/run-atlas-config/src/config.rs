// crates/run-atlas-config/src/config.rs
// ============================================================================
// Module: Run Atlas Configuration
// Description: Configuration model, TOML loading, and validation.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: run-atlas-core, run-atlas-store-postgres, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section is optional and falls back to the store defaults; whatever is
//! present is validated before use and a bad value fails the whole load.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use run_atlas_core::FilterSpec;
use run_atlas_core::RunQuery;
use run_atlas_core::core::filter::DEFAULT_PAGE_SIZE;
use run_atlas_core::core::filter::MAX_PAGE_SIZE;
use run_atlas_core::core::histogram::MAX_BIN_COUNT;
use run_atlas_store_postgres::PostgresStoreConfig;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "run-atlas.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "RUN_ATLAS_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Longest accepted cache TTL in milliseconds (one day).
pub const MAX_CACHE_TTL_MS: u64 = 86_400_000;

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Top-level Run Atlas configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunAtlasConfig {
    /// Database connection and pool settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Cache lifetimes.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Query limits.
    #[serde(default)]
    pub query: QueryConfig,
}

impl RunAtlasConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// An explicit path wins, then `RUN_ATLAS_CONFIG`, then `run-atlas.toml`
    /// in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content =
            std::str::from_utf8(&bytes).map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section and their combination.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.query.validate()?;
        self.to_store_config().validate().map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Flattens the sections into the Postgres store configuration.
    #[must_use]
    pub fn to_store_config(&self) -> PostgresStoreConfig {
        PostgresStoreConfig {
            connection: self.store.connection.clone(),
            max_connections: self.store.max_connections,
            min_idle: self.store.min_idle,
            connect_timeout_ms: self.store.connect_timeout_ms,
            statement_timeout_ms: self.store.statement_timeout_ms,
            field_index_ttl_ms: self.cache.field_index_ttl_ms,
            experiments_ttl_ms: self.cache.experiments_ttl_ms,
            namespace_map_ttl_ms: self.cache.namespace_map_ttl_ms,
            max_page_size: self.query.max_page_size,
            introspection_sample: self.query.introspection_sample,
            max_histogram_bins: self.query.max_histogram_bins,
        }
    }
}

/// Database connection and pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Postgres URL, optionally carrying `schema` and `file_root`.
    pub connection: String,
    /// Maximum pool size.
    pub max_connections: u32,
    /// Idle connections kept warm.
    pub min_idle: u32,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Statement timeout in milliseconds.
    pub statement_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let defaults = PostgresStoreConfig::default();
        Self {
            connection: defaults.connection,
            max_connections: defaults.max_connections,
            min_idle: defaults.min_idle,
            connect_timeout_ms: defaults.connect_timeout_ms,
            statement_timeout_ms: defaults.statement_timeout_ms,
        }
    }
}

/// Cache lifetimes in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Field index lifetime.
    pub field_index_ttl_ms: u64,
    /// Experiment listing lifetime.
    pub experiments_ttl_ms: u64,
    /// Namespace map lifetime.
    pub namespace_map_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let defaults = PostgresStoreConfig::default();
        Self {
            field_index_ttl_ms: defaults.field_index_ttl_ms,
            experiments_ttl_ms: defaults.experiments_ttl_ms,
            namespace_map_ttl_ms: defaults.namespace_map_ttl_ms,
        }
    }
}

impl CacheConfig {
    /// Validates cache lifetimes.
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, ttl) in [
            ("field_index_ttl_ms", self.field_index_ttl_ms),
            ("experiments_ttl_ms", self.experiments_ttl_ms),
            ("namespace_map_ttl_ms", self.namespace_map_ttl_ms),
        ] {
            if ttl == 0 || ttl > MAX_CACHE_TTL_MS {
                return Err(ConfigError::Invalid(format!("cache.{name} must be between 1 and {MAX_CACHE_TTL_MS}")));
            }
        }
        Ok(())
    }
}

/// Query limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Page size used when a caller names none.
    pub default_page_size: u32,
    /// Largest accepted page size.
    pub max_page_size: u32,
    /// Payloads sampled per namespace when the field catalog is missing.
    pub introspection_sample: u32,
    /// Largest accepted histogram bin count.
    pub max_histogram_bins: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let defaults = PostgresStoreConfig::default();
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: defaults.max_page_size,
            introspection_sample: defaults.introspection_sample,
            max_histogram_bins: defaults.max_histogram_bins,
        }
    }
}

impl QueryConfig {
    /// Validates limits that the store does not check itself.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid("query.default_page_size must be between 1 and max_page_size".to_string()));
        }
        if self.max_page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!("query.max_page_size must not exceed {MAX_PAGE_SIZE}")));
        }
        if self.max_histogram_bins > MAX_BIN_COUNT {
            return Err(ConfigError::Invalid(format!("query.max_histogram_bins must not exceed {MAX_BIN_COUNT}")));
        }
        Ok(())
    }

    /// Builds a first-page query with the configured default page size.
    #[must_use]
    pub fn first_page(&self, filter: Option<FilterSpec>) -> RunQuery {
        RunQuery::page(filter, self.default_page_size, 0)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the caller or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
