//! Layered configuration: discovery, merge and decode.
//!
//! Sources are merged in a fixed precedence order, later wins:
//!
//! ```text
//! seed bytes → primary file → default files → active-profile files
//!                                    ↑ env overlay consulted on every read
//! ```

mod format;
mod loader;
mod locator;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

pub use format::FileType;
pub use loader::ConfigLoader;
pub use locator::{ConfigCatalog, ConfigFile, ConfigItem, ConfigLocator, DirPolicy, SearchPath};
pub use store::{ConfigStore, EnvOverlay};

/// Active profile selector.
pub const KEY_PROFILES_ACTIVE: &str = "profiles.active";
/// Application display name.
pub const KEY_APP_NAME: &str = "app.name";
/// Application timezone label.
pub const KEY_APP_TIMEZONE: &str = "app.timezone";
/// Log level applied once configuration is loaded.
pub const KEY_APP_LOG_LEVEL: &str = "app.log.level";

pub const DEFAULT_CONFIG_NAME: &str = "application";
pub const DEFAULT_CONFIG_PATH: &str = "./config";
pub const DEFAULT_ENV_PREFIX: &str = "KT";
pub const DEFAULT_LOG_LEVEL: &str = "debug";

/// Validation applied after a config subsection is decoded.
///
/// Implement this for your unit's configuration structs so that
/// [`ConfigStore::decode`] can reject semantically invalid values.
///
/// # Example
///
/// ```rust
/// use serde::Deserialize;
/// use unitboot::Validate;
///
/// #[derive(Debug, Deserialize)]
/// struct PoolConfig {
///     max_connections: u32,
/// }
///
/// impl Validate for PoolConfig {
///     fn validate(&self) -> Result<(), String> {
///         if self.max_connections == 0 {
///             return Err("max_connections must be greater than 0".to_string());
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Validate {
    /// Returns Ok(()) if valid, or an error message describing the issue.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Where configuration comes from and how it is layered.
#[derive(Clone)]
pub struct ConfigOptions {
    /// Base name of the primary configuration.
    pub name: Option<String>,
    /// Restrict discovery to one format; `None` enables every supported format.
    pub file_type: Option<FileType>,
    /// Explicit primary file, replacing the name-based lookup.
    pub file: Option<PathBuf>,
    pub search_paths: Vec<SearchPath>,
    /// In-memory seed, merged first.
    pub data: Option<Vec<u8>>,
    pub env_override: bool,
    pub env_prefix: Option<String>,
    env_lookup: Option<EnvLookup>,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            name: Some(DEFAULT_CONFIG_NAME.to_string()),
            file_type: None,
            file: None,
            search_paths: vec![SearchPath::auxiliary(DEFAULT_CONFIG_PATH)],
            data: None,
            env_override: true,
            env_prefix: Some(DEFAULT_ENV_PREFIX.to_string()),
            env_lookup: None,
        }
    }
}

impl ConfigOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find `<name>.<ext>` in the search paths as the primary configuration.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.file = None;
        self
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }

    /// Load the primary configuration from this file; it must exist.
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Add an explicitly configured directory (unreadable is fatal).
    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(SearchPath::required(dir));
        self
    }

    /// Add an opportunistic directory (unreadable is skipped).
    pub fn with_auxiliary_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(SearchPath::auxiliary(dir));
        self
    }

    /// Drop every search path, including the default one.
    pub fn without_search_paths(mut self) -> Self {
        self.search_paths.clear();
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Toggle the environment overlay; a blank prefix keeps the current one.
    pub fn with_env_override(mut self, enable: bool, prefix: Option<&str>) -> Self {
        self.env_override = enable;
        if let Some(prefix) = prefix.map(str::trim).filter(|p| !p.is_empty()) {
            self.env_prefix = Some(prefix.to_string());
        }
        self
    }

    /// Read overlay variables through `lookup` instead of the process environment.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env_lookup = Some(Arc::new(lookup));
        self
    }

    /// The overlay these options describe, if enabled.
    pub fn env_overlay(&self) -> Option<EnvOverlay> {
        if !self.env_override {
            return None;
        }
        let prefix = self.env_prefix.as_deref();
        Some(match &self.env_lookup {
            Some(lookup) => {
                let lookup = Arc::clone(lookup);
                EnvOverlay::with_lookup(prefix, move |name| lookup(name))
            }
            None => EnvOverlay::from_process(prefix),
        })
    }

    /// Formats enabled for discovery.
    pub fn file_types(&self) -> Vec<FileType> {
        match self.file_type {
            Some(t) => vec![t],
            None => FileType::ALL.to_vec(),
        }
    }
}

impl std::fmt::Debug for ConfigOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigOptions")
            .field("name", &self.name)
            .field("file_type", &self.file_type)
            .field("file", &self.file)
            .field("search_paths", &self.search_paths)
            .field("data", &self.data.as_ref().map(Vec::len))
            .field("env_override", &self.env_override)
            .field("env_prefix", &self.env_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ConfigOptions::new();
        assert_eq!(options.name.as_deref(), Some("application"));
        assert_eq!(options.search_paths, vec![SearchPath::auxiliary("./config")]);
        assert!(options.env_override);
        assert_eq!(options.file_types(), FileType::ALL.to_vec());
    }

    #[test]
    fn test_env_override_prefix() {
        let options = ConfigOptions::new().with_env_override(true, Some("  "));
        assert_eq!(options.env_prefix.as_deref(), Some("KT"));

        let options = options
            .with_env_override(true, Some(" app "))
            .with_env_lookup(|name| (name == "APP_X").then(|| "1".to_string()));
        assert_eq!(options.env_overlay().unwrap().get("x").as_deref(), Some("1"));

        assert!(options.with_env_override(false, None).env_overlay().is_none());
    }

    #[derive(Debug)]
    struct Workers(u32);

    impl Validate for Workers {
        fn validate(&self) -> Result<(), String> {
            if self.0 == 0 {
                Err("workers must be greater than 0".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_custom_validation() {
        assert!(Workers(4).validate().is_ok());
        assert!(Workers(0).validate().is_err());
    }
}
