//! Builds the merged configuration store at boot.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::format::FileType;
use crate::config::locator::ConfigLocator;
use crate::config::store::ConfigStore;
use crate::config::{ConfigOptions, DEFAULT_CONFIG_NAME, KEY_PROFILES_ACTIVE};
use crate::error::{ConfigError, ConfigResult};

/// Applies the configuration sources in precedence order.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    options: ConfigOptions,
}

impl ConfigLoader {
    pub fn new(options: ConfigOptions) -> Self {
        Self { options }
    }

    /// Merge every source into `store`, which may already carry defaults.
    ///
    /// A missing primary file is tolerated; malformed content anywhere is
    /// fatal and names the offending path.
    pub fn load(&self, mut store: ConfigStore) -> ConfigResult<ConfigStore> {
        info!("Loading config");
        let types = self.options.file_types();
        if let Some(env) = self.options.env_overlay() {
            store = store.with_env(env);
        }

        self.merge_seed(&mut store)?;
        let primary = self.merge_primary(&mut store, &types)?;

        let profile = store
            .get_str(KEY_PROFILES_ACTIVE)
            .map(|p| p.trim().to_string())
            .unwrap_or_default();
        info!(profile = %profile, "Active profile");

        let locator = ConfigLocator::new(&types)?;
        let catalogs = locator.locate_all(&self.options.search_paths)?;

        for item in catalogs.iter().flat_map(|c| c.items()) {
            if primary.name.as_deref() == Some(item.name.as_str()) {
                continue;
            }
            if let Some(file) = item.default.as_ref().filter(|f| !primary.is_file(&f.path)) {
                info!(config = %item.name, "Applying default config");
                merge_file(&mut store, &file.path, file.file_type)?;
            }
        }

        if !profile.is_empty() {
            for item in catalogs.iter().flat_map(|c| c.items()) {
                for file in item.profile_files(&profile) {
                    if primary.is_file(&file.path) {
                        continue;
                    }
                    info!(config = %item.name, profile = %profile, "Applying profile config");
                    merge_file(&mut store, &file.path, file.file_type)?;
                }
            }
        }

        Ok(store)
    }

    fn merge_seed(&self, store: &mut ConfigStore) -> ConfigResult<()> {
        let Some(data) = self.options.data.as_deref().filter(|d| !d.is_empty()) else {
            return Ok(());
        };
        let text = std::str::from_utf8(data).map_err(|e| ConfigError::InvalidSeed(e.to_string()))?;
        let file_type = self.options.file_type.unwrap_or(FileType::Toml);
        let table = file_type.parse(text).map_err(ConfigError::InvalidSeed)?;
        debug!(keys = table.len(), "Applied in-memory config");
        store.merge(table);
        Ok(())
    }

    /// Merge the primary configuration and report what it consumed.
    ///
    /// With an explicit file, the configured name is still reserved so its
    /// default file never lands on top of the explicit one.
    fn merge_primary(&self, store: &mut ConfigStore, types: &[FileType]) -> ConfigResult<Primary> {
        let name = self
            .options
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        if let Some(file) = &self.options.file {
            let file_type = match self.options.file_type {
                Some(t) => t,
                None => file
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(FileType::from_extension)
                    .ok_or_else(|| ConfigError::UnsupportedType(file.display().to_string()))?,
            };
            info!(path = %file.display(), "Applying primary config");
            merge_file(store, file, file_type)?;
            return Ok(Primary {
                name: Some(name.unwrap_or_else(|| DEFAULT_CONFIG_NAME.to_string())),
                path: Some(canonical(file)),
            });
        }

        let Some(name) = name else {
            return Ok(Primary::default());
        };
        let found = self.options.search_paths.iter().find_map(|search| {
            types.iter().find_map(|t| {
                let path = search.dir.join(format!("{name}.{}", t.extension()));
                path.is_file().then_some((path, *t))
            })
        });
        match found {
            Some((path, file_type)) => {
                info!(path = %path.display(), "Applying primary config");
                merge_file(store, &path, file_type)?;
            }
            None => debug!(name = %name, "Primary config not found"),
        }
        Ok(Primary {
            name: Some(name),
            path: None,
        })
    }
}

/// What the primary step consumed: a reserved base name and, for an
/// explicit file, its path.
#[derive(Debug, Default)]
struct Primary {
    name: Option<String>,
    path: Option<PathBuf>,
}

impl Primary {
    fn is_file(&self, path: &Path) -> bool {
        self.path.as_deref() == Some(canonical(path).as_path())
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn merge_file(store: &mut ConfigStore, path: &Path, file_type: FileType) -> ConfigResult<()> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let table = file_type.parse(&content).map_err(|reason| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    })?;
    store.merge(table);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    fn options(dir: &TempDir) -> ConfigOptions {
        ConfigOptions::new()
            .without_search_paths()
            .with_search_path(dir.path())
            .with_env_override(false, None)
    }

    fn env_options(dir: &TempDir, vars: &[(&str, &str)]) -> ConfigOptions {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        options(dir)
            .with_env_override(true, Some("KT"))
            .with_env_lookup(move |name| vars.get(name).cloned())
    }

    #[test]
    fn test_profile_overrides_primary() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir,
            "application.toml",
            "[profiles]\nactive = \"prod\"\n[server]\nport = 8080\nhost = \"localhost\"",
        );
        write(&dir, "application-prod.toml", "[server]\nport = 80");
        write(&dir, "application-dev.toml", "[server]\nport = 3000");

        let store = ConfigLoader::new(options(&dir)).load(ConfigStore::new()).unwrap();
        assert_eq!(store.get::<i64>("server.port").unwrap(), Some(80));
        assert_eq!(store.get_str("server.host").as_deref(), Some("localhost"));
        assert!(!store.contains("server.timeout"));
    }

    #[test]
    fn test_defaults_merge_before_profiles() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "application.toml", "[profiles]\nactive = \"DEV\"");
        write(&dir, "db.toml", "[db]\nurl = \"default\"\npool = 4");
        write(&dir, "db_dev.toml", "[db]\nurl = \"dev\"");
        write(&dir, "zz.toml", "[db]\npool = 8");

        let store = ConfigLoader::new(options(&dir)).load(ConfigStore::new()).unwrap();
        assert_eq!(store.get_str("db.url").as_deref(), Some("dev"));
        assert_eq!(store.get::<i64>("db.pool").unwrap(), Some(8));
    }

    #[test]
    fn test_seed_then_files() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "application.toml", "[app]\nname = \"from-file\"");
        let opts = options(&dir).with_data("[app]\nname = \"seed\"\nowner = \"ops\"");

        let store = ConfigLoader::new(opts).load(ConfigStore::new()).unwrap();
        assert_eq!(store.get_str("app.name").as_deref(), Some("from-file"));
        assert_eq!(store.get_str("app.owner").as_deref(), Some("ops"));
    }

    #[test]
    fn test_invalid_seed_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(&dir).with_data("not = [valid");
        let err = ConfigLoader::new(opts).load(ConfigStore::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSeed(_)));
    }

    #[test]
    fn test_malformed_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "cache.toml", "[cache\nttl = 1");
        let err = ConfigLoader::new(options(&dir)).load(ConfigStore::new()).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert!(path.ends_with("cache.toml")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_primary_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigLoader::new(options(&dir)).load(ConfigStore::new()).unwrap();
        assert!(store.values().is_empty());
    }

    #[test]
    fn test_missing_explicit_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(&dir).with_file(dir.path().join("custom.toml"));
        let err = ConfigLoader::new(opts).load(ConfigStore::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_explicit_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "custom.json", r#"{"app": {"name": "custom"}}"#);
        write(&dir, "application.toml", "[app]\nname = \"ignored\"\nowner = \"ops\"");
        write(&dir, "region.toml", "[app]\nregion = \"eu\"");
        let opts = options(&dir).with_file(dir.path().join("custom.json"));

        let store = ConfigLoader::new(opts).load(ConfigStore::new()).unwrap();
        assert_eq!(store.get_str("app.name").as_deref(), Some("custom"));
        assert_eq!(store.get_str("app.region").as_deref(), Some("eu"));
        assert!(!store.contains("app.owner"));
    }

    #[test]
    fn test_explicit_file_wins_over_application_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        write(&other, "prod.json", r#"{"server": {"port": 443}}"#);
        write(&dir, "application.toml", "[server]\nport = 8080\nhost = \"local\"");
        let opts = options(&dir).with_file(other.path().join("prod.json"));

        let store = ConfigLoader::new(opts).load(ConfigStore::new()).unwrap();
        assert_eq!(store.get::<i64>("server.port").unwrap(), Some(443));
        assert!(!store.contains("server.host"));
    }

    #[test]
    fn test_explicit_file_in_search_path_is_merged_once() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "base.toml", "[server]\nport = 1000");
        write(&dir, "zone.toml", "[server]\nport = 2000\nzone = \"eu\"");
        let opts = options(&dir).with_file(dir.path().join("zone.toml"));

        let store = ConfigLoader::new(opts).load(ConfigStore::new()).unwrap();
        assert_eq!(store.get::<i64>("server.port").unwrap(), Some(1000));
        assert_eq!(store.get_str("server.zone").as_deref(), Some("eu"));
    }

    #[test]
    fn test_env_selects_profile_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "application.toml", "[app.log]\nlevel = \"info\"");
        write(&dir, "application-prod.toml", "[server]\nport = 80");
        let opts = env_options(
            &dir,
            &[("KT_PROFILES_ACTIVE", "prod"), ("KT_APP_LOG_LEVEL", "debug")],
        );

        let store = ConfigLoader::new(opts).load(ConfigStore::new()).unwrap();
        assert_eq!(store.get::<i64>("server.port").unwrap(), Some(80));
        assert_eq!(store.get_str("app.log.level").as_deref(), Some("debug"));
    }

    #[test]
    fn test_unreadable_search_path_policy() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        let opts = options(&dir).with_search_path(&missing);
        let err = ConfigLoader::new(opts).load(ConfigStore::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ReadDir { .. }));

        let opts = options(&dir).with_auxiliary_path(&missing);
        assert!(ConfigLoader::new(opts).load(ConfigStore::new()).is_ok());
    }

    #[test]
    fn test_file_type_restricts_discovery() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "application.json", r#"{"a": 1}"#);
        write(&dir, "application.toml", "a = 2");

        let opts = options(&dir).with_file_type(FileType::Json);
        let store = ConfigLoader::new(opts).load(ConfigStore::new()).unwrap();
        assert_eq!(store.get::<i64>("a").unwrap(), Some(1));
    }
}
