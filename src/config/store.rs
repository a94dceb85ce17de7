//! The merged configuration store.
//!
//! Values live in a single tree keyed by dotted paths. Lookups consult, in
//! order: the environment overlay (when enabled), merged file values, then
//! registered defaults.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use toml::{Table, Value};

use crate::config::Validate;
use crate::error::{ConfigError, ConfigResult};

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment-variable overlay.
///
/// Key `a.b.c` maps to variable `A_B_C`, or `PREFIX_A_B_C` with a prefix.
/// Consulted on every read, never materialized into the tree.
#[derive(Clone)]
pub struct EnvOverlay {
    prefix: Option<String>,
    lookup: Lookup,
}

impl EnvOverlay {
    /// Overlay backed by the process environment.
    pub fn from_process(prefix: Option<&str>) -> Self {
        Self::with_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Overlay backed by an arbitrary lookup function.
    pub fn with_lookup<F>(prefix: Option<&str>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let prefix = prefix
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.to_ascii_uppercase());
        Self {
            prefix,
            lookup: Arc::new(lookup),
        }
    }

    /// Environment variable name for a dotted key.
    pub fn var_name(&self, key: &str) -> String {
        let name = key.replace('.', "_").to_ascii_uppercase();
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{name}"),
            None => name,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(&self.var_name(key))
    }
}

impl fmt::Debug for EnvOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvOverlay")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Mutable during config loading, read-only once shared with units.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    defaults: Table,
    values: Table,
    env: Option<EnvOverlay>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the environment overlay.
    pub fn with_env(mut self, env: EnvOverlay) -> Self {
        self.env = Some(env);
        self
    }

    pub fn env(&self) -> Option<&EnvOverlay> {
        self.env.as_ref()
    }

    /// Register a fallback for `key`, used when no source provides a value.
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) {
        insert_path(&mut self.defaults, key, value.into());
    }

    /// Deep-merge `overlay` over the current values.
    ///
    /// Nested tables merge key by key; scalars and arrays are replaced.
    pub fn merge(&mut self, overlay: Table) {
        deep_merge(&mut self.values, overlay);
    }

    /// Resolve `key` through env overlay, values, then defaults.
    pub fn value(&self, key: &str) -> Option<Value> {
        let stored = get_path(&self.values, key).or_else(|| get_path(&self.defaults, key));
        if let Some(raw) = self.env.as_ref().and_then(|env| env.get(key)) {
            return Some(coerce_env(&raw, stored));
        }
        stored.cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    /// Typed lookup; `Ok(None)` when the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<Option<T>> {
        match self.value(key) {
            Some(value) => value
                .try_into()
                .map(Some)
                .map_err(|source| ConfigError::Decode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// String view of a scalar value.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.value(key)? {
            Value::String(s) => Some(s),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Datetime(d) => Some(d.to_string()),
            Value::Array(_) | Value::Table(_) => None,
        }
    }

    /// The subsection under `key` with defaults applied and every leaf
    /// passed through the env overlay. `None` when nothing is stored there.
    pub fn section(&self, key: &str) -> Option<Table> {
        let mut merged = match get_path(&self.defaults, key) {
            Some(Value::Table(t)) => t.clone(),
            _ => Table::new(),
        };
        let stored = get_path(&self.values, key);
        match stored {
            Some(Value::Table(t)) => deep_merge(&mut merged, t.clone()),
            Some(_) => return None,
            None if merged.is_empty() => return None,
            None => {}
        }
        if let Some(env) = &self.env {
            overlay_env(&mut merged, key, env);
        }
        Some(merged)
    }

    /// Decode the subsection under `key` into `T`, then validate it.
    ///
    /// An absent subsection decodes from an empty table, so `T`'s serde
    /// defaults apply.
    pub fn decode<T>(&self, key: &str) -> ConfigResult<T>
    where
        T: DeserializeOwned + Validate,
    {
        let table = self.section(key).unwrap_or_default();
        let decoded: T = Value::Table(table)
            .try_into()
            .map_err(|source| ConfigError::Decode {
                key: key.to_string(),
                source,
            })?;
        decoded.validate().map_err(|reason| ConfigError::Invalid {
            key: key.to_string(),
            reason,
        })?;
        Ok(decoded)
    }

    /// Merged file values, without defaults or env overlay.
    pub fn values(&self) -> &Table {
        &self.values
    }
}

fn deep_merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        if let Value::Table(incoming) = value {
            if let Some(Value::Table(existing)) = base.get_mut(&key) {
                deep_merge(existing, incoming);
                continue;
            }
            base.insert(key, Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

fn get_path<'a>(table: &'a Table, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = table.get(parts.next()?)?;
    for part in parts {
        current = current.as_table()?.get(part)?;
    }
    Some(current)
}

fn insert_path(table: &mut Table, key: &str, value: Value) {
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };
    let mut current = table;
    for part in parts {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        let Value::Table(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

fn overlay_env(table: &mut Table, prefix: &str, env: &EnvOverlay) {
    for (name, value) in table.iter_mut() {
        let key = format!("{prefix}.{name}");
        if let Value::Table(nested) = value {
            overlay_env(nested, &key, env);
        } else if let Some(raw) = env.get(&key) {
            *value = coerce_env(&raw, Some(value));
        }
    }
}

/// Convert an env string to the type of the value it overrides, or infer one.
fn coerce_env(raw: &str, existing: Option<&Value>) -> Value {
    let trimmed = raw.trim();
    match existing {
        Some(Value::String(_)) => Value::String(raw.to_string()),
        Some(Value::Integer(_)) => trimmed
            .parse()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some(Value::Float(_)) => trimmed
            .parse()
            .map(Value::Float)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some(Value::Boolean(_)) => trimmed
            .parse()
            .map(Value::Boolean)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some(Value::Array(items)) => {
            let template = items.first();
            Value::Array(
                trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| coerce_env(s, template))
                    .collect(),
            )
        }
        Some(Value::Datetime(_)) | Some(Value::Table(_)) | None => infer_env(raw),
    }
}

fn infer_env(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(b) = trimmed.parse::<bool>() {
        Value::Boolean(b)
    } else if let Ok(i) = trimmed.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::String(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    fn table(src: &str) -> Table {
        src.parse().unwrap()
    }

    fn env(prefix: &str, vars: &[(&str, &str)]) -> EnvOverlay {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvOverlay::with_lookup(Some(prefix), move |name| vars.get(name).cloned())
    }

    #[derive(Debug, Deserialize)]
    struct ServerConfig {
        #[serde(default = "default_host")]
        host: String,
        port: u16,
        #[serde(default)]
        tags: Vec<String>,
    }

    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    impl Validate for ServerConfig {
        fn validate(&self) -> Result<(), String> {
            if self.port == 0 {
                Err("port must be greater than 0".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_deep_merge_later_wins() {
        let mut store = ConfigStore::new();
        store.merge(table("[app]\nname = \"a\"\nlevel = \"info\"\n[db]\nurl = \"x\""));
        store.merge(table("[app]\nlevel = \"warn\"\ntags = [1]"));
        store.merge(table("[app]\ntags = [2, 3]"));

        assert_eq!(store.get_str("app.name").as_deref(), Some("a"));
        assert_eq!(store.get_str("app.level").as_deref(), Some("warn"));
        assert_eq!(store.get::<Vec<i64>>("app.tags").unwrap(), Some(vec![2, 3]));
        assert_eq!(store.get_str("db.url").as_deref(), Some("x"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let src = table("[app]\nname = \"a\"\n[app.log]\nlevel = \"info\"");
        let mut once = ConfigStore::new();
        once.merge(src.clone());
        let mut twice = ConfigStore::new();
        twice.merge(src.clone());
        twice.merge(src);
        assert_eq!(once.values(), twice.values());
    }

    #[test]
    fn test_defaults_fall_through() {
        let mut store = ConfigStore::new();
        store.set_default("app.log.level", "debug");
        store.set_default("app.name", "demo");
        assert_eq!(store.get_str("app.log.level").as_deref(), Some("debug"));

        store.merge(table("[app.log]\nlevel = \"info\""));
        assert_eq!(store.get_str("app.log.level").as_deref(), Some("info"));
        assert_eq!(store.get_str("app.name").as_deref(), Some("demo"));
        assert!(!store.contains("app.missing"));
    }

    #[test]
    fn test_env_overlay_wins() {
        let mut store = ConfigStore::new().with_env(env("KT", &[("KT_APP_LOG_LEVEL", "debug")]));
        store.merge(table("[app.log]\nlevel = \"info\""));
        assert_eq!(store.get_str("app.log.level").as_deref(), Some("debug"));
        assert_eq!(store.env().unwrap().var_name("app.log.level"), "KT_APP_LOG_LEVEL");
    }

    #[test]
    fn test_env_overlay_without_prefix() {
        let store = ConfigStore::new().with_env(env("  ", &[("PROFILES_ACTIVE", "prod")]));
        assert_eq!(store.get_str("profiles.active").as_deref(), Some("prod"));
    }

    #[test]
    fn test_env_coercion_follows_file_type() {
        let overlay = env(
            "T",
            &[
                ("T_SERVER_PORT", "9090"),
                ("T_SERVER_NAME", "42"),
                ("T_SERVER_TAGS", "a, b"),
                ("T_SERVER_DEBUG", "true"),
            ],
        );
        let mut store = ConfigStore::new().with_env(overlay);
        store.merge(table(
            "[server]\nport = 8080\nname = \"n\"\ntags = [\"x\"]",
        ));

        assert_eq!(store.get::<u16>("server.port").unwrap(), Some(9090));
        assert_eq!(store.get::<String>("server.name").unwrap().as_deref(), Some("42"));
        assert_eq!(
            store.get::<Vec<String>>("server.tags").unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(store.get::<bool>("server.debug").unwrap(), Some(true));
    }

    #[test]
    fn test_decode_section_with_env_and_defaults() {
        let overlay = env("KT", &[("KT_SERVER_PORT", "9000")]);
        let mut store = ConfigStore::new().with_env(overlay);
        store.merge(table("[server]\nport = 8080"));

        let cfg: ServerConfig = store.decode("server").unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "127.0.0.1");
        assert!(cfg.tags.is_empty());
    }

    #[test]
    fn test_decode_errors_name_the_key() {
        let mut store = ConfigStore::new();
        store.merge(table("[server]\nport = \"nope\"\n[zero]\nport = 0"));

        match store.decode::<ServerConfig>("server") {
            Err(ConfigError::Decode { key, .. }) => assert_eq!(key, "server"),
            other => panic!("unexpected: {other:?}"),
        }
        match store.decode::<ServerConfig>("zero") {
            Err(ConfigError::Invalid { key, reason }) => {
                assert_eq!(key, "zero");
                assert!(reason.contains("port"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // absent section: port has no default
        assert!(store.decode::<ServerConfig>("absent").is_err());
    }
}
