//! Config file discovery by naming convention.
//!
//! A file participates when its name is `<base>.<ext>` (the default file for
//! `base`) or `<base><sep><profile>.<ext>` with `sep` one of `.`, `-`, `_`.
//! `base` must start with a letter; `ext` must be one of the enabled formats.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::config::format::FileType;
use crate::error::{ConfigError, ConfigResult};

/// How an unreadable search directory is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirPolicy {
    /// Explicitly configured directory: listing failure aborts the scan.
    FailFast,
    /// Opportunistic directory: listing failure is logged and yields nothing.
    SkipWithWarning,
}

/// A search directory together with its failure policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    pub dir: PathBuf,
    pub policy: DirPolicy,
}

impl SearchPath {
    /// An explicitly configured directory.
    pub fn required(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            policy: DirPolicy::FailFast,
        }
    }

    /// An auxiliary directory that may be absent.
    pub fn auxiliary(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            policy: DirPolicy::SkipWithWarning,
        }
    }
}

/// A discovered config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub file_name: String,
    pub path: PathBuf,
    pub base_name: String,
    /// Raw profile tag; empty for the default file.
    pub profile: String,
    pub file_type: FileType,
}

impl ConfigFile {
    pub fn is_default(&self) -> bool {
        self.profile.is_empty()
    }

    /// Case-insensitive comparison against an active profile.
    pub fn matches_profile(&self, profile: &str) -> bool {
        !self.profile.is_empty() && self.profile.eq_ignore_ascii_case(profile)
    }
}

/// All files sharing one base name: a default file and profile variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigItem {
    pub name: String,
    pub default: Option<ConfigFile>,
    pub profiles: Vec<ConfigFile>,
}

impl ConfigItem {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default: None,
            profiles: Vec::new(),
        }
    }

    /// Profile files whose tag matches `profile`, in discovery order.
    pub fn profile_files<'a>(&'a self, profile: &'a str) -> impl Iterator<Item = &'a ConfigFile> {
        self.profiles.iter().filter(move |f| f.matches_profile(profile))
    }
}

/// The config items found in one directory, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigCatalog {
    pub dir: PathBuf,
    items: Vec<ConfigItem>,
}

impl ConfigCatalog {
    fn empty(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            items: Vec::new(),
        }
    }

    /// Get an item by base name.
    pub fn get(&self, name: &str) -> Option<&ConfigItem> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn items(&self) -> &[ConfigItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn insert(&mut self, file: ConfigFile) {
        let idx = match self.items.iter().position(|i| i.name == file.base_name) {
            Some(idx) => idx,
            None => {
                self.items.push(ConfigItem::new(&file.base_name));
                self.items.len() - 1
            }
        };
        let item = &mut self.items[idx];
        if file.is_default() {
            item.default = Some(file);
        } else {
            item.profiles.push(file);
        }
    }
}

/// Scans directories for config files of the enabled formats.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    pattern: Regex,
    base_name: Option<String>,
}

impl ConfigLocator {
    /// Create a locator accepting the given formats.
    pub fn new(types: &[FileType]) -> ConfigResult<Self> {
        if types.is_empty() {
            return Err(ConfigError::UnsupportedType("no config type enabled".into()));
        }
        let exts = types
            .iter()
            .map(|t| regex::escape(t.extension()))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(
            r"^([a-zA-Z]+[a-zA-Z0-9]*)[_.\-]?([a-zA-Z0-9]*)\.({exts})$"
        ))
        .map_err(|e| ConfigError::UnsupportedType(e.to_string()))?;
        Ok(Self {
            pattern,
            base_name: None,
        })
    }

    /// Only report files for this base name.
    pub fn with_base_name(mut self, name: impl Into<String>) -> Self {
        self.base_name = Some(name.into());
        self
    }

    /// Match a single file name.
    pub fn parse_file_name(&self, file_name: &str, dir: &Path) -> Option<ConfigFile> {
        let caps = self.pattern.captures(file_name)?;
        let base_name = caps.get(1)?.as_str();
        if let Some(only) = &self.base_name {
            if only != base_name {
                return None;
            }
        }
        let file_type = FileType::from_extension(caps.get(3)?.as_str())?;
        Some(ConfigFile {
            file_name: file_name.to_string(),
            path: dir.join(file_name),
            base_name: base_name.to_string(),
            profile: caps.get(2).map(|m| m.as_str()).unwrap_or_default().to_string(),
            file_type,
        })
    }

    /// Scan one directory. File names are visited in sorted order.
    pub fn locate(&self, search: &SearchPath) -> ConfigResult<ConfigCatalog> {
        let dir = search.dir.as_path();
        debug!(dir = %dir.display(), "Searching for config files");

        let mut names = match read_file_names(dir) {
            Ok(names) => names,
            Err(source) => match search.policy {
                DirPolicy::FailFast => {
                    return Err(ConfigError::ReadDir {
                        path: dir.to_path_buf(),
                        source,
                    })
                }
                DirPolicy::SkipWithWarning => {
                    warn!(dir = %dir.display(), error = %source, "Skipping unreadable config directory");
                    return Ok(ConfigCatalog::empty(dir));
                }
            },
        };
        names.sort();

        let mut catalog = ConfigCatalog::empty(dir);
        for name in names {
            if let Some(file) = self.parse_file_name(&name, dir) {
                catalog.insert(file);
            }
        }
        Ok(catalog)
    }

    /// Scan several directories, one catalog per directory, in order.
    pub fn locate_all(&self, searches: &[SearchPath]) -> ConfigResult<Vec<ConfigCatalog>> {
        searches.iter().map(|s| self.locate(s)).collect()
    }
}

fn read_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}
