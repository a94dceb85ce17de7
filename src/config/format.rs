//! Supported configuration serialization formats.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A configuration file format, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Toml,
    Json,
}

impl FileType {
    /// All supported formats, reference format first.
    pub const ALL: [FileType; 2] = [FileType::Toml, FileType::Json];

    /// Returns the extension (without dot) for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Toml => "toml",
            FileType::Json => "json",
        }
    }

    /// Resolve a format from a file extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.extension().eq_ignore_ascii_case(ext))
    }

    /// Parse a document into a key/value tree.
    ///
    /// The document root must be a table; the error is a human-readable reason.
    pub fn parse(&self, content: &str) -> Result<toml::Table, String> {
        match self {
            FileType::Toml => content.parse::<toml::Table>().map_err(|e| e.to_string()),
            FileType::Json => {
                let mut value: serde_json::Value =
                    serde_json::from_str(content).map_err(|e| e.to_string())?;
                drop_nulls(&mut value);
                serde_json::from_value::<toml::Table>(value).map_err(|e| e.to_string())
            }
        }
    }
}

/// TOML has no null; a JSON null reads as an absent key.
fn drop_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(drop_nulls);
        }
        serde_json::Value::Array(items) => {
            items.retain(|v| !v.is_null());
            items.iter_mut().for_each(drop_nulls);
        }
        _ => {}
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s.trim()).ok_or_else(|| ConfigError::UnsupportedType(s.to_string()))
    }
}
