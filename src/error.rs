//! Error types for unitboot.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error produced by unit initializers and run futures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Root error type for a bootstrap sequence.
///
/// Every variant is boot-fatal: it aborts the sequence before any unit runs.
#[derive(Error, Debug)]
pub enum BootError {
    /// Registry-related errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration loading errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The configured log level could not be parsed
    #[error("Invalid app.log.level: {0}")]
    InvalidLogLevel(String),

    /// The configured timezone is not a known IANA name
    #[error("Invalid app.timezone: {0}")]
    InvalidTimezone(String),

    /// A unit initializer returned an error
    #[error("Unit '{unit}' init failed: {source}")]
    InitFailed {
        unit: String,
        #[source]
        source: BoxError,
    },

    /// A unit initializer panicked
    #[error("Unit '{unit}' init panicked: {message}")]
    InitPanicked { unit: String, message: String },
}

/// Errors that can occur in registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Unit already registered with this name
    #[error("Unit already registered: {0}")]
    AlreadyRegistered(String),

    /// Empty or blank unit name
    #[error("Invalid unit name: {0:?}")]
    InvalidName(String),

    /// A unit depends on a name nobody registered
    #[error("Unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    /// The dependency graph has at least one cycle
    #[error("Dependency cycle between units: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
}

/// Errors that can occur while discovering, merging or decoding configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A search directory could not be listed
    #[error("Failed to read config directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config file could not be read
    #[error("Failed to read config file {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config file has malformed content
    #[error("Malformed config file {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    /// The in-memory seed configuration is malformed
    #[error("Invalid in-memory config: {0}")]
    InvalidSeed(String),

    /// The file extension or configured type is not a supported format
    #[error("Unsupported config type: {0}")]
    UnsupportedType(String),

    /// A subsection could not be decoded into the target type
    #[error("Failed to decode [{key}] config: {source}")]
    Decode {
        key: String,
        #[source]
        source: toml::de::Error,
    },

    /// A decoded subsection failed validation
    #[error("Invalid [{key}] config: {reason}")]
    Invalid { key: String, reason: String },
}

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for bootstrap operations.
pub type BootResult<T> = Result<T, BootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_context() {
        let err = RegistryError::UnknownDependency {
            unit: "web".into(),
            dependency: "db".into(),
        };
        assert_eq!(err.to_string(), "Unit 'web' depends on unknown unit 'db'");

        let err = RegistryError::DependencyCycle(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Dependency cycle between units: a, b");

        let err = ConfigError::Parse {
            path: PathBuf::from("config/application.toml"),
            reason: "expected `=`".into(),
        };
        assert!(err.to_string().contains("config/application.toml"));
    }

    #[test]
    fn test_boot_error_from_registry() {
        let err: BootError = RegistryError::AlreadyRegistered("db".into()).into();
        assert!(matches!(err, BootError::Registry(RegistryError::AlreadyRegistered(_))));
    }
}
