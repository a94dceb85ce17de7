//! Prelude module for convenient imports.
//!
//! # Example
//!
//! ```rust
//! use unitboot::prelude::*;
//! ```

// Boot
pub use crate::app::{AppContext, Application};
pub use crate::bootstrap::{BootOptions, Bootstrap};
pub use crate::executor::{BootReport, UnitExit};

// Units
pub use crate::registry::UnitRegistry;
pub use crate::unit::{ExitResult, Initializer, Runner, UnitContext, UnitSpec};

// Configuration
pub use crate::config::{ConfigOptions, ConfigStore, FileType, Validate};

// Events
pub use crate::events::{EventStream, LifecycleEvent};

// Errors
pub use crate::error::{BootError, BootResult, BoxError, ConfigError, RegistryError};

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
