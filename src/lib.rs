//! # Unitboot
//!
//! **Unitboot** boots an in-process application made of named *units*
//! (database pools, HTTP listeners, consumers...), each with an init step
//! and a run step, on top of layered configuration.
//!
//! ## Overview
//!
//! - **Dependency order**: units declare what they depend on and initialize
//!   in topological order
//! - **Fail fast**: any init error aborts the boot before a single runner starts
//! - **Fault isolation**: a panicking runner is recorded, siblings keep running
//! - **Ordered shutdown**: units stop one at a time, in reverse init order
//! - **Layered configuration**: seed, primary file, default files,
//!   profile files, environment overlay
//!
//! ## Lifecycle
//!
//! ```text
//! register → order → load config → init (sequential) → run (concurrent)
//!                                                           ↓
//!          report ← stop (reverse, bounded) ← root cancelled / signal / shutdown()
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use unitboot::prelude::*;
//!
//! let mut boot = Bootstrap::new(Application::new("orders"));
//! boot.register(UnitSpec::new("db", |ctx| async move {
//!     let db: DbConfig = ctx.decode_config("db")?;
//!     let pool = connect(&db).await?;
//!     Ok(Runner::new(async move {
//!         ctx.cancelled().await;
//!         pool.close().await.into()
//!     }))
//! }))?;
//!
//! let report = boot.run(CancellationToken::new()).await?;
//! ```

mod app;
mod bootstrap;
pub mod config;
mod error;
pub mod events;
mod executor;
mod logging;
mod registry;
mod signals;
mod unit;

pub mod prelude;

pub use app::{AppContext, Application, DEFAULT_APP_NAME, DEFAULT_APP_TIMEZONE};
pub use bootstrap::{BootOptions, Bootstrap, DEFAULT_SHUTDOWN_TIMEOUT};
pub use config::{ConfigLoader, ConfigOptions, ConfigStore, EnvOverlay, FileType, Validate};
pub use error::{
    BootError, BootResult, BoxError, ConfigError, ConfigResult, RegistryError, RegistryResult,
};
pub use events::{EventStream, LifecycleEvent};
pub use executor::{BootReport, UnitExit};
pub use logging::{init_logging, parse_level, LogHandle};
pub use registry::UnitRegistry;
pub use unit::{
    ExitResult, Initializer, Runner, UnitContext, UnitSpec, EXIT_ABANDONED, EXIT_PANICKED,
};

// Re-export async-trait for convenience
pub use async_trait::async_trait;
pub use chrono_tz::Tz;
