//! Boot entry point: register units, load configuration, run the lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info};

use crate::app::{AppContext, Application};
use crate::config::{
    ConfigLoader, ConfigOptions, ConfigStore, DEFAULT_LOG_LEVEL, KEY_APP_LOG_LEVEL, KEY_APP_NAME,
    KEY_APP_TIMEZONE,
};
use crate::error::{BootResult, RegistryResult};
use crate::events::{event_channel, EventSender, EventStream, LifecycleEvent, DEFAULT_EVENT_BUFFER};
use crate::executor::{BootReport, Executor};
use crate::logging::{init_logging, parse_level};
use crate::registry::UnitRegistry;
use crate::unit::UnitSpec;

/// Default time a unit gets to return after being cancelled.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

const BANNER: &str = r"
  _   _       _ _   ____              _
 | | | |_ __ (_) |_| __ )  ___   ___ | |_
 | | | | '_ \| | __|  _ \ / _ \ / _ \| __|
 | |_| | | | | | |_| |_) | (_) | (_) | |_
  \___/|_| |_|_|\__|____/ \___/ \___/ \__|
";

/// Options for a boot.
#[derive(Debug, Clone)]
pub struct BootOptions {
    /// Skip printing the startup banner.
    pub hide_banner: bool,
    /// How configuration is located and layered.
    pub config: ConfigOptions,
    /// Turn SIGHUP/SIGINT/SIGTERM/SIGQUIT into shutdown.
    pub trap_signals: bool,
    /// Install a global fmt subscriber when none exists.
    pub install_logger: bool,
    /// Per-unit shutdown deadline; `None` waits forever.
    pub shutdown_timeout: Option<Duration>,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            hide_banner: false,
            config: ConfigOptions::default(),
            trap_signals: true,
            install_logger: true,
            shutdown_timeout: Some(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }
}

impl BootOptions {
    /// Options with every default applied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not print the startup banner.
    pub fn hide_banner(mut self) -> Self {
        self.hide_banner = true;
        self
    }

    /// Replace the configuration sources.
    pub fn with_config(mut self, config: ConfigOptions) -> Self {
        self.config = config;
        self
    }

    /// Leave process signals alone; shutdown must come from a unit or the root token.
    pub fn without_signals(mut self) -> Self {
        self.trap_signals = false;
        self
    }

    /// Leave logging to the host application.
    pub fn without_logger(mut self) -> Self {
        self.install_logger = false;
        self
    }

    /// Per-unit shutdown deadline; `None` waits forever.
    pub fn with_shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Boots an application made of units.
///
/// # Example
///
/// ```rust,no_run
/// use tokio_util::sync::CancellationToken;
/// use unitboot::{Application, Bootstrap, ExitResult, Runner, UnitSpec};
///
/// # async fn boot() -> Result<(), unitboot::BootError> {
/// let mut boot = Bootstrap::new(Application::new("orders"));
/// boot.register(UnitSpec::new("db", |_| async { Ok(Runner::idle()) }))?;
/// boot.register(
///     UnitSpec::new("web", |ctx| async move {
///         Ok(Runner::new(async move {
///             ctx.cancelled().await;
///             ExitResult::success()
///         }))
///     })
///     .depends_on(["db"]),
/// )?;
///
/// let report = boot.run(CancellationToken::new()).await?;
/// println!("stopped for {:?}", report.reason);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Bootstrap {
    application: Application,
    options: BootOptions,
    registry: UnitRegistry,
    events: Option<EventSender<LifecycleEvent>>,
}

impl Bootstrap {
    /// A boot for `application` with default options and no units.
    pub fn new(application: Application) -> Self {
        Self {
            application,
            options: BootOptions::default(),
            registry: UnitRegistry::new(),
            events: None,
        }
    }

    /// Replace the boot options.
    pub fn with_options(mut self, options: BootOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a unit. Must happen before [`Bootstrap::run`].
    pub fn register(&mut self, spec: UnitSpec) -> RegistryResult<()> {
        self.registry.register(spec)
    }

    /// Units registered so far.
    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// Subscribe to lifecycle events. A later call replaces the earlier stream.
    pub fn events(&mut self) -> EventStream<LifecycleEvent> {
        let (sender, stream) = event_channel(DEFAULT_EVENT_BUFFER);
        self.events = Some(sender);
        stream
    }

    /// Load configuration and run every unit until `root` is cancelled or
    /// shutdown is requested.
    ///
    /// Returns an error if ordering, configuration or any unit's init fails;
    /// in that case no runner is started.
    pub async fn run(self, root: CancellationToken) -> BootResult<BootReport> {
        let result = self.boot(root).await;
        if let Err(e) = &result {
            error!(error = %e, "Boot failed");
        }
        result
    }

    async fn boot(self, root: CancellationToken) -> BootResult<BootReport> {
        let Self {
            application,
            options,
            registry,
            events,
        } = self;

        if !options.hide_banner {
            println!("{BANNER}");
        }
        let log = options
            .install_logger
            .then(|| init_logging(LevelFilter::DEBUG))
            .flatten();

        let units = registry.into_ordered()?;
        debug!(
            order = ?units.iter().map(UnitSpec::name).collect::<Vec<_>>(),
            "Resolved unit order"
        );

        let mut defaults = ConfigStore::new();
        defaults.set_default(KEY_APP_NAME, application.name());
        defaults.set_default(KEY_APP_TIMEZONE, application.timezone().name());
        defaults.set_default(KEY_APP_LOG_LEVEL, DEFAULT_LOG_LEVEL);
        let config = ConfigLoader::new(options.config).load(defaults)?;

        let level_name = config
            .get_str(KEY_APP_LOG_LEVEL)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let level = parse_level(&level_name)?;
        if let Some(log) = &log {
            if log.set_level(level) {
                info!(level = %level, "Log level reconfigured");
            }
        }

        let application = application.resolve(&config)?;
        let app = Arc::new(AppContext::new(application, config, root.child_token()));
        info!(
            app = app.application().name(),
            timezone = %app.application().timezone(),
            profile = app.active_profile(),
            units = units.len(),
            "Booting"
        );

        Executor::new(app)
            .with_events(events)
            .with_shutdown_timeout(options.shutdown_timeout)
            .with_signals(options.trap_signals)
            .run(units)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BootError, RegistryError};
    use crate::unit::Runner;

    fn quiet() -> BootOptions {
        BootOptions::new()
            .hide_banner()
            .without_signals()
            .without_logger()
            .with_config(ConfigOptions::new().without_search_paths())
    }

    #[test]
    fn test_boot_options_defaults() {
        let options = BootOptions::default();
        assert!(!options.hide_banner);
        assert!(options.trap_signals);
        assert!(options.install_logger);
        assert_eq!(options.shutdown_timeout, Some(DEFAULT_SHUTDOWN_TIMEOUT));
    }

    #[tokio::test]
    async fn test_order_error_fails_before_config() {
        let mut boot = Bootstrap::new(Application::default()).with_options(
            quiet().with_config(ConfigOptions::new().with_file("/nonexistent/app.toml")),
        );
        boot.register(UnitSpec::new("web", |_| async { Ok(Runner::idle()) }).depends_on(["db"]))
            .unwrap();

        let err = boot.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            BootError::Registry(RegistryError::UnknownDependency { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_log_level_is_fatal() {
        let boot = Bootstrap::new(Application::default()).with_options(
            quiet().with_config(
                ConfigOptions::new()
                    .without_search_paths()
                    .with_data("[app.log]\nlevel = \"chatty\""),
            ),
        );
        let err = boot.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BootError::InvalidLogLevel(level) if level == "chatty"));
    }

    #[tokio::test]
    async fn test_invalid_timezone_is_fatal() {
        let boot = Bootstrap::new(Application::default()).with_options(
            quiet().with_config(
                ConfigOptions::new()
                    .without_search_paths()
                    .with_env_override(false, None)
                    .with_data("[app]\ntimezone = \"Not/AZone\""),
            ),
        );
        let err = boot.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BootError::InvalidTimezone(tz) if tz == "Not/AZone"));
    }

    #[tokio::test]
    async fn test_empty_boot_returns_immediately() {
        let boot = Bootstrap::new(Application::default()).with_options(quiet());
        let report = boot.run(CancellationToken::new()).await.unwrap();
        assert!(report.exits.is_empty());
        assert!(report.reason.is_none());
    }
}
