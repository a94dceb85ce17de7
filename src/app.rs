//! Application identity and the root context shared by every unit.

use std::fmt;
use std::sync::OnceLock;

use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ConfigStore, KEY_APP_NAME, KEY_APP_TIMEZONE, KEY_PROFILES_ACTIVE};
use crate::error::{BootError, BootResult};

pub const DEFAULT_APP_NAME: &str = "app";
pub const DEFAULT_APP_TIMEZONE: Tz = Tz::UTC;

/// Display name and default timezone of the application being booted.
///
/// Both can be overridden by `app.name` and `app.timezone`; the timezone
/// must be an IANA name such as `Europe/Berlin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    name: String,
    timezone: Tz,
}

impl Application {
    /// An application named `name`, in UTC.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timezone: DEFAULT_APP_TIMEZONE,
        }
    }

    /// Default timezone, used unless `app.timezone` is set.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default timezone for units that deal in local time.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Apply configured overrides. An unknown timezone is boot-fatal.
    pub(crate) fn resolve(&self, config: &ConfigStore) -> BootResult<Self> {
        let timezone = match config
            .get_str(KEY_APP_TIMEZONE)
            .map(|tz| tz.trim().to_string())
            .filter(|tz| !tz.is_empty())
        {
            Some(tz) => tz
                .parse::<Tz>()
                .map_err(|_| BootError::InvalidTimezone(tz))?,
            None => self.timezone,
        };
        Ok(Self {
            name: config
                .get_str(KEY_APP_NAME)
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| self.name.clone()),
            timezone,
        })
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new(DEFAULT_APP_NAME)
    }
}

/// Process-wide root: configuration, root lifetime and active profile.
///
/// Built once configuration is loaded and shared by `Arc` with every unit.
/// Read-only apart from the shutdown trigger.
pub struct AppContext {
    application: Application,
    config: ConfigStore,
    profile: String,
    token: CancellationToken,
    reason: OnceLock<String>,
}

impl AppContext {
    /// Root context over loaded configuration; the profile comes from `profiles.active`.
    pub fn new(application: Application, config: ConfigStore, token: CancellationToken) -> Self {
        let profile = config
            .get_str(KEY_PROFILES_ACTIVE)
            .map(|p| p.trim().to_string())
            .unwrap_or_default();
        Self {
            application,
            config,
            profile,
            token,
            reason: OnceLock::new(),
        }
    }

    /// Resolved application identity.
    pub fn application(&self) -> &Application {
        &self.application
    }

    /// The merged configuration store.
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Active profile; empty when none is selected.
    pub fn active_profile(&self) -> &str {
        &self.profile
    }

    /// Root lifetime. Cancelled when shutdown begins.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the root lifetime. The first reason is kept.
    pub fn shutdown(&self, reason: impl fmt::Display) {
        let reason = reason.to_string();
        info!(reason = %reason, "Shutdown requested");
        if let Err(reason) = self.reason.set(reason) {
            debug!(reason = %reason, "Shutdown already in progress");
        }
        self.token.cancel();
    }

    /// Reason given by the first shutdown request, if any.
    pub fn shutdown_reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Whether the root lifetime has been cancelled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("application", &self.application)
            .field("profile", &self.profile)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_resolve() {
        let mut config = ConfigStore::new();
        config.merge("[app]\nname = \"orders\"".parse().unwrap());

        let app = Application::new("demo").with_timezone(Tz::Asia__Shanghai);
        let resolved = app.resolve(&config).unwrap();
        assert_eq!(resolved.name(), "orders");
        assert_eq!(resolved.timezone(), Tz::Asia__Shanghai);
    }

    #[test]
    fn test_application_timezone_from_config() {
        let mut config = ConfigStore::new();
        config.merge("[app]\ntimezone = \" Europe/Berlin \"".parse().unwrap());
        let resolved = Application::default().resolve(&config).unwrap();
        assert_eq!(resolved.timezone(), Tz::Europe__Berlin);
        assert_eq!(resolved.name(), DEFAULT_APP_NAME);
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let mut config = ConfigStore::new();
        config.merge("[app]\ntimezone = \"Not/AZone\"".parse().unwrap());
        let err = Application::default().resolve(&config).unwrap_err();
        assert!(matches!(err, BootError::InvalidTimezone(tz) if tz == "Not/AZone"));
    }

    #[test]
    fn test_first_shutdown_reason_wins() {
        let mut config = ConfigStore::new();
        config.merge("[profiles]\nactive = \" prod \"".parse().unwrap());
        let ctx = AppContext::new(Application::default(), config, CancellationToken::new());
        assert_eq!(ctx.active_profile(), "prod");
        assert!(!ctx.is_shutting_down());

        ctx.shutdown("system signal: SIGTERM");
        ctx.shutdown("second");
        assert!(ctx.is_shutting_down());
        assert_eq!(ctx.shutdown_reason(), Some("system signal: SIGTERM"));
    }
}
