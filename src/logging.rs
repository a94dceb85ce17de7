//! Console logging with a level that can change once configuration is loaded.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, Registry};

use crate::error::{BootError, BootResult};

/// Handle to the subscriber installed by [`init_logging`].
#[derive(Debug, Clone)]
pub struct LogHandle {
    handle: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    /// Current maximum level.
    pub fn level(&self) -> Option<LevelFilter> {
        self.handle.with_current(|level| *level).ok()
    }

    /// Replace the maximum level. Returns whether the level changed.
    pub fn set_level(&self, level: LevelFilter) -> bool {
        if self.level() == Some(level) {
            return false;
        }
        self.handle.reload(level).is_ok()
    }
}

/// Install a global fmt subscriber at `level`.
///
/// Returns `None` when a global subscriber already exists, in which case
/// the host application owns logging.
pub fn init_logging(level: LevelFilter) -> Option<LogHandle> {
    let (filter, handle) = reload::Layer::new(level);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .ok()?;
    Some(LogHandle { handle })
}

/// Parse a level name such as `info` or `WARN`.
///
/// `fatal`, `panic` and `dpanic` map to `error`.
pub fn parse_level(name: &str) -> BootResult<LevelFilter> {
    let trimmed = name.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "fatal" | "panic" | "dpanic" => Ok(LevelFilter::ERROR),
        lower => lower
            .parse()
            .map_err(|_| BootError::InvalidLogLevel(name.to_string())),
    }
}
