//! Settings for a [`Context`](crate::Context).
//!
//! Values set through the builder methods win over environment variables,
//! which win over the defaults.
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `MONITOR_SYNC_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `MONITOR_SYNC_STACK_SIZE` | `usize` | `stack_size` |
//! | `MONITOR_SYNC_DEFAULT_PRIORITY` | `low`/`medium`/`high` | `default_priority` |
//! | `MONITOR_SYNC_SHUTDOWN_TIMEOUT_MS` | `u64` | `shutdown_timeout` |

use core::time::Duration;

use crate::error::{Error, Result};
use crate::thread::Priority;

pub const ENV_THREAD_NAME_PREFIX: &str = "MONITOR_SYNC_THREAD_NAME_PREFIX";
pub const ENV_STACK_SIZE: &str = "MONITOR_SYNC_STACK_SIZE";
pub const ENV_DEFAULT_PRIORITY: &str = "MONITOR_SYNC_DEFAULT_PRIORITY";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "MONITOR_SYNC_SHUTDOWN_TIMEOUT_MS";

const DEFAULT_THREAD_NAME_PREFIX: &str = "monitor-sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Threads are named `<prefix>-<id>`.
    pub thread_name_prefix: String,
    /// Stack size of started threads. `None` uses the standard library's
    /// default.
    pub stack_size: Option<usize>,
    /// Priority given to newly created threads.
    pub default_priority: Priority,
    /// How long [`Context::shutdown`](crate::Context::shutdown) waits for
    /// daemon threads. `None` waits for as long as it takes.
    pub shutdown_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_owned(),
            stack_size: None,
            default_priority: Priority::Medium,
            shutdown_timeout: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// The defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    #[must_use]
    pub fn default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Overwrites the fields whose variable is set. Fails on the first
    /// variable that does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
            self.thread_name_prefix = val;
        }
        if let Some(val) = read_env(ENV_STACK_SIZE) {
            self.stack_size = Some(parse_usize(ENV_STACK_SIZE, &val)?);
        }
        if let Some(val) = read_env(ENV_DEFAULT_PRIORITY) {
            self.default_priority = parse_priority(ENV_DEFAULT_PRIORITY, &val)?;
        }
        if let Some(val) = read_env(ENV_SHUTDOWN_TIMEOUT_MS) {
            let millis = parse_u64(ENV_SHUTDOWN_TIMEOUT_MS, &val)?;
            self.shutdown_timeout = Some(Duration::from_millis(millis));
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(var_name: &'static str, reason: String) -> Error {
    Error::Initialization { what: var_name, reason }
}

fn parse_usize(var_name: &'static str, val: &str) -> Result<usize> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| invalid(var_name, format!("expected unsigned integer, got {val:?} ({e})")))
}

fn parse_u64(var_name: &'static str, val: &str) -> Result<u64> {
    val.trim()
        .parse::<u64>()
        .map_err(|e| invalid(var_name, format!("expected milliseconds, got {val:?} ({e})")))
}

fn parse_priority(var_name: &'static str, val: &str) -> Result<Priority> {
    val.parse::<Priority>()
        .map_err(|_| invalid(var_name, format!("expected low, medium or high, got {val:?}")))
}
