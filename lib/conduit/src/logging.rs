//! Logging bootstrap shared by every crate in the workspace. Components hold
//! a `logging::Logger` and default to `Discard` when the caller passes none.

pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use crate::support::{WireError, WireResult};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::{Build, Config, LoggerConfig};

/// Build a logger from a `sloggers` TOML snippet, e.g.
///
/// ```toml
/// type = "terminal"
/// level = "debug"
/// destination = "stderr"
/// ```
pub fn from_toml(text: &str) -> WireResult<Logger> {
    let config: LoggerConfig =
        serdeconv::from_toml_str(text).map_err(|error| WireError::Config(error.to_string()))?;

    build(&config)
}

/// Build a logger from an already-parsed configuration section.
pub fn build(config: &LoggerConfig) -> WireResult<Logger> {
    config
        .build_logger()
        .map_err(|error| WireError::Config(error.to_string()))
}

/// Debug-level terminal logger writing to stderr.
pub fn terminal() -> WireResult<Logger> {
    TerminalLoggerBuilder::new()
        .level(Severity::Debug)
        .destination(Destination::Stderr)
        .build()
        .map_err(|error| WireError::Config(error.to_string()))
}

/// Logger that drops every record.
#[inline]
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
