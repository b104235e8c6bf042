use std::fmt;

use log::{Level, LevelFilter};

/// A logger scoped to one connector instance.
///
/// Lines are filtered against the connector's own level before reaching the global `log` facade,
/// so the configured `logLevel` never changes the process-wide filter.
#[derive(Clone, Debug)]
pub struct SessionLogger {
    level: LevelFilter,
    target: String,
}

impl SessionLogger {
    pub fn new<L>(level: L, target: &str) -> Self
    where
        L: Into<LevelFilter>,
    {
        SessionLogger {
            level: level.into(),
            target: target.to_owned(),
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if self.enabled(level) {
            log::log!(target: self.target.as_str(), level, "{}", args);
        }
    }
}

/// Logs through a `SessionLogger`: `session_log!(logger, Info, "connected to {}", name)`.
macro_rules! session_log {
    ($logger:expr, $level:ident, $($arg:tt)+) => {
        $logger.log(::log::Level::$level, format_args!($($arg)+))
    };
}
