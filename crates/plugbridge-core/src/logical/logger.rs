//! Logger handle handed to a backend at setup.
//!
//! A `Logger` is a named, levelled front for `tracing` events. It carries no
//! sink of its own, so it can cross the process boundary as `{name, level}`
//! and log through whatever subscriber the receiving process installed.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Minimum level a logger emits.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// A named logger handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logger {
    name: String,
    level: LogLevel,
}

impl Logger {
    pub fn new(name: impl Into<String>, level: LogLevel) -> Self {
        Self {
            name: name.into(),
            level,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Derive a child logger, e.g. `vault` -> `vault.kv`.
    pub fn named(&self, child: &str) -> Logger {
        Logger {
            name: format!("{}.{}", self.name, child),
            level: self.level,
        }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    pub fn log(&self, level: LogLevel, message: impl Display) {
        if !self.enabled(level) {
            return;
        }
        let name = self.name.as_str();
        match level {
            LogLevel::Trace => tracing::trace!(logger = name, "{}", message),
            LogLevel::Debug => tracing::debug!(logger = name, "{}", message),
            LogLevel::Info => tracing::info!(logger = name, "{}", message),
            LogLevel::Warn => tracing::warn!(logger = name, "{}", message),
            LogLevel::Error => tracing::error!(logger = name, "{}", message),
        }
    }

    pub fn trace(&self, message: impl Display) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl Display) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Display) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.log(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filtering() {
        let logger = Logger::new("plugin", LogLevel::Warn);
        assert!(!logger.enabled(LogLevel::Debug));
        assert!(logger.enabled(LogLevel::Warn));
        assert!(logger.enabled(LogLevel::Error));
    }

    #[test]
    fn test_named_child_keeps_level() {
        let child = Logger::new("host", LogLevel::Debug).named("kv");
        assert_eq!(child.name(), "host.kv");
        assert_eq!(child.level(), LogLevel::Debug);
    }

    #[test]
    fn test_wire_form() {
        let logger = Logger::new("host", LogLevel::Debug);
        let json = serde_json::to_string(&logger).unwrap();
        assert_eq!(json, r#"{"name":"host","level":"debug"}"#);
        let back: Logger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, logger);
    }
}
