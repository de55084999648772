// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Receiver log level.
//!
//! Set through `log_level` in the YAML file or `LOGS_RECEIVER_LOG_LEVEL`.
//! Parsing is case-insensitive; an invalid value logs an error and falls
//! back to `warn` so that a typo never keeps the receiver from starting.

use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;
use tracing::level_filters::LevelFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl LogLevel {
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Directive for `tracing_subscriber::EnvFilter`, e.g. `"debug"`.
    #[must_use]
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: error, warn, info, debug, trace",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Value::String(s) = value {
            match LogLevel::from_str(&s) {
                Ok(level) => Ok(level),
                Err(e) => {
                    error!("CONFIG | {}, using default", e);
                    Ok(LogLevel::Warn)
                }
            }
        } else {
            error!("CONFIG | Expected log level as a string, got {}, using default", value);
            Ok(LogLevel::Warn)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!(LogLevel::from_str("DeBuG"), Ok(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("warning"), Ok(LogLevel::Warn));
        assert!(LogLevel::from_str("verbose").is_err());
    }

    #[test]
    fn test_invalid_values_fall_back_to_warn() {
        let level: LogLevel = serde_json::from_value(json!("loud")).expect("lenient");
        assert_eq!(level, LogLevel::Warn);
        let level: LogLevel = serde_json::from_value(json!(3)).expect("lenient");
        assert_eq!(level, LogLevel::Warn);
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(LogLevel::Trace.as_filter_directive(), "trace");
        assert_eq!(LogLevel::Error.as_level_filter(), LevelFilter::ERROR);
    }
}
