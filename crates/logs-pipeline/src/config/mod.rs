// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Receiver configuration.
//!
//! Sources are applied in order on top of the defaults, later sources
//! overriding earlier ones:
//!
//! 1. Defaults
//! 2. YAML file (`logs-receiver.yaml`)
//! 3. Environment variables (`LOGS_RECEIVER_*`)
//!
//! A source that fails to load is logged and skipped.

pub mod env;
pub mod log_level;
pub mod yaml;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::{error, info, warn};

use crate::constants::DEFAULT_RECEIVER_NAME;
use crate::converter::ConverterConfig;
use crate::errors::ConfigError;
use crate::operator::OperatorConfig;

pub use env::EnvConfigSource;
pub use log_level::LogLevel;
pub use yaml::YamlConfigSource;

/// Name of the YAML file looked up in the config directory.
pub const CONFIG_FILE_NAME: &str = "logs-receiver.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Receiver name; also the persister scope of its checkpoints.
    pub name: String,
    pub log_level: LogLevel,
    pub operators: Vec<OperatorConfig>,
    pub converter: ConverterConfig,
    pub storage: StorageConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            name: DEFAULT_RECEIVER_NAME.to_string(),
            log_level: LogLevel::default(),
            operators: Vec::new(),
            converter: ConverterConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory of the durable checkpoint database. Checkpoints are kept
    /// in memory when unset.
    pub directory: Option<PathBuf>,
}

pub trait ConfigSource {
    /// Short label used in log lines, e.g. `"environment"`.
    fn name(&self) -> &str;

    /// Applies this source's settings on top of `config`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] when the source exists but cannot be read.
    fn load(&self, config: &mut ReceiverConfig) -> Result<(), ConfigError>;
}

#[derive(Default)]
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    config: ReceiverConfig,
}

impl ConfigBuilder {
    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Applies every source in order. A source that fails leaves no
    /// partial settings behind.
    #[must_use]
    pub fn build(self) -> ReceiverConfig {
        let mut config = self.config;
        let mut loaded = 0;
        for source in &self.sources {
            let mut candidate = config.clone();
            match source.load(&mut candidate) {
                Ok(()) => {
                    config = candidate;
                    loaded += 1;
                }
                Err(e) => warn!("CONFIG | Skipping {} settings: {}", source.name(), e),
            }
        }

        if loaded == 0 && !self.sources.is_empty() {
            info!("CONFIG | No settings loaded, receiver {} runs with defaults", config.name);
        }
        config
    }
}

/// Loads `logs-receiver.yaml` from `config_directory`, then the environment.
#[must_use]
pub fn get_config(config_directory: &Path) -> ReceiverConfig {
    let path = config_directory.join(CONFIG_FILE_NAME);
    ConfigBuilder::default()
        .add_source(Box::new(YamlConfigSource { path }))
        .add_source(Box::new(EnvConfigSource))
        .build()
}

struct MillisVisitor;

impl serde::de::Visitor<'_> for MillisVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a positive duration in milliseconds (integer or float)")
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Duration::from_millis(v))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(Duration::from_millis)
            .map_err(|_| E::custom(format!("negative duration: {v}ms")))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if !v.is_finite() || v < 0f64 {
            return Err(E::custom(format!("invalid duration: {v}ms")));
        }
        // microsecond precision
        Ok(Duration::from_micros((v * 1000f64).round() as u64))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        let millis: f64 = v
            .trim()
            .parse()
            .map_err(|_| E::custom(format!("invalid duration: {v:?}")))?;
        self.visit_f64(millis)
    }
}

/// Reads a duration given in milliseconds, as an integer, a float or a
/// numeric string.
///
/// # Errors
///
/// Negative, non-finite or non-numeric values.
pub fn deserialize_duration_from_millis<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    deserializer.deserialize_any(MillisVisitor)
}

/// Lenient variant of [`deserialize_duration_from_millis`]: an invalid
/// value is logged and treated as absent.
///
/// # Errors
///
/// Never; the signature follows serde's `deserialize_with` contract.
pub fn deserialize_optional_duration_from_millis<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    match deserializer.deserialize_any(MillisVisitor) {
        Ok(duration) => Ok(Some(duration)),
        Err(e) => {
            error!("CONFIG | Failed to parse flush_interval: {}, ignoring", e);
            Ok(None)
        }
    }
}
