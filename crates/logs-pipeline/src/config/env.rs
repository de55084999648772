// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::Env;
use figment::Figment;
use serde::Deserialize;

use crate::config::{
    deserialize_optional_duration_from_millis, log_level::LogLevel, ConfigSource,
    ReceiverConfig,
};
use crate::errors::ConfigError;

pub const ENV_PREFIX: &str = "LOGS_RECEIVER_";

/// Environment overrides, e.g. `LOGS_RECEIVER_FLUSH_INTERVAL=250`.
///
/// Operators can only be declared in the YAML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvConfig {
    name: Option<String>,
    log_level: Option<LogLevel>,
    max_flush_count: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_millis")]
    flush_interval: Option<Duration>,
    storage_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn name(&self) -> &str {
        "environment"
    }

    fn load(&self, config: &mut ReceiverConfig) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Env::prefixed(ENV_PREFIX));
        let env = figment.extract::<EnvConfig>().map_err(|e| {
            ConfigError::Parse(format!("Failed to parse config from environment: {e}"))
        })?;

        if let Some(name) = env.name {
            config.name = name;
        }
        if let Some(log_level) = env.log_level {
            config.log_level = log_level;
        }
        if let Some(max_flush_count) = env.max_flush_count {
            config.converter.max_flush_count = max_flush_count;
        }
        if let Some(flush_interval) = env.flush_interval {
            config.converter.flush_interval = flush_interval;
        }
        if env.storage_directory.is_some() {
            config.storage.directory = env.storage_directory;
        }
        Ok(())
    }
}
