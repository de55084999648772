// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! YAML file configuration.
//!
//! ```yaml
//! name: app_logs
//! log_level: info
//! operators:
//!   - type: noop
//!     id: passthrough
//! converter:
//!   max_flush_count: 500
//!   flush_interval: 250   # milliseconds
//! storage:
//!   directory: /var/lib/logs-receiver
//! ```
//!
//! Keys absent from the file leave the current value untouched.

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Format, Yaml};
use figment::Figment;
use serde::Deserialize;

use crate::config::{
    deserialize_optional_duration_from_millis, log_level::LogLevel, ConfigSource,
    ReceiverConfig,
};
use crate::errors::ConfigError;
use crate::operator::OperatorConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct YamlConfig {
    name: Option<String>,
    log_level: Option<LogLevel>,
    operators: Option<Vec<OperatorConfig>>,
    converter: YamlConverterConfig,
    storage: YamlStorageConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct YamlConverterConfig {
    max_flush_count: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_millis")]
    flush_interval: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct YamlStorageConfig {
    directory: Option<PathBuf>,
}

fn merge_config(config: &mut ReceiverConfig, yaml: YamlConfig) {
    if let Some(name) = yaml.name {
        config.name = name;
    }
    if let Some(log_level) = yaml.log_level {
        config.log_level = log_level;
    }
    if let Some(operators) = yaml.operators {
        config.operators = operators;
    }
    if let Some(max_flush_count) = yaml.converter.max_flush_count {
        config.converter.max_flush_count = max_flush_count;
    }
    if let Some(flush_interval) = yaml.converter.flush_interval {
        config.converter.flush_interval = flush_interval;
    }
    if yaml.storage.directory.is_some() {
        config.storage.directory = yaml.storage.directory;
    }
}

#[derive(Debug, Clone)]
pub struct YamlConfigSource {
    pub path: PathBuf,
}

impl ConfigSource for YamlConfigSource {
    fn name(&self) -> &str {
        "YAML file"
    }

    fn load(&self, config: &mut ReceiverConfig) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Yaml::file(&self.path));
        let yaml = figment.extract::<YamlConfig>().map_err(|e| {
            ConfigError::Parse(format!(
                "Failed to parse config from yaml file {}: {e}",
                self.path.display()
            ))
        })?;
        merge_config(config, yaml);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_file() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "logs-receiver.yaml",
                r"
name: app_logs
log_level: debug
operators:
  - type: noop
    id: first
    output: second
  - type: file_checkpoint
    id: second
    path: /var/log/app.log
converter:
  max_flush_count: 500
  flush_interval: 2.5
storage:
  directory: /tmp/receiver-db
",
            )?;

            let mut config = ReceiverConfig::default();
            YamlConfigSource {
                path: "logs-receiver.yaml".into(),
            }
            .load(&mut config)
            .expect("load yaml");

            assert_eq!(config.name, "app_logs");
            assert_eq!(config.log_level, LogLevel::Debug);
            assert_eq!(
                config.operators,
                vec![
                    OperatorConfig::new("noop").with_id("first").with_output("second"),
                    OperatorConfig::new("file_checkpoint")
                        .with_id("second")
                        .with_field("path", json!("/var/log/app.log")),
                ]
            );
            assert_eq!(config.converter.max_flush_count, 500);
            assert_eq!(config.converter.flush_interval, Duration::from_micros(2500));
            assert_eq!(config.storage.directory, Some(PathBuf::from("/tmp/receiver-db")));
            Ok(())
        });
    }

    #[test]
    fn test_partial_file_keeps_other_values() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("logs-receiver.yaml", "converter:\n  max_flush_count: 7\n")?;

            let mut config = ReceiverConfig {
                name: "kept".to_string(),
                ..ReceiverConfig::default()
            };
            YamlConfigSource {
                path: "logs-receiver.yaml".into(),
            }
            .load(&mut config)
            .expect("load yaml");

            assert_eq!(config.name, "kept");
            assert_eq!(config.converter.max_flush_count, 7);
            assert_eq!(config.converter.flush_interval, Duration::from_millis(100));
            Ok(())
        });
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("logs-receiver.yaml", "operators: not-a-list\n")?;

            let mut config = ReceiverConfig::default();
            let err = YamlConfigSource {
                path: "logs-receiver.yaml".into(),
            }
            .load(&mut config)
            .expect_err("operators must be a list");
            assert!(matches!(err, ConfigError::Parse(_)));
            assert_eq!(config, ReceiverConfig::default());
            Ok(())
        });
    }
}
