// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ConfigError;

/// Declarative description of one stage.
///
/// ```yaml
/// - type: noop
///   id: passthrough     # defaults to the type name
///   output: next_stage  # defaults to the next operator in the list
/// ```
///
/// Any other key is a stage-specific field, decoded by the builder
/// through [`OperatorConfig::decode_fields`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    #[serde(rename = "type")]
    pub operator_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OperatorConfig {
    pub fn new(operator_type: impl Into<String>) -> Self {
        OperatorConfig {
            operator_type: operator_type.into(),
            id: None,
            output: None,
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// The configured id, or the type name when none was given.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.operator_type)
    }

    /// Decodes the stage-specific fields into the builder's own struct.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidOperator`] when the fields do not match `T`.
    pub fn decode_fields<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            ConfigError::InvalidOperator {
                id: self.id().to_string(),
                reason: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct ReaderFields {
        path: String,
        #[serde(default)]
        start_at_end: bool,
    }

    #[test]
    fn test_deserialize_collects_extra_fields() {
        let config: OperatorConfig = serde_json::from_value(json!({
            "type": "file_input",
            "id": "reader",
            "path": "/var/log/app.log",
        }))
        .expect("decode config");

        assert_eq!(config.operator_type, "file_input");
        assert_eq!(config.id(), "reader");
        assert_eq!(config.output, None);
        assert_eq!(config.fields.get("path"), Some(&json!("/var/log/app.log")));
    }

    #[test]
    fn test_decode_fields() {
        let config = OperatorConfig::new("file_input").with_field("path", "/tmp/a.log");
        let fields: ReaderFields = config.decode_fields().expect("decode fields");
        assert_eq!(
            fields,
            ReaderFields {
                path: "/tmp/a.log".into(),
                start_at_end: false
            }
        );
    }

    #[test]
    fn test_decode_fields_reports_operator_id() {
        let config = OperatorConfig::new("file_input")
            .with_id("reader")
            .with_field("pth", "/tmp/a.log");
        match config.decode_fields::<ReaderFields>() {
            Err(ConfigError::InvalidOperator { id, .. }) => assert_eq!(id, "reader"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let result: Result<OperatorConfig, _> = serde_json::from_value(json!({"id": "x"}));
        assert!(result.is_err());
    }
}
