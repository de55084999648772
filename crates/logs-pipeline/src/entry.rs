// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One log event flowing through the pipeline.
///
/// Entries move by value from stage to stage; a stage that forwards an
/// entry gives up ownership of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// When the event happened (or was observed, for sources without one).
    pub timestamp: SystemTime,
    /// The log payload itself.
    pub body: Value,
    /// Structured attributes attached by sources and operators.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    /// Identifier of the source/resource that produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl Entry {
    #[must_use]
    pub fn new(body: impl Into<Value>) -> Self {
        Entry {
            timestamp: SystemTime::now(),
            body: body.into(),
            attributes: BTreeMap::new(),
            resource: None,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}
