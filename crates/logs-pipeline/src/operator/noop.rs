// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operator that forwards every entry unchanged.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::errors::{ConfigError, ProcessError};
use crate::operator::{Operator, OperatorConfig, Output, OutputOperator};

pub const OPERATOR_TYPE: &str = "noop";

#[derive(Debug)]
pub struct NoopOperator {
    base: OutputOperator,
}

impl NoopOperator {
    /// # Errors
    ///
    /// [`ConfigError::InvalidOperator`] if the block carries any
    /// stage-specific field.
    pub fn build(config: &OperatorConfig) -> Result<Box<dyn Operator>, ConfigError> {
        if let Some(field) = config.fields.keys().next() {
            return Err(ConfigError::InvalidOperator {
                id: config.id().to_string(),
                reason: format!("unexpected field {field:?}"),
            });
        }
        Ok(Box::new(NoopOperator {
            base: OutputOperator::from_config(config),
        }))
    }
}

#[async_trait]
impl Operator for NoopOperator {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn operator_type(&self) -> &str {
        self.base.operator_type()
    }

    fn set_output(&mut self, output: Output) {
        self.base.set_output(output);
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), ProcessError> {
        self.base.forward(cancel, entry).await
    }
}
