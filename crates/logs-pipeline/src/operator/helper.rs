// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::errors::ProcessError;
use crate::operator::{OperatorConfig, Output};

/// Identity and output shared by every forwarding operator.
///
/// Operator types embed one of these and delegate `id`, `operator_type`
/// and `set_output` to it.
#[derive(Debug, Clone)]
pub struct OutputOperator {
    id: String,
    operator_type: String,
    output: Option<Output>,
}

impl OutputOperator {
    pub fn new(id: impl Into<String>, operator_type: impl Into<String>) -> Self {
        OutputOperator {
            id: id.into(),
            operator_type: operator_type.into(),
            output: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self::new(config.id(), config.operator_type.clone())
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn operator_type(&self) -> &str {
        &self.operator_type
    }

    pub fn set_output(&mut self, output: Output) {
        self.output = Some(output);
    }

    #[must_use]
    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    /// Hands `entry` to the next stage.
    ///
    /// # Errors
    ///
    /// [`ProcessError::NoOutput`] if no output was injected, otherwise
    /// whatever the downstream chain returns.
    pub async fn forward(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), ProcessError> {
        match &self.output {
            Some(output) => output.send(cancel, entry).await,
            None => Err(ProcessError::NoOutput(self.id.clone())),
        }
    }
}
