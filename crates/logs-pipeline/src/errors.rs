// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error kinds raised by the pipeline machinery.
//!
//! Only [`ConfigError`] and [`StartError`] keep a receiver from reaching
//! the running state. [`ProcessError`] and [`DeliveryError`] are reported
//! on the error bus and processing continues.

use std::fmt;

use thiserror::Error;

use crate::operator::LifecycleState;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Invalid configuration. Always fatal when the pipeline is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown operator type: {0}")]
    UnknownType(String),
    #[error("operator type {0} is already registered")]
    DuplicateType(String),
    #[error("invalid configuration for operator {id}: {reason}")]
    InvalidOperator { id: String, reason: String },
    #[error("operator id {0} is used more than once")]
    DuplicateId(String),
    #[error("operator {id} outputs to unknown operator {output}")]
    UnknownOutput { id: String, output: String },
    #[error("operator {0} receives input from more than one operator")]
    FanIn(String),
    #[error("operator chain contains a cycle")]
    Cycle,
    #[error("operator chain has more than one terminal operator: {0:?}")]
    MultipleSinks(Vec<String>),
    #[error("pipeline has no operators")]
    EmptyPipeline,
    #[error("invalid receiver name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("invalid converter setting: {0}")]
    Converter(String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors returned by operator hooks; the pipeline wraps them with the
/// operator id.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persister error: {0}")]
    Persister(#[from] PersisterError),
    #[error("{0}")]
    Message(String),
}

/// Resource acquisition failure during start. Fatal to the owning
/// pipeline's startup.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("operator {id} failed to start: {source}")]
    Operator {
        id: String,
        #[source]
        source: OperatorError,
    },
    #[error("failed to open persister: {0}")]
    Persister(#[from] PersisterError),
    #[error("converter is already started")]
    ConverterAlreadyStarted,
    #[error("converter is stopped and cannot be restarted")]
    ConverterStopped,
}

/// Per-record failure. Reported, never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("operator {id} failed to process entry: {source}")]
    Operator {
        id: String,
        #[source]
        source: OperatorError,
    },
    #[error("operator {id} failed unrecoverably: {reason}")]
    Unrecoverable { id: String, reason: String },
    #[error("operator {id} is not running (state: {state})")]
    NotRunning { id: String, state: LifecycleState },
    #[error("operator {0} has no output")]
    NoOutput(String),
    #[error("converter is stopped")]
    ConverterStopped,
    #[error("processing cancelled")]
    Cancelled,
}

impl ProcessError {
    pub fn operator(id: impl Into<String>, source: impl Into<OperatorError>) -> Self {
        ProcessError::Operator {
            id: id.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled)
    }
}

/// The consumer rejected a batch. The batch is not re-queued.
#[derive(Debug, Error)]
#[error("consumer rejected batch of {count} entries: {message}")]
pub struct DeliveryError {
    pub count: usize,
    pub message: String,
}

/// Persistence backend failure, propagated verbatim to the caller.
#[derive(Debug, Error)]
pub enum PersisterError {
    #[error("persister is closed")]
    Closed,
    #[error("batch operation {index} on key {key:?} has an unknown kind")]
    UnknownOperation { index: usize, key: String },
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),
    #[error("storage transaction aborted: {0}")]
    Transaction(String),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// One component that failed to stop cleanly.
#[derive(Debug)]
pub struct StopError {
    pub component: String,
    pub source: BoxError,
}

impl fmt::Display for StopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.component, self.source)
    }
}

/// Every stop failure of a shutdown, in the order they happened.
#[derive(Debug, Default)]
pub struct StopErrors(pub Vec<StopError>);

impl StopErrors {
    pub fn push(&mut self, component: impl Into<String>, source: impl Into<BoxError>) {
        self.0.push(StopError {
            component: component.into(),
            source: source.into(),
        });
    }

    pub fn extend(&mut self, other: StopErrors) {
        self.0.extend(other.0);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `Ok(())` when nothing failed.
    pub fn into_result(self) -> Result<(), StopErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for StopErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} component(s) failed to stop", self.0.len())?;
        for (idx, err) in self.0.iter().enumerate() {
            let sep = if idx == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for StopErrors {}

/// Errors surfaced by the receiver's lifecycle methods.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("startup error: {0}")]
    Start(#[from] StartError),
    #[error("shutdown error: {0}")]
    Stop(#[from] StopErrors),
    #[error("receiver is already started")]
    AlreadyStarted,
    #[error("receiver is not started")]
    NotStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_errors_display_lists_components() {
        let mut errors = StopErrors::default();
        errors.push("converter", "delivery task panicked");
        errors.push("operator parser", "close failed");

        assert_eq!(
            errors.to_string(),
            "2 component(s) failed to stop: converter: delivery task panicked; operator parser: close failed"
        );
    }

    #[test]
    fn test_empty_stop_errors_is_ok() {
        assert!(StopErrors::default().into_result().is_ok());
    }

    #[test]
    fn test_process_error_wraps_operator_error() {
        let err = ProcessError::operator("parser", OperatorError::Message("bad line".into()));
        assert_eq!(
            err.to_string(),
            "operator parser failed to process entry: bad line"
        );
        assert!(!err.is_cancelled());
    }
}
