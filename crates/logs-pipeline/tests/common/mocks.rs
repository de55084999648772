// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock consumers and operators for receiver tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use logs_pipeline::converter::{Batch, LogsConsumer};
use logs_pipeline::errors::{DeliveryError, OperatorError, ProcessError};
use logs_pipeline::operator::{Operator, OperatorConfig, Output, OutputOperator, Registry};
use logs_pipeline::persister::Persister;
use logs_pipeline::Entry;
use tokio_util::sync::CancellationToken;

/// Consumer that keeps every batch it receives
#[derive(Default)]
pub struct RecordingConsumer {
    batches: Mutex<Vec<Batch>>,
}

#[allow(dead_code)]
impl RecordingConsumer {
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().expect("lock").clone()
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.batches()
            .into_iter()
            .flat_map(Batch::into_entries)
            .map(|entry| entry.body)
            .collect()
    }
}

#[async_trait]
impl LogsConsumer for RecordingConsumer {
    async fn deliver(&self, batch: Batch) -> Result<(), DeliveryError> {
        self.batches.lock().expect("lock").push(batch);
        Ok(())
    }
}

/// Consumer that rejects every batch and counts the attempts
#[derive(Default)]
pub struct RejectingConsumer {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl LogsConsumer for RejectingConsumer {
    async fn deliver(&self, batch: Batch) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError {
            count: batch.len(),
            message: "rejected by mock".to_string(),
        })
    }
}

/// Shared, ordered record of operator hook calls, e.g. `"start:a"`
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

#[allow(dead_code)]
impl CallLog {
    fn record(&self, hook: &str, id: &str) {
        self.0.lock().expect("lock").push(format!("{hook}:{id}"));
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().expect("lock").clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }
}

/// Forwarding operator that records its hook calls
pub struct CountingOperator {
    base: OutputOperator,
    log: CallLog,
    processed: Arc<AtomicUsize>,
}

#[async_trait]
impl Operator for CountingOperator {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn operator_type(&self) -> &str {
        self.base.operator_type()
    }

    fn set_output(&mut self, output: Output) {
        self.base.set_output(output);
    }

    async fn start(&self, _persister: Arc<dyn Persister>) -> Result<(), OperatorError> {
        self.log.record("start", self.id());
        Ok(())
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), ProcessError> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.base.forward(cancel, entry).await
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        self.log.record("stop", self.id());
        Ok(())
    }
}

/// Operator whose start always fails
pub struct UnstartableOperator {
    base: OutputOperator,
    log: CallLog,
}

#[async_trait]
impl Operator for UnstartableOperator {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn operator_type(&self) -> &str {
        self.base.operator_type()
    }

    fn set_output(&mut self, output: Output) {
        self.base.set_output(output);
    }

    async fn start(&self, _persister: Arc<dyn Persister>) -> Result<(), OperatorError> {
        self.log.record("start", self.id());
        Err(OperatorError::Message("unstartable".to_string()))
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), ProcessError> {
        self.base.forward(cancel, entry).await
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        self.log.record("stop", self.id());
        Ok(())
    }
}

/// Operator that fails every entry without forwarding it
pub struct FailingOperator {
    base: OutputOperator,
}

#[async_trait]
impl Operator for FailingOperator {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn operator_type(&self) -> &str {
        self.base.operator_type()
    }

    fn set_output(&mut self, output: Output) {
        self.base.set_output(output);
    }

    async fn process(&self, _cancel: &CancellationToken, _entry: Entry) -> Result<(), ProcessError> {
        Err(ProcessError::operator(
            self.id(),
            OperatorError::Message("cannot parse".to_string()),
        ))
    }
}

/// Registry with the builtins plus `counting`, `unstartable` and `failing`
pub fn registry(log: &CallLog, processed: &Arc<AtomicUsize>) -> Registry {
    let mut registry = Registry::with_builtins();

    let counting_log = log.clone();
    let processed = Arc::clone(processed);
    registry
        .register("counting", move |config: &OperatorConfig| {
            Ok(Box::new(CountingOperator {
                base: OutputOperator::from_config(config),
                log: counting_log.clone(),
                processed: Arc::clone(&processed),
            }) as Box<dyn Operator>)
        })
        .expect("register counting");

    let unstartable_log = log.clone();
    registry
        .register("unstartable", move |config: &OperatorConfig| {
            Ok(Box::new(UnstartableOperator {
                base: OutputOperator::from_config(config),
                log: unstartable_log.clone(),
            }) as Box<dyn Operator>)
        })
        .expect("register unstartable");

    registry
        .register("failing", |config: &OperatorConfig| {
            Ok(Box::new(FailingOperator {
                base: OutputOperator::from_config(config),
            }) as Box<dyn Operator>)
        })
        .expect("register failing");

    registry
}
