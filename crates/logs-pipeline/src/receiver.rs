// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Startup and shutdown orchestration.
//!
//! ```text
//!  start:  persister scope ──> pipeline (head..tail) ──> converter
//!  stop:   cancel token ──> converter (final flush) ──> pipeline (tail..head) ──> persister scope
//! ```
//!
//! A failed start tears down whatever already started, in reverse order,
//! and leaves the receiver stopped.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReceiverConfig;
use crate::constants::SCOPE_SEPARATOR;
use crate::converter::{Converter, LogsConsumer};
use crate::entry::Entry;
use crate::error_bus::ErrorBus;
use crate::errors::{ConfigError, ReceiverError, StartError, StopErrors};
use crate::operator::Registry;
use crate::persister::{MemoryPersister, Persister, ScopedPersister, SledPersister};
use crate::pipeline::Pipeline;

struct Resources {
    backend: Arc<dyn Persister>,
    scope: Arc<ScopedPersister>,
    // the receiver opened the backend and must close it
    owns_backend: bool,
}

impl Resources {
    fn close(&self) -> StopErrors {
        let mut errors = StopErrors::default();
        if let Err(err) = self.scope.close() {
            errors.push("persister scope", err);
        }
        if self.owns_backend {
            if let Err(err) = self.backend.close() {
                errors.push("persister", err);
            }
        }
        errors
    }
}

enum Phase {
    Idle,
    Starting,
    Running {
        resources: Resources,
        // stops the converter once the shutdown token fires
        drain: JoinHandle<Result<(), StopErrors>>,
    },
    Stopped,
}

/// Cloneable handle used to request a shutdown from another task.
///
/// A shutdown request stops new entries from being accepted and makes the
/// converter deliver what it buffered. Operators and the persister are
/// released by [`Receiver::stop`].
#[derive(Clone, Debug)]
pub struct ReceiverHandle {
    shutdown: CancellationToken,
}

impl ReceiverHandle {
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Completes once a shutdown was requested.
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await;
    }
}

pub struct Receiver {
    config: ReceiverConfig,
    pipeline: Pipeline,
    converter: Arc<Converter>,
    error_bus: Mutex<Option<ErrorBus>>,
    shutdown: CancellationToken,
    persister: Option<Arc<dyn Persister>>,
    phase: Mutex<Phase>,
}

impl Receiver {
    /// Builds the pipeline and the converter. Performs no I/O.
    ///
    /// # Errors
    ///
    /// [`ReceiverError::Config`] for any invalid operator or converter
    /// setting.
    pub fn new(
        config: ReceiverConfig,
        registry: &Registry,
        consumer: Arc<dyn LogsConsumer>,
    ) -> Result<Self, ReceiverError> {
        validate_name(&config.name)?;
        let (error_bus, reporter) = ErrorBus::run();
        let converter = Arc::new(Converter::new(
            config.converter.clone(),
            consumer,
            reporter.clone(),
        )?);
        let pipeline =
            Pipeline::from_configs(&config.operators, registry, converter.clone(), reporter)?;

        debug!(
            "RECEIVER | Built {} with operators [{}]",
            config.name,
            pipeline.ids().join(", ")
        );
        Ok(Receiver {
            config,
            pipeline,
            converter,
            error_bus: Mutex::new(Some(error_bus)),
            shutdown: CancellationToken::new(),
            persister: None,
            phase: Mutex::new(Phase::Idle),
        })
    }

    /// Uses `persister` as the checkpoint backend instead of opening one
    /// from the storage settings. The receiver scopes it but never closes
    /// it.
    #[must_use]
    pub fn with_persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = Some(persister);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn handle(&self) -> ReceiverHandle {
        ReceiverHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Hands out the receiving side of the error bus. Only the first call
    /// returns it.
    pub fn take_error_bus(&self) -> Option<ErrorBus> {
        #[allow(clippy::expect_used)]
        self.error_bus.lock().expect("lock poisoned").take()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.phase(), Phase::Running { .. })
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        #[allow(clippy::expect_used)]
        self.phase.lock().expect("lock poisoned")
    }

    fn open_backend(&self) -> Result<(Arc<dyn Persister>, bool), StartError> {
        if let Some(persister) = &self.persister {
            return Ok((Arc::clone(persister), false));
        }
        match &self.config.storage.directory {
            Some(directory) => {
                let persister: Arc<dyn Persister> = Arc::new(SledPersister::open(directory)?);
                Ok((persister, true))
            }
            None => Ok((Arc::new(MemoryPersister::new()), true)),
        }
    }

    /// Opens the persister, then starts the pipeline, then the converter.
    ///
    /// # Errors
    ///
    /// [`ReceiverError::AlreadyStarted`] unless this is the first call,
    /// otherwise the [`StartError`] of the failing step. Steps that already
    /// started have been torn down and the receiver is stopped.
    pub async fn start(&self) -> Result<(), ReceiverError> {
        {
            let mut phase = self.phase();
            if !matches!(*phase, Phase::Idle) {
                return Err(ReceiverError::AlreadyStarted);
            }
            *phase = Phase::Starting;
        }

        match self.start_components().await {
            Ok(resources) => {
                let converter = Arc::clone(&self.converter);
                let shutdown = self.shutdown.clone();
                let drain = tokio::spawn(async move {
                    shutdown.cancelled().await;
                    debug!("RECEIVER | Shutdown requested, draining converter");
                    converter.stop().await
                });
                *self.phase() = Phase::Running { resources, drain };
                info!("RECEIVER | {} started", self.config.name);
                Ok(())
            }
            Err(err) => {
                *self.phase() = Phase::Stopped;
                self.shutdown.cancel();
                error!("RECEIVER | {} failed to start: {}", self.config.name, err);
                Err(err.into())
            }
        }
    }

    async fn start_components(&self) -> Result<Resources, StartError> {
        let (backend, owns_backend) = self.open_backend()?;
        let resources = Resources {
            scope: Arc::new(ScopedPersister::new(
                Arc::clone(&backend),
                self.config.name.clone(),
            )),
            backend,
            owns_backend,
        };

        let scope: Arc<dyn Persister> = resources.scope.clone();
        if let Err(err) = self.pipeline.start_all(scope).await {
            log_teardown(&resources.close());
            return Err(err);
        }

        if let Err(err) = self.converter.start() {
            if let Err(stop_errors) = self.pipeline.stop_all().await {
                log_teardown(&stop_errors);
            }
            log_teardown(&resources.close());
            return Err(err);
        }
        Ok(resources)
    }

    /// Feeds one entry into the pipeline. Entries arriving after a shutdown
    /// request are dropped; failures go to the error bus.
    pub async fn process(&self, entry: Entry) {
        self.pipeline.process(&self.shutdown, entry).await;
    }

    /// Cancels the shutdown token, then stops the converter (delivering the
    /// last batch), the pipeline and the persister scope. A second call is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`ReceiverError::NotStarted`] if [`Receiver::start`] never
    /// succeeded; [`ReceiverError::Stop`] listing every component that failed
    /// to stop. All components are stopped regardless.
    pub async fn stop(&self) -> Result<(), ReceiverError> {
        let (resources, drain) = {
            let mut phase = self.phase();
            match std::mem::replace(&mut *phase, Phase::Stopped) {
                Phase::Running { resources, drain } => (resources, drain),
                Phase::Stopped => return Ok(()),
                other => {
                    *phase = other;
                    return Err(ReceiverError::NotStarted);
                }
            }
        };

        info!("RECEIVER | Stopping {}", self.config.name);
        self.shutdown.cancel();

        let mut errors = StopErrors::default();
        match drain.await {
            Ok(Ok(())) => {}
            Ok(Err(converter_errors)) => errors.extend(converter_errors),
            Err(err) => errors.push("converter drain", err),
        }
        if let Err(pipeline_errors) = self.pipeline.stop_all().await {
            errors.extend(pipeline_errors);
        }
        errors.extend(resources.close());

        if errors.is_empty() {
            info!("RECEIVER | {} stopped", self.config.name);
        } else {
            warn!("RECEIVER | {} stopped with errors: {}", self.config.name, errors);
        }
        errors.into_result().map_err(ReceiverError::from)
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        // a receiver dropped without `stop` still delivers its buffer
        self.shutdown.cancel();
    }
}

/// The name scopes every checkpoint of the receiver, so it follows the
/// same rules as an operator id.
fn validate_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        "name must not be empty".to_string()
    } else if name.contains(SCOPE_SEPARATOR) {
        format!("name must not contain {SCOPE_SEPARATOR:?}")
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

fn log_teardown(errors: &StopErrors) {
    if !errors.is_empty() {
        warn!("RECEIVER | Teardown after failed start: {}", errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::Batch;
    use crate::errors::{DeliveryError, OperatorError, ProcessError};
    use crate::operator::{Operator, OperatorConfig, Output, OutputOperator};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording(Mutex<Vec<Batch>>);

    #[async_trait]
    impl LogsConsumer for Recording {
        async fn deliver(&self, batch: Batch) -> Result<(), DeliveryError> {
            self.0.lock().expect("lock").push(batch);
            Ok(())
        }
    }

    /// Stores an `offset` checkpoint when it starts.
    struct Checkpointing {
        base: OutputOperator,
    }

    #[async_trait]
    impl Operator for Checkpointing {
        fn id(&self) -> &str {
            self.base.id()
        }

        fn operator_type(&self) -> &str {
            self.base.operator_type()
        }

        fn set_output(&mut self, output: Output) {
            self.base.set_output(output);
        }

        async fn start(&self, persister: Arc<dyn Persister>) -> Result<(), OperatorError> {
            persister.set("offset", b"42")?;
            Ok(())
        }

        async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), ProcessError> {
            self.base.forward(cancel, entry).await
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::with_builtins();
        registry
            .register("checkpointing", |config: &OperatorConfig| {
                Ok(Box::new(Checkpointing {
                    base: OutputOperator::from_config(config),
                }) as Box<dyn Operator>)
            })
            .expect("register");
        registry
    }

    fn config() -> ReceiverConfig {
        let mut config = ReceiverConfig::default();
        config.operators = vec![
            OperatorConfig::new("checkpointing"),
            OperatorConfig::new("noop"),
        ];
        config.converter.max_flush_count = 10;
        config.converter.flush_interval = Duration::from_secs(60);
        config
    }

    #[tokio::test]
    async fn test_start_process_stop() {
        let consumer = Arc::new(Recording::default());
        let receiver = Receiver::new(config(), &registry(), consumer.clone()).expect("receiver");
        assert!(!receiver.is_running());

        receiver.start().await.expect("start");
        assert!(receiver.is_running());
        for n in 0..3 {
            receiver.process(Entry::new(n)).await;
        }
        receiver.stop().await.expect("stop");
        assert!(!receiver.is_running());

        let batches = consumer.0.lock().expect("lock");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn test_checkpoints_are_scoped_by_receiver_and_operator() {
        let backend: Arc<dyn Persister> = Arc::new(MemoryPersister::new());
        let receiver = Receiver::new(config(), &registry(), Arc::new(Recording::default()))
            .expect("receiver")
            .with_persister(Arc::clone(&backend));

        receiver.start().await.expect("start");
        receiver.stop().await.expect("stop");

        assert_eq!(
            backend
                .get("logs_receiver.checkpointing.offset")
                .expect("injected backend stays open"),
            Some(b"42".to_vec())
        );
    }

    #[tokio::test]
    async fn test_sled_backend_from_storage_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("checkpoints");
        let mut config = config();
        config.storage.directory = Some(db_path.clone());

        let receiver = Receiver::new(config, &registry(), Arc::new(Recording::default()))
            .expect("receiver");
        receiver.start().await.expect("start");
        receiver.stop().await.expect("stop");

        // the receiver closed its own backend, so it can be reopened
        let reopened = SledPersister::open(&db_path).expect("reopen");
        assert_eq!(
            reopened.get("logs_receiver.checkpointing.offset").expect("get"),
            Some(b"42".to_vec())
        );
    }

    #[tokio::test]
    async fn test_double_start_and_stop_before_start() {
        let receiver = Receiver::new(config(), &registry(), Arc::new(Recording::default()))
            .expect("receiver");
        assert!(matches!(receiver.stop().await, Err(ReceiverError::NotStarted)));

        receiver.start().await.expect("start");
        assert!(matches!(receiver.start().await, Err(ReceiverError::AlreadyStarted)));

        receiver.stop().await.expect("stop");
        receiver.stop().await.expect("second stop is a no-op");
        assert!(matches!(receiver.start().await, Err(ReceiverError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_entries_after_shutdown_request_are_dropped() {
        let consumer = Arc::new(Recording::default());
        let receiver = Receiver::new(config(), &registry(), consumer.clone()).expect("receiver");
        let mut bus = receiver.take_error_bus().expect("error bus");
        assert!(receiver.take_error_bus().is_none());

        receiver.start().await.expect("start");
        let handle = receiver.handle();
        handle.shutdown();
        assert!(handle.is_shutdown());

        receiver.process(Entry::new("late")).await;
        receiver.stop().await.expect("stop");

        assert!(consumer.0.lock().expect("lock").is_empty());
        assert!(bus.rx.try_recv().is_err(), "dropping after shutdown is not an error");
    }

    #[tokio::test]
    async fn test_shutdown_request_flushes_without_stop() {
        let consumer = Arc::new(Recording::default());
        let receiver = Receiver::new(config(), &registry(), consumer.clone()).expect("receiver");
        receiver.start().await.expect("start");
        for n in 0..3 {
            receiver.process(Entry::new(n)).await;
        }

        receiver.handle().shutdown();
        tokio::time::timeout(Duration::from_secs(5), async {
            while consumer.0.lock().expect("lock").is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("buffer delivered after shutdown request");
        assert!(receiver.is_running(), "operators wait for stop");

        receiver.stop().await.expect("stop");
        let batches = consumer.0.lock().expect("lock");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[test]
    fn test_name_must_be_a_single_scope_segment() {
        for name in ["", "edge.logs"] {
            let mut config = config();
            config.name = name.to_string();
            assert!(matches!(
                Receiver::new(config, &registry(), Arc::new(Recording::default())),
                Err(ReceiverError::Config(ConfigError::InvalidName { .. }))
            ));
        }
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let mut bad_operator = config();
        bad_operator.operators.push(OperatorConfig::new("regex_parser"));
        assert!(matches!(
            Receiver::new(bad_operator, &registry(), Arc::new(Recording::default())),
            Err(ReceiverError::Config(_))
        ));

        let mut bad_converter = config();
        bad_converter.converter.max_flush_count = 0;
        assert!(matches!(
            Receiver::new(bad_converter, &registry(), Arc::new(Recording::default())),
            Err(ReceiverError::Config(_))
        ));
    }
}
