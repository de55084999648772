// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batches entries leaving the pipeline and hands them to the consumer.
//!
//! ```text
//!  producers ──append──> Buffer ──(count | deadline)──> delivery queue ──> LogsConsumer
//!                          ^                                  (one task, flush order)
//!                          └── timer task: sleeps until first append + flush_interval
//! ```
//!
//! A flush takes the buffer and enqueues it while still holding the buffer
//! lock, so batches reach the consumer in the order they were cut. The
//! consumer is only ever called from the delivery task, outside any lock.
//!
//! Rejected batches are reported and dropped (at-most-once).

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::deserialize_duration_from_millis;
use crate::constants::{DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_FLUSH_COUNT};
use crate::entry::Entry;
use crate::error_bus::{ErrorReporter, ReportedError};
use crate::errors::{ConfigError, DeliveryError, ProcessError, StartError, StopErrors};
use crate::operator::EntrySink;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Buffered entries that trigger an immediate flush.
    pub max_flush_count: usize,
    /// Longest a non-empty buffer waits before it is flushed, in
    /// milliseconds when read from configuration.
    #[serde(deserialize_with = "deserialize_duration_from_millis")]
    pub flush_interval: Duration,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            max_flush_count: DEFAULT_MAX_FLUSH_COUNT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl ConverterConfig {
    /// # Errors
    ///
    /// [`ConfigError::Converter`] when either setting is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_flush_count == 0 {
            return Err(ConfigError::Converter(
                "max_flush_count must be greater than zero".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Converter(
                "flush_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Entries cut from the buffer by one flush, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    entries: Vec<Entry>,
}

impl Batch {
    #[must_use]
    pub fn new(entries: Vec<Entry>) -> Self {
        Batch { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries grouped by resource. Groups follow the order in which each
    /// resource first appears; entries keep their order within a group.
    #[must_use]
    pub fn by_resource(&self) -> Vec<(Option<&str>, Vec<&Entry>)> {
        let mut groups: Vec<(Option<&str>, Vec<&Entry>)> = Vec::new();
        let mut index: HashMap<Option<&str>, usize> = HashMap::new();
        for entry in &self.entries {
            let resource = entry.resource.as_deref();
            let slot = *index.entry(resource).or_insert_with(|| {
                groups.push((resource, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(entry);
        }
        groups
    }
}

/// Downstream receiver of converted batches.
#[async_trait]
pub trait LogsConsumer: Send + Sync {
    async fn deliver(&self, batch: Batch) -> Result<(), DeliveryError>;
}

struct Buffer {
    entries: Vec<Entry>,
    // when the current batch became non-empty
    first_append: Option<Instant>,
    // None once stopped
    queue: Option<UnboundedSender<Batch>>,
}

impl Buffer {
    fn flush(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.first_append = None;
        let batch = Batch::new(mem::take(&mut self.entries));
        let count = batch.len();
        match &self.queue {
            Some(queue) => {
                if queue.send(batch).is_err() {
                    error!("CONVERTER | Delivery task is gone, dropping {} entries", count);
                }
            }
            None => error!("CONVERTER | Flush after stop, dropping {} entries", count),
        }
    }
}

fn lock_buffer(buffer: &Mutex<Buffer>) -> MutexGuard<'_, Buffer> {
    #[allow(clippy::expect_used)]
    buffer.lock().expect("lock poisoned")
}

struct Tasks {
    cancel: CancellationToken,
    timer: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

pub struct Converter {
    config: ConverterConfig,
    consumer: Arc<dyn LogsConsumer>,
    reporter: ErrorReporter,
    buffer: Arc<Mutex<Buffer>>,
    wake: Arc<Notify>,
    delivery_rx: Mutex<Option<UnboundedReceiver<Batch>>>,
    tasks: Mutex<Option<Tasks>>,
}

impl Converter {
    /// Creates a converter. Entries may be appended right away; they are
    /// delivered once [`Converter::start`] runs.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Converter`] for a zero count or interval.
    pub fn new(
        config: ConverterConfig,
        consumer: Arc<dyn LogsConsumer>,
        reporter: ErrorReporter,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Converter {
            config,
            consumer,
            reporter,
            buffer: Arc::new(Mutex::new(Buffer {
                entries: Vec::new(),
                first_append: None,
                queue: Some(tx),
            })),
            wake: Arc::new(Notify::new()),
            delivery_rx: Mutex::new(Some(rx)),
            tasks: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Entries waiting for the next flush.
    #[must_use]
    pub fn buffered(&self) -> usize {
        lock_buffer(&self.buffer).entries.len()
    }

    /// Spawns the flush timer and the delivery task.
    ///
    /// # Errors
    ///
    /// [`StartError::ConverterAlreadyStarted`] on a second call,
    /// [`StartError::ConverterStopped`] after [`Converter::stop`].
    pub fn start(&self) -> Result<(), StartError> {
        if lock_buffer(&self.buffer).queue.is_none() {
            return Err(StartError::ConverterStopped);
        }
        #[allow(clippy::expect_used)]
        let rx = self
            .delivery_rx
            .lock()
            .expect("lock poisoned")
            .take()
            .ok_or(StartError::ConverterAlreadyStarted)?;

        let cancel = CancellationToken::new();
        let timer = tokio::spawn(run_timer(
            Arc::clone(&self.buffer),
            Arc::clone(&self.wake),
            self.config.flush_interval,
            cancel.clone(),
        ));
        let delivery = tokio::spawn(run_delivery(
            rx,
            Arc::clone(&self.consumer),
            self.reporter.clone(),
        ));

        #[allow(clippy::expect_used)]
        let mut tasks = self.tasks.lock().expect("lock poisoned");
        *tasks = Some(Tasks {
            cancel,
            timer,
            delivery,
        });
        info!(
            "CONVERTER | Started (max_flush_count: {}, flush_interval: {:?})",
            self.config.max_flush_count, self.config.flush_interval
        );
        Ok(())
    }

    /// Appends one entry, flushing if the buffer reached `max_flush_count`.
    ///
    /// # Errors
    ///
    /// [`ProcessError::ConverterStopped`] once the converter is stopped.
    pub fn append(&self, entry: Entry) -> Result<(), ProcessError> {
        let mut buffer = lock_buffer(&self.buffer);
        if buffer.queue.is_none() {
            return Err(ProcessError::ConverterStopped);
        }

        let was_empty = buffer.entries.is_empty();
        buffer.entries.push(entry);
        if buffer.entries.len() >= self.config.max_flush_count {
            buffer.flush();
        } else if was_empty {
            buffer.first_append = Some(Instant::now());
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Flushes what is left, stops the timer and waits until every queued
    /// batch went through the consumer. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// A [`StopErrors`] entry for each background task that panicked.
    pub async fn stop(&self) -> Result<(), StopErrors> {
        let queue = {
            let mut buffer = lock_buffer(&self.buffer);
            if buffer.queue.is_none() {
                return Ok(());
            }
            buffer.flush();
            buffer.queue.take()
        };
        // closing the queue lets the delivery task finish after the last batch
        drop(queue);

        #[allow(clippy::expect_used)]
        let tasks = self.tasks.lock().expect("lock poisoned").take();
        let mut errors = StopErrors::default();
        match tasks {
            Some(tasks) => {
                tasks.cancel.cancel();
                if let Err(err) = tasks.timer.await {
                    errors.push("converter timer", err);
                }
                if let Err(err) = tasks.delivery.await {
                    errors.push("converter delivery", err);
                }
            }
            None => {
                // never started: deliver what was buffered before returning
                #[allow(clippy::expect_used)]
                let rx = self.delivery_rx.lock().expect("lock poisoned").take();
                if let Some(rx) = rx {
                    run_delivery(rx, Arc::clone(&self.consumer), self.reporter.clone()).await;
                }
            }
        }
        info!("CONVERTER | Stopped");
        errors.into_result()
    }
}

impl Drop for Converter {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(tasks) = tasks.take() {
                tasks.cancel.cancel();
            }
        }
    }
}

#[async_trait]
impl EntrySink for Converter {
    async fn consume(&self, _cancel: &CancellationToken, entry: Entry) -> Result<(), ProcessError> {
        self.append(entry)
    }
}

async fn run_timer(
    buffer: Arc<Mutex<Buffer>>,
    wake: Arc<Notify>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let deadline = lock_buffer(&buffer).first_append.map(|first| first + interval);
        match deadline {
            None => {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = wake.notified() => {}
                }
            }
            Some(deadline) => {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep_until(deadline) => {
                        let mut buffer = lock_buffer(&buffer);
                        // a count flush may have cut the batch while we slept
                        if buffer
                            .first_append
                            .is_some_and(|first| first + interval <= Instant::now())
                        {
                            debug!("CONVERTER | Flush interval elapsed");
                            buffer.flush();
                        }
                    }
                }
            }
        }
    }
}

async fn run_delivery(
    mut rx: UnboundedReceiver<Batch>,
    consumer: Arc<dyn LogsConsumer>,
    reporter: ErrorReporter,
) {
    while let Some(batch) = rx.recv().await {
        let count = batch.len();
        match consumer.deliver(batch).await {
            Ok(()) => debug!("CONVERTER | Delivered batch of {} entries", count),
            Err(err) => {
                error!("CONVERTER | Consumer rejected batch, dropping it: {}", err);
                reporter.report(ReportedError::Delivery(err));
            }
        }
    }
}
