// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Channel carrying non-fatal errors from the record path to the receiver.
//!
//! ```text
//! Producers (many)           ErrorBus          Consumer (one)
//!     │                         │                    │
//!     ├─ pipeline.process ─────>│                    │
//!     ├─ converter delivery ───>│ ──> MPSC ────────> rx
//!     └─ ...                    │     channel        │
//! ```
//!
//! Reporting never blocks: when the channel is full the report is dropped,
//! a warning is logged and [`ErrorBus::dropped`] counts the loss.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::constants::MAX_ERROR_REPORTS;
use crate::errors::{DeliveryError, ProcessError};

/// A non-fatal error observed while the receiver was running.
#[derive(Debug)]
pub enum ReportedError {
    /// An entry failed somewhere in the operator chain.
    Process(ProcessError),
    /// The consumer rejected a batch.
    Delivery(DeliveryError),
}

impl fmt::Display for ReportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportedError::Process(err) => write!(f, "process error: {err}"),
            ReportedError::Delivery(err) => write!(f, "delivery error: {err}"),
        }
    }
}

/// Receiving side of the bus, owned by whoever consumes the reports.
pub struct ErrorBus {
    pub rx: mpsc::Receiver<ReportedError>,
    dropped: Arc<AtomicU64>,
}

impl ErrorBus {
    #[must_use]
    pub fn run() -> (ErrorBus, ErrorReporter) {
        Self::with_capacity(MAX_ERROR_REPORTS)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> (ErrorBus, ErrorReporter) {
        let (tx, rx) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        (
            ErrorBus {
                rx,
                dropped: Arc::clone(&dropped),
            },
            ErrorReporter { tx, dropped },
        )
    }

    /// Reports lost because the channel was full when they were sent.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Cloneable sending side of the bus.
#[derive(Clone, Debug)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ReportedError>,
    dropped: Arc<AtomicU64>,
}

impl ErrorReporter {
    /// Queues `error` for the bus owner without waiting.
    ///
    /// The record path must not stall on a slow reader, so a report that
    /// finds the channel full is dropped and counted in
    /// [`ErrorBus::dropped`].
    pub fn report(&self, error: ReportedError) {
        match self.tx.try_send(error) {
            Ok(()) => {}
            Err(TrySendError::Full(lost)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("ERROR_BUS | Channel full, dropping report ({total} dropped so far): {lost}");
            }
            // nobody is listening anymore; the error was already logged at the source
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_are_received_in_order() {
        let (mut bus, reporter) = ErrorBus::run();

        reporter.report(ReportedError::Process(ProcessError::ConverterStopped));
        reporter.report(ReportedError::Delivery(DeliveryError {
            count: 3,
            message: "no".into(),
        }));

        assert!(matches!(
            bus.rx.recv().await,
            Some(ReportedError::Process(ProcessError::ConverterStopped))
        ));
        match bus.rx.recv().await {
            Some(ReportedError::Delivery(err)) => assert_eq!(err.count, 3),
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (mut bus, reporter) = ErrorBus::with_capacity(1);

        reporter.report(ReportedError::Process(ProcessError::ConverterStopped));
        reporter.report(ReportedError::Process(ProcessError::Cancelled));

        assert!(matches!(
            bus.rx.recv().await,
            Some(ReportedError::Process(ProcessError::ConverterStopped))
        ));
        assert!(bus.rx.try_recv().is_err());
        assert_eq!(bus.dropped(), 1);

        reporter.report(ReportedError::Process(ProcessError::Cancelled));
        assert_eq!(bus.dropped(), 1, "room again after the read");
    }

    #[test]
    fn test_report_after_bus_dropped_is_silent() {
        let (bus, reporter) = ErrorBus::run();
        drop(bus);
        reporter.report(ReportedError::Process(ProcessError::Cancelled));
    }
}
