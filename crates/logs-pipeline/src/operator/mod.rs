// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operators: the pluggable stages of the pipeline.
//!
//! An operator goes through `Build → Start → Process* → Stop`:
//!
//! ```text
//!  OperatorConfig ──build──> Built ──start──> Started ──> Running ──stop──> Stopped
//!                              │                            │
//!                              └──start error──> Failed <───┘ unrecoverable error
//! ```
//!
//! [`OperatorConfig`] is the unbuilt form; building goes through the
//! [`Registry`]. Once built, an operator is wrapped in a [`Stage`], which
//! tracks the lifecycle state and rejects records outside `Running`, so
//! operator implementations only deal with their own work.
//!
//! Forwarding is explicit: at pipeline construction every operator is
//! handed an [`Output`] pointing at the next stage (or the converter).

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::entry::Entry;
use crate::errors::{OperatorError, ProcessError, StartError};
use crate::persister::Persister;

pub mod config;
pub mod helper;
pub mod noop;
pub mod registry;

pub use config::OperatorConfig;
pub use helper::OutputOperator;
pub use registry::{BuildFn, Registry};

/// Anything that can accept an entry: a pipeline stage or the converter.
#[async_trait]
pub trait EntrySink: Send + Sync {
    async fn consume(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), ProcessError>;
}

/// Handle to the next stage, injected into an operator by the pipeline.
#[derive(Clone)]
pub struct Output {
    id: String,
    sink: Arc<dyn EntrySink>,
}

impl Output {
    pub fn new(id: impl Into<String>, sink: Arc<dyn EntrySink>) -> Self {
        Output {
            id: id.into(),
            sink,
        }
    }

    /// Id of the stage this output feeds.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn send(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), ProcessError> {
        self.sink.consume(cancel, entry).await
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output").field("id", &self.id).finish()
    }
}

/// Contract every operator type implements.
///
/// `process` must forward the (possibly transformed) entry through the
/// operator's [`Output`] before returning. `start` and `stop` default to
/// no-ops for operators that hold no resources.
#[async_trait]
pub trait Operator: Send + Sync {
    fn id(&self) -> &str;

    fn operator_type(&self) -> &str;

    /// Called once by the pipeline before `start`.
    fn set_output(&mut self, output: Output);

    async fn start(&self, _persister: Arc<dyn Persister>) -> Result<(), OperatorError> {
        Ok(())
    }

    async fn process(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), ProcessError>;

    async fn stop(&self) -> Result<(), OperatorError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Built,
    Started,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Built => "built",
            LifecycleState::Started => "started",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct StageState {
    lifecycle: LifecycleState,
    // a `start` hook is in flight; the stage stays `Built` until it returns
    starting: bool,
    // whether the operator's own `start` succeeded, i.e. it owns resources
    started: bool,
}

/// A built operator plus its lifecycle state.
pub struct Stage {
    id: String,
    operator: Box<dyn Operator>,
    state: Mutex<StageState>,
}

impl Stage {
    #[must_use]
    pub fn new(operator: Box<dyn Operator>) -> Self {
        Stage {
            id: operator.id().to_string(),
            operator,
            state: Mutex::new(StageState {
                lifecycle: LifecycleState::Built,
                starting: false,
                started: false,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn operator_type(&self) -> &str {
        self.operator.operator_type()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lock().lifecycle
    }

    fn lock(&self) -> MutexGuard<'_, StageState> {
        #[allow(clippy::expect_used)]
        self.state.lock().expect("lock poisoned")
    }

    /// Runs the operator's `start` hook. Only valid from `Built`.
    ///
    /// A [`Stage::stop`] that lands while the hook is running wins: once the
    /// hook returns, the stage stays `Stopped` and the operator's `stop`
    /// hook releases whatever `start` acquired.
    ///
    /// # Errors
    ///
    /// [`StartError::Operator`] if the hook fails (the stage becomes
    /// `Failed`), the stage is not in `Built`, or it was stopped while
    /// starting.
    pub async fn start(&self, persister: Arc<dyn Persister>) -> Result<(), StartError> {
        {
            let mut state = self.lock();
            if state.lifecycle != LifecycleState::Built || state.starting {
                let reason = if state.starting {
                    "start already in progress".to_string()
                } else {
                    format!("cannot start from state {}", state.lifecycle)
                };
                return Err(StartError::Operator {
                    id: self.id.clone(),
                    source: OperatorError::Message(reason),
                });
            }
            state.starting = true;
        }

        let result = self.operator.start(persister).await;

        let stopped_while_starting = {
            let mut state = self.lock();
            state.starting = false;
            match &result {
                Ok(()) if state.lifecycle == LifecycleState::Built => {
                    state.lifecycle = LifecycleState::Started;
                    state.started = true;
                    false
                }
                Ok(()) => true,
                Err(_) => {
                    if state.lifecycle == LifecycleState::Built {
                        state.lifecycle = LifecycleState::Failed;
                    }
                    false
                }
            }
        };

        match result {
            Ok(()) if stopped_while_starting => {
                warn!("PIPELINE | Operator {} was stopped while starting", self.id);
                if let Err(err) = self.operator.stop().await {
                    warn!("PIPELINE | Operator {} failed to stop cleanly: {}", self.id, err);
                }
                Err(StartError::Operator {
                    id: self.id.clone(),
                    source: OperatorError::Message("stopped while starting".to_string()),
                })
            }
            Ok(()) => {
                debug!("PIPELINE | Started operator {}", self.id);
                Ok(())
            }
            Err(source) => {
                error!("PIPELINE | Operator {} failed to start: {}", self.id, source);
                Err(StartError::Operator {
                    id: self.id.clone(),
                    source,
                })
            }
        }
    }

    /// Moves a started stage to `Running`.
    pub(crate) fn mark_running(&self) {
        let mut state = self.lock();
        if state.lifecycle == LifecycleState::Started {
            state.lifecycle = LifecycleState::Running;
        }
    }

    /// Stops the stage. Idempotent: the operator's `stop` hook runs at most
    /// once, and only if its `start` hook succeeded.
    ///
    /// # Errors
    ///
    /// Whatever the operator's `stop` hook returns.
    pub async fn stop(&self) -> Result<(), OperatorError> {
        let call_hook = {
            let mut state = self.lock();
            if state.lifecycle == LifecycleState::Stopped {
                return Ok(());
            }
            state.lifecycle = LifecycleState::Stopped;
            state.started
        };

        if !call_hook {
            return Ok(());
        }
        let result = self.operator.stop().await;
        match &result {
            Ok(()) => debug!("PIPELINE | Stopped operator {}", self.id),
            Err(err) => warn!("PIPELINE | Operator {} failed to stop cleanly: {}", self.id, err),
        }
        result
    }
}

#[async_trait]
impl EntrySink for Stage {
    async fn consume(&self, cancel: &CancellationToken, entry: Entry) -> Result<(), ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }
        let current = self.state();
        if current != LifecycleState::Running {
            return Err(ProcessError::NotRunning {
                id: self.id.clone(),
                state: current,
            });
        }

        let result = self.operator.process(cancel, entry).await;
        if let Err(ProcessError::Unrecoverable { id, reason }) = &result {
            // errors raised further down the chain belong to those stages
            if id == &self.id {
                let mut state = self.lock();
                if state.lifecycle == LifecycleState::Running {
                    state.lifecycle = LifecycleState::Failed;
                    error!("PIPELINE | Operator {} failed: {}", self.id, reason);
                }
            }
        }
        result
    }
}
