// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered chain of operator stages ending at the converter.
//!
//! ```text
//!  process ──> stage[0] ──> stage[1] ──> ... ──> stage[n-1] ──> converter
//! ```
//!
//! Stages start in chain order and stop in reverse order. A failed start
//! rolls back the stages that already started.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::SCOPE_SEPARATOR;
use crate::entry::Entry;
use crate::error_bus::{ErrorReporter, ReportedError};
use crate::errors::{ConfigError, StartError, StopErrors};
use crate::operator::{EntrySink, LifecycleState, Operator, OperatorConfig, Output, Registry, Stage};
use crate::persister::{Persister, ScopedPersister};

/// Output id of the last stage. Reserved: configs may name it as an
/// explicit `output` but not use it as an operator id.
pub const CONVERTER_OUTPUT_ID: &str = "converter";

pub struct Pipeline {
    stages: Vec<Arc<Stage>>,
    reporter: ErrorReporter,
}

impl Pipeline {
    /// Resolves the chain described by `configs`, builds every operator
    /// and wires the tail to `sink`.
    ///
    /// # Errors
    ///
    /// Any chain validation failure, or the first operator that fails to
    /// build.
    pub fn from_configs(
        configs: &[OperatorConfig],
        registry: &Registry,
        sink: Arc<dyn EntrySink>,
        reporter: ErrorReporter,
    ) -> Result<Self, ConfigError> {
        let order = resolve_chain(configs)?;
        let operators = order
            .into_iter()
            .map(|idx| registry.build(&configs[idx]))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(operators, sink, reporter)
    }

    /// Wires already built operators in the given order.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EmptyPipeline`], [`ConfigError::DuplicateId`], or
    /// [`ConfigError::InvalidOperator`] for an id that cannot be used.
    pub fn new(
        mut operators: Vec<Box<dyn Operator>>,
        sink: Arc<dyn EntrySink>,
        reporter: ErrorReporter,
    ) -> Result<Self, ConfigError> {
        if operators.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }
        let mut seen = HashSet::with_capacity(operators.len());
        for operator in &operators {
            validate_id(operator.id())?;
            if !seen.insert(operator.id().to_string()) {
                return Err(ConfigError::DuplicateId(operator.id().to_string()));
            }
        }

        // wire from the tail so each stage exists before its upstream needs it
        let mut stages = Vec::with_capacity(operators.len());
        let mut next = Output::new(CONVERTER_OUTPUT_ID, sink);
        while let Some(mut operator) = operators.pop() {
            operator.set_output(next);
            let stage = Arc::new(Stage::new(operator));
            let as_sink: Arc<dyn EntrySink> = stage.clone();
            next = Output::new(stage.id(), as_sink);
            stages.push(stage);
        }
        stages.reverse();

        debug!(
            "PIPELINE | Built chain: {}",
            stages.iter().map(|s| s.id()).collect::<Vec<_>>().join(" -> ")
        );
        Ok(Pipeline { stages, reporter })
    }

    #[must_use]
    pub fn stages(&self) -> &[Arc<Stage>] {
        &self.stages
    }

    /// Stage ids in chain order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id()).collect()
    }

    #[must_use]
    pub fn states(&self) -> Vec<LifecycleState> {
        self.stages.iter().map(|s| s.state()).collect()
    }

    /// Starts every stage in chain order, each with its own scope of
    /// `persister`. Stages only move to `Running` once all of them started.
    ///
    /// # Errors
    ///
    /// The first stage's [`StartError`]; the stages started before it have
    /// been stopped again in reverse order.
    pub async fn start_all(&self, persister: Arc<dyn Persister>) -> Result<(), StartError> {
        for (idx, stage) in self.stages.iter().enumerate() {
            let scoped: Arc<dyn Persister> =
                Arc::new(ScopedPersister::new(Arc::clone(&persister), stage.id()));
            if let Err(err) = stage.start(scoped).await {
                warn!(
                    "PIPELINE | Rolling back {} started operator(s) after {} failed",
                    idx,
                    stage.id()
                );
                for started in self.stages[..idx].iter().rev() {
                    if let Err(stop_err) = started.stop().await {
                        warn!("PIPELINE | Rollback of {} failed: {}", started.id(), stop_err);
                    }
                }
                return Err(err);
            }
        }

        for stage in &self.stages {
            stage.mark_running();
        }
        info!("PIPELINE | Started {} operator(s)", self.stages.len());
        Ok(())
    }

    /// Stops every stage in reverse chain order. Never stops early.
    ///
    /// # Errors
    ///
    /// One [`StopErrors`] entry per stage whose stop hook failed.
    pub async fn stop_all(&self) -> Result<(), StopErrors> {
        let mut errors = StopErrors::default();
        for stage in self.stages.iter().rev() {
            if let Err(err) = stage.stop().await {
                errors.push(format!("operator {}", stage.id()), err);
            }
        }
        debug!("PIPELINE | Stopped {} operator(s)", self.stages.len());
        errors.into_result()
    }

    /// Feeds `entry` to the head of the chain. Failures are reported on the
    /// error bus, cancellation is not.
    pub async fn process(&self, cancel: &CancellationToken, entry: Entry) {
        let Some(head) = self.stages.first() else {
            return;
        };
        match head.consume(cancel, entry).await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {
                debug!("PIPELINE | Entry dropped, processing cancelled");
            }
            Err(err) => {
                debug!("PIPELINE | Entry failed: {}", err);
                self.reporter.report(ReportedError::Process(err));
            }
        }
    }
}

/// Operator ids double as persister scopes, so a separator inside an id
/// would let two operators address the same checkpoint keys.
fn validate_id(id: &str) -> Result<(), ConfigError> {
    let reason = if id.is_empty() {
        "id must not be empty".to_string()
    } else if id == CONVERTER_OUTPUT_ID {
        "id is reserved for the converter".to_string()
    } else if id.contains(SCOPE_SEPARATOR) {
        format!("id must not contain {SCOPE_SEPARATOR:?}")
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidOperator {
        id: id.to_string(),
        reason,
    })
}

/// Orders `configs` into a single chain, returning config indices from
/// head to tail.
///
/// A stage without `output` feeds the next config in the list; the last
/// one feeds the converter, as does any stage whose `output` is
/// [`CONVERTER_OUTPUT_ID`].
///
/// # Errors
///
/// The first chain violation found.
pub fn resolve_chain(configs: &[OperatorConfig]) -> Result<Vec<usize>, ConfigError> {
    if configs.is_empty() {
        return Err(ConfigError::EmptyPipeline);
    }

    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(configs.len());
    for (idx, config) in configs.iter().enumerate() {
        validate_id(config.id())?;
        if index_of.insert(config.id(), idx).is_some() {
            return Err(ConfigError::DuplicateId(config.id().to_string()));
        }
    }

    let mut next: Vec<Option<usize>> = Vec::with_capacity(configs.len());
    for (idx, config) in configs.iter().enumerate() {
        let target = match &config.output {
            Some(output) if output == CONVERTER_OUTPUT_ID => None,
            Some(output) => Some(*index_of.get(output.as_str()).ok_or_else(|| {
                ConfigError::UnknownOutput {
                    id: config.id().to_string(),
                    output: output.clone(),
                }
            })?),
            None if idx + 1 < configs.len() => Some(idx + 1),
            None => None,
        };
        next.push(target);
    }

    let mut in_degree = vec![0_usize; configs.len()];
    for target in next.iter().flatten() {
        in_degree[*target] += 1;
        if in_degree[*target] > 1 {
            return Err(ConfigError::FanIn(configs[*target].id().to_string()));
        }
    }

    let heads: Vec<usize> = (0..configs.len()).filter(|i| in_degree[*i] == 0).collect();
    let head = match heads.as_slice() {
        [] => return Err(ConfigError::Cycle),
        [head] => *head,
        _ => {
            let sinks = (0..configs.len())
                .filter(|i| next[*i].is_none())
                .map(|i| configs[i].id().to_string())
                .collect();
            return Err(ConfigError::MultipleSinks(sinks));
        }
    };

    let mut order = Vec::with_capacity(configs.len());
    let mut cursor = Some(head);
    // in-degree <= 1 means the walk from the head can never revisit a stage
    while let Some(idx) = cursor {
        order.push(idx);
        cursor = next[idx];
    }
    // a lone head that does not reach every stage leaves a detached cycle
    if order.len() != configs.len() {
        return Err(ConfigError::Cycle);
    }
    Ok(order)
}
