// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::constants::SCOPE_SEPARATOR;
use crate::errors::PersisterError;
use crate::persister::{Operation, Persister};

/// Prefixes every key with a scope so that operators sharing one backend
/// never see each other's checkpoints.
///
/// Closing a scope only closes the scope; the backend stays open for its
/// owner to close.
pub struct ScopedPersister {
    inner: Arc<dyn Persister>,
    scope: String,
    closed: AtomicBool,
}

impl ScopedPersister {
    pub fn new(inner: Arc<dyn Persister>, scope: impl Into<String>) -> Self {
        ScopedPersister {
            inner,
            scope: scope.into(),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}{SCOPE_SEPARATOR}{key}", self.scope)
    }

    fn ensure_open(&self) -> Result<(), PersisterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PersisterError::Closed);
        }
        Ok(())
    }
}

impl Persister for ScopedPersister {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersisterError> {
        self.ensure_open()?;
        self.inner.get(&self.scoped_key(key))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersisterError> {
        self.ensure_open()?;
        self.inner.set(&self.scoped_key(key), value)
    }

    fn delete(&self, key: &str) -> Result<(), PersisterError> {
        self.ensure_open()?;
        self.inner.delete(&self.scoped_key(key))
    }

    fn batch(&self, ops: &mut [Operation]) -> Result<(), PersisterError> {
        self.ensure_open()?;
        let mut scoped: Vec<Operation> = ops
            .iter()
            .map(|op| Operation {
                kind: op.kind,
                key: self.scoped_key(&op.key),
                value: op.value.clone(),
            })
            .collect();
        self.inner.batch(&mut scoped)?;

        for (op, result) in ops.iter_mut().zip(scoped) {
            op.value = result.value;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), PersisterError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
