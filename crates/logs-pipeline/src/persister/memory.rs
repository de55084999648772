// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::errors::PersisterError;
use crate::persister::{validate_batch, Operation, OperationKind, Persister};

/// Process-local persister. Checkpoints do not survive a restart.
#[derive(Debug)]
pub struct MemoryPersister {
    // `None` once closed
    cache: Mutex<Option<HashMap<String, Vec<u8>>>>,
}

impl Default for MemoryPersister {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPersister {
    #[must_use]
    pub fn new() -> Self {
        MemoryPersister {
            cache: Mutex::new(Some(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<HashMap<String, Vec<u8>>>> {
        #[allow(clippy::expect_used)]
        self.cache.lock().expect("lock poisoned")
    }
}

impl Persister for MemoryPersister {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersisterError> {
        let guard = self.lock();
        let cache = guard.as_ref().ok_or(PersisterError::Closed)?;
        Ok(cache.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersisterError> {
        let mut guard = self.lock();
        let cache = guard.as_mut().ok_or(PersisterError::Closed)?;
        cache.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersisterError> {
        let mut guard = self.lock();
        let cache = guard.as_mut().ok_or(PersisterError::Closed)?;
        cache.remove(key);
        Ok(())
    }

    fn batch(&self, ops: &mut [Operation]) -> Result<(), PersisterError> {
        let mut guard = self.lock();
        let cache = guard.as_mut().ok_or(PersisterError::Closed)?;
        validate_batch(ops)?;

        for op in ops.iter_mut() {
            match op.kind {
                OperationKind::Get => op.value = cache.get(&op.key).cloned(),
                OperationKind::Set => {
                    cache.insert(op.key.clone(), op.value.clone().unwrap_or_default());
                }
                OperationKind::Delete => {
                    cache.remove(&op.key);
                }
                // rejected by validate_batch
                OperationKind::Unknown => {}
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), PersisterError> {
        self.lock().take();
        Ok(())
    }
}
