// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Config as SledConfig, Db};
use tracing::debug;

use crate::errors::PersisterError;
use crate::persister::{validate_batch, Operation, OperationKind, Persister};

/// Durable persister backed by an embedded sled database.
///
/// Every mutating call is flushed before it returns so a checkpoint that
/// was acknowledged survives a crash.
#[derive(Debug)]
pub struct SledPersister {
    // `None` once closed
    db: Mutex<Option<Db>>,
    path: PathBuf,
}

impl SledPersister {
    /// Opens (or creates) the database directory at `path`.
    ///
    /// # Errors
    ///
    /// Filesystem errors creating parent directories, or sled errors opening
    /// the database (including a lock held by another process).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersisterError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                // sled does not create intermediate directories
                fs::create_dir_all(parent)?;
            }
        }

        let db = SledConfig::new()
            .path(&path)
            .cache_capacity(16 * 1024 * 1024)
            .open()?;
        debug!("PERSISTER | Opened sled database at {}", path.display());

        Ok(SledPersister {
            db: Mutex::new(Some(db)),
            path,
        })
    }

    /// Directory backing the database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<Db>> {
        #[allow(clippy::expect_used)]
        self.db.lock().expect("lock poisoned")
    }
}

impl Persister for SledPersister {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersisterError> {
        let guard = self.lock();
        let db = guard.as_ref().ok_or(PersisterError::Closed)?;
        Ok(db.get(key.as_bytes())?.map(|value| value.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersisterError> {
        let guard = self.lock();
        let db = guard.as_ref().ok_or(PersisterError::Closed)?;
        db.insert(key.as_bytes(), value)?;
        db.flush()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersisterError> {
        let guard = self.lock();
        let db = guard.as_ref().ok_or(PersisterError::Closed)?;
        db.remove(key.as_bytes())?;
        db.flush()?;
        Ok(())
    }

    fn batch(&self, ops: &mut [Operation]) -> Result<(), PersisterError> {
        let guard = self.lock();
        let db = guard.as_ref().ok_or(PersisterError::Closed)?;
        validate_batch(ops)?;

        // The closure may run more than once on conflict, so reads are
        // collected per attempt and copied out after commit.
        let reads = db
            .transaction(|tx| {
                let mut reads = Vec::with_capacity(ops.len());
                for op in ops.iter() {
                    match op.kind {
                        OperationKind::Get => {
                            reads.push(tx.get(op.key.as_bytes())?.map(|v| v.to_vec()));
                        }
                        OperationKind::Set => {
                            tx.insert(op.key.as_bytes(), op.value.as_deref().unwrap_or_default())?;
                            reads.push(None);
                        }
                        OperationKind::Delete => {
                            tx.remove(op.key.as_bytes())?;
                            reads.push(None);
                        }
                        OperationKind::Unknown => {
                            return Err(ConflictableTransactionError::Abort(op.key.clone()));
                        }
                    }
                }
                Ok(reads)
            })
            .map_err(|err| match err {
                TransactionError::Abort(key) => {
                    PersisterError::Transaction(format!("unknown operation on key {key:?}"))
                }
                TransactionError::Storage(err) => PersisterError::Backend(err),
            })?;
        db.flush()?;

        for (op, read) in ops.iter_mut().zip(reads) {
            if op.kind == OperationKind::Get {
                op.value = read;
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), PersisterError> {
        if let Some(db) = self.lock().take() {
            db.flush()?;
            debug!("PERSISTER | Closed sled database at {}", self.path.display());
        }
        Ok(())
    }
}
