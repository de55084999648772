// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Checkpoint storage for operators.
//!
//! [`Persister`] is the contract every backend implements: single-key
//! get/set/delete, an atomic multi-operation [`Persister::batch`], and
//! [`Persister::close`]. Backends:
//!
//! - [`MemoryPersister`]: process-local map, used when no storage
//!   directory is configured
//! - [`SledPersister`]: durable store on disk
//! - [`ScopedPersister`]: key prefixing wrapper handed to each operator

use serde::{Deserialize, Serialize};

use crate::errors::PersisterError;

mod memory;
mod scoped;
mod sled_store;

pub use memory::MemoryPersister;
pub use scoped::ScopedPersister;
pub use sled_store::SledPersister;

/// Kind of one operation inside a [`Persister::batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Get,
    Set,
    Delete,
    /// Any kind this version does not understand. A batch containing one
    /// is rejected as a whole.
    #[serde(other)]
    Unknown,
}

/// One operation of an atomic batch.
///
/// For [`OperationKind::Get`] the backend writes the result into `value`
/// (`None` when the key is absent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub key: String,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

impl Operation {
    pub fn get(key: impl Into<String>) -> Self {
        Operation {
            kind: OperationKind::Get,
            key: key.into(),
            value: None,
        }
    }

    pub fn set(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Operation {
            kind: OperationKind::Set,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Operation {
            kind: OperationKind::Delete,
            key: key.into(),
            value: None,
        }
    }
}

/// Storage contract for operator checkpoints.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn Persister>`
/// and must serialize all calls so that a batch is never interleaved with
/// another operation.
pub trait Persister: Send + Sync {
    /// Returns `Ok(None)` when nothing was stored under `key`.
    ///
    /// # Errors
    ///
    /// [`PersisterError::Closed`] after [`Persister::close`], or a backend error.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersisterError>;

    /// # Errors
    ///
    /// [`PersisterError::Closed`] after [`Persister::close`], or a backend error.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersisterError>;

    /// Deleting an absent key succeeds.
    ///
    /// # Errors
    ///
    /// [`PersisterError::Closed`] after [`Persister::close`], or a backend error.
    fn delete(&self, key: &str) -> Result<(), PersisterError>;

    /// Applies `ops` in order as one atomic unit.
    ///
    /// # Errors
    ///
    /// [`PersisterError::UnknownOperation`] if any operation has an unknown
    /// kind, in which case none of them is applied.
    fn batch(&self, ops: &mut [Operation]) -> Result<(), PersisterError>;

    /// Releases the backend. Later calls fail with [`PersisterError::Closed`].
    ///
    /// # Errors
    ///
    /// Backend errors while flushing.
    fn close(&self) -> Result<(), PersisterError>;
}

/// Rejects the batch if any operation kind is unknown, before anything is
/// applied.
pub(crate) fn validate_batch(ops: &[Operation]) -> Result<(), PersisterError> {
    match ops
        .iter()
        .position(|op| op.kind == OperationKind::Unknown)
    {
        Some(index) => Err(PersisterError::UnknownOperation {
            index,
            key: ops[index].key.clone(),
        }),
        None => Ok(()),
    }
}
