// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain error taxonomy for operation mutations.
use fieldplan_core::{DocumentError, OperationId};
use thiserror::Error;

use crate::sqlite::SqliteError;

/// Failure modes of the synchronization engine, assignment workflow and per-item setters.
///
/// Permission and validation failures are terminal: retrying the identical call will fail again.
/// Storage failures may be transient and callers decide whether to retry; the engine itself
/// never retries and never leaves partial state behind (the active transaction is rolled back).
#[derive(Error, Debug)]
pub enum OpError {
    /// The acting agent does not hold the access level the call requires.
    #[error("permission denied")]
    PermissionDenied,

    /// Operation or child entity id does not exist.
    #[error("operation or entity not found")]
    NotFound,

    /// Malformed or referentially inconsistent document. Nothing was applied.
    #[error("invalid operation document: {0}")]
    InvalidDocument(#[from] DocumentError),

    /// An operation with this id already exists.
    #[error("operation '{0}' already exists")]
    Conflict(OperationId),

    /// Acknowledge or reject called on a marker without an assignee.
    #[error("marker is not assigned")]
    NotAssigned,

    /// An assignee-only action was attempted by a different agent.
    #[error("assigned to a different agent")]
    WrongAssignee,

    /// Underlying database failure.
    #[error(transparent)]
    Storage(#[from] SqliteError),
}

impl OpError {
    /// Whether a retry of the same call could succeed.
    ///
    /// Only storage failures qualify; permission, validation and state-machine failures are
    /// deterministic.
    pub fn is_transient(&self) -> bool {
        matches!(self, OpError::Storage(_))
    }
}

impl From<sqlx::Error> for OpError {
    fn from(err: sqlx::Error) -> Self {
        OpError::Storage(SqliteError::Sqlite(err))
    }
}
