//! Error taxonomy shared by the engines.
//!
//! Store failures are split by direction so callers can decide how to
//! degrade: a failed read in the statistics path yields zeroed or cached
//! results, a failed write is reported to the caller and retried by the
//! next signal or tick.

use thiserror::Error;

use crate::types::ValidationError;

/// Errors returned by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Reading from the store failed.
    #[error("store read failed: {0}")]
    Read(String),

    /// Writing to the store failed.
    #[error("store write failed: {0}")]
    Write(String),

    /// The addressed record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The write would violate a uniqueness constraint.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from scene tag management.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TagError {
    /// A tag with this exact name already exists.
    #[error("a tag named {0:?} already exists")]
    DuplicateName(String),

    /// Default tags cannot be deleted.
    #[error("default tag {0:?} cannot be deleted")]
    DefaultTagProtected(String),

    /// Invalid tag input.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The scheduler runtime refused to accept the next tick.
///
/// Never retried immediately; the next external wakeup tries again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to schedule background tick: {0}")]
pub struct SchedulingError(pub String);
