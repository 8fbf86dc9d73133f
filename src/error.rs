//! Crate error taxonomy.
//!
//! `NotFound` and `InvalidArgument` reject a single request. `CycleDetected`
//! marks a data-integrity fault in the strategy tree and should never be
//! reachable on a well-maintained database. Ratio/average computations with
//! a zero denominator return `None` from their call sites instead of an
//! error variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("strategy lineage cycle detected at id {0}")]
    CycleDetected(i64),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        AppError::InvalidArgument(msg.into())
    }
}
