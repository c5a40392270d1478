//! Error taxonomy for the solver.
//!
//! Arena exhaustion, failed reservations and null handle dereferences are
//! fatal. Checkpoint writes are recoverable: the previous checkpoint stays on
//! disk and the search keeps running.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("arena out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("failed to reserve a {bytes} byte arena: {source}")]
    ReservationFailed {
        bytes: usize,
        #[source]
        source: io::Error,
    },

    #[error("null relative handle dereferenced")]
    NullHandle,

    #[error("checkpoint write to {} failed: {source}", path.display())]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("restore from {} failed: {reason}", path.display())]
    Restore { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SolverError {
    /// Whether the process must stop after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SolverError::CheckpointWrite { .. })
    }

    pub(crate) fn restore(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SolverError::Restore {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = SolverError> = std::result::Result<T, E>;
