use core::fmt::Debug;

use thiserror::Error;

/// Errors detected by the store itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A result moved a bound in the wrong direction, produced an
    /// incomparable value, or tried to change a final property. The analysis
    /// producing it is unsound, so this is always fatal to the phase.
    #[error("invariant violated for {epk}: {message}")]
    InvariantViolation { epk: String, message: String },

    /// The store was used in a way that can never work, e.g., scheduling
    /// after the phase was closed. Reported by the offending call.
    #[error("scheduler misuse: {0}")]
    SchedulerMisuse(String),
}

impl StoreError {
    pub(crate) fn misuse(message: impl Into<String>) -> Self {
        StoreError::SchedulerMisuse(message.into())
    }
}

/// Errors raised by analysis code. Panics inside computations are caught and
/// reported as [`ComputationError::Panicked`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputationError {
    #[error("{0}")]
    Failed(String),

    #[error("computation panicked: {0}")]
    Panicked(String),
}

impl ComputationError {
    pub fn msg(message: impl Into<String>) -> Self {
        ComputationError::Failed(message.into())
    }
}

/// Why a single computation made the phase fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Computation(#[from] ComputationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A computation that failed, with the entity it was running for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure<E> {
    pub entity: E,
    pub kind: &'static str,
    pub cause: FailureCause,
    /// Debug rendering of the continuation that was running, empty for
    /// initial computations.
    pub continuation: String,
}

/// The result of a phase that did not converge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError<E: Debug> {
    /// At least one computation failed. Properties that were already final
    /// stay valid, interim ones are left unresolved.
    #[error("phase failed, {} computation(s) did not complete", failures.len())]
    Failed { failures: Vec<Failure<E>> },

    /// The interruption check fired before the phase was done.
    #[error("phase interrupted after {executed} task(s)")]
    Interrupted { executed: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl<E: Debug> PhaseError<E> {
    pub fn failures(&self) -> &[Failure<E>] {
        match self {
            PhaseError::Failed { failures } => failures,
            _ => &[],
        }
    }
}
