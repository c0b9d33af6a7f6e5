//! Error types for FSP solver operations.

use crate::state::State;

/// Errors raised while building or driving a truncated CME solve.
///
/// Insufficient truncation accuracy is not an error: it triggers domain
/// expansion inside [`crate::fsp::FspSolver::advance`].
#[derive(Debug, thiserror::Error)]
pub enum FspError {
    /// The same state appeared twice while building a state index map.
    #[error("duplicate state {state} in domain")]
    DuplicateState { state: State },

    /// A state lookup missed the domain.
    #[error("state {state} is not in the domain")]
    NotInDomain { state: State },

    /// Error accumulator wiring does not fit the declared accumulator size.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// The expansion strategy did not strictly grow the domain.
    #[error("domain expansion failed: {0}")]
    ExpansionFailure(String),

    /// An error budget outside its admissible range.
    #[error("epsilon {epsilon} outside admissible range {range}")]
    InvalidEpsilon { epsilon: f64, range: &'static str },

    /// Malformed model, initial condition or configuration.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// The integrator could not reach the requested time.
    #[error("integration failed: {0}")]
    Integration(String),
}

pub type Result<T> = std::result::Result<T, FspError>;
