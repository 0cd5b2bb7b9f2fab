// Errors — Everything a step, a constructor, or a checkpoint load can reject
//
// Three failures belong to the optimizer proper:
//   - stepping a group that is in eval mode
//   - a state buffer whose shape disagrees with its parameter
//   - invalid hyperparameters at construction
//
// The remaining variants cover checkpoint restore and variant selection by
// name. Numerical corner cases (step 1 debiasing, zero-length warmups) are
// handled in the formulas themselves and never surface here.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, OptimError>;

/// Error type for optimizer construction, stepping and state restore.
#[derive(Debug, Error)]
pub enum OptimError {
    /// `step()` was called while a group with pending gradients is in eval mode.
    #[error("parameter group {group} is not in train mode")]
    Mode { group: usize },

    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("incompatible optimizer state: {0}")]
    StateDict(String),

    /// A variant asked for a buffer it never allocated.
    #[error("state `{0}` is not allocated")]
    MissingState(&'static str),

    #[error("unknown optimizer variant `{0}`")]
    UnknownVariant(String),
}

impl OptimError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        OptimError::Configuration(msg.into())
    }

    pub(crate) fn shape(what: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        OptimError::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
