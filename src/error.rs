use thiserror::Error;

use crate::time_adapter::TimestepMode;

/// Errors reported by the S5 encoder at construction or at the first forward call.
///
/// Numeric problems (NaN/Inf from an unstable parameter set) are not errors;
/// they propagate through the tensors to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum S5Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Timestamp shape mismatch: expected {expected:?}, got {actual:?}")]
    TimestampShape { expected: [usize; 2], actual: [usize; 2] },

    #[error("Mask shape mismatch: expected {expected:?}, got {actual:?}")]
    MaskShape { expected: [usize; 2], actual: [usize; 2] },

    #[error("Input dimension mismatch: expected {expected}, got {actual}")]
    InputDim { expected: usize, actual: usize },

    #[error("Timestep mode {0:?} needs per-step timestamps")]
    MissingTimestamps(TimestepMode),
}

pub type Result<T, E = S5Error> = std::result::Result<T, E>;
