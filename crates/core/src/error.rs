use thiserror::Error;

/// Errors reported at the host boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GruError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dropout probability must be in [0, 1), got {0}")]
    InvalidDropout(f32),

    #[error("tensor `{tensor}` has shape {actual:?}, expected {expected:?}")]
    TensorShape {
        tensor: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("tile configuration mismatch: {0}")]
    TileConfig(String),

    #[error("kernel launch failed: {0}")]
    Launch(String),
}
