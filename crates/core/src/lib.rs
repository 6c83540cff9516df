//! GRU backward-data: configuration, buffer shapes, errors and the scalar
//! reference the fused kernel is checked against.

#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::many_single_char_names,
    clippy::similar_names,
    clippy::too_many_lines
)]

pub mod config;
pub mod error;
pub mod reference;
pub mod shape;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{GruBackwardConfig, GruTiling, MAX_PREFETCH_DISTANCE};
pub use error::GruError;
pub use shape::{GruShape, StridedLayout};
