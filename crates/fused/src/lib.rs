#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(
    clippy::similar_names,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::many_single_char_names,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::too_many_lines,
    clippy::type_complexity
)]

//! Fused GRU backward-data kernel
//!
//! One launch runs the whole multi-layer, multi-step backward-data pass of a
//! GRU: per step, the gate derivatives are fused into the packed `bpi0`/`bpi1`
//! scratch, and two accumulate-matmuls produce the carried hidden error and
//! the layer input gradient. Layers hand their input gradient down through a
//! two-half ping-pong buffer. Each cube owns a block of batch rows for the
//! whole launch.
//!
//! - [`launch_gru_backward`] - device buffers in, kernel run in place
//! - [`fused_gru_backward`] - burn tensors in and out

pub mod gru_backward;

pub use gru_backward::{
    GruBackwardBackend, GruBackwardGrads, GruBackwardInputs, GruParams, GruSaved, GruScratch,
    NarrowParams, Params, WideParams, fused_gru_backward, launch_gru_backward,
};
