//! Backward-data pass of a multi-layer GRU.

mod api;
mod backend;
mod helpers;
mod kernel;
mod launch;
mod stage;
mod types;

#[cfg(test)]
mod tests;

pub use api::{GruBackwardGrads, GruBackwardInputs, fused_gru_backward};
pub use backend::GruBackwardBackend;
pub use helpers::{
    GruParams, NarrowParams, Params, WideParams, cube_dim, cube_units, validate_params,
};
pub use kernel::gru_backward_kernel;
pub use launch::{backward, launch_gru_backward};
pub use types::{
    GradDest, GradSource, GruInputs, GruKernelConfig, GruOutputs, GruSaved, GruScratch,
    LayerRoles, layer_schedule,
};
