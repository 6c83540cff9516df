use burn::tensor::{backend::Backend, ops::FloatTensor};
use burn_cubecl::{BoolElement, CubeBackend, CubeRuntime, FloatElement, IntElement};
use gru_core::{GruBackwardConfig, GruError};

use super::{launch::backward, types::GruSaved};

/// Backends that can run the fused GRU backward-data kernel.
pub trait GruBackwardBackend: Backend {
    /// Returns `(x_grad, x0_grad)`.
    fn gru_backward(
        saved: GruSaved<FloatTensor<Self>>,
        config: &GruBackwardConfig,
    ) -> Result<(FloatTensor<Self>, FloatTensor<Self>), GruError>;
}

impl<R, F, I, BT> GruBackwardBackend for CubeBackend<R, F, I, BT>
where
    R: CubeRuntime,
    F: FloatElement,
    I: IntElement,
    BT: BoolElement,
{
    fn gru_backward(
        saved: GruSaved<FloatTensor<Self>>,
        config: &GruBackwardConfig,
    ) -> Result<(FloatTensor<Self>, FloatTensor<Self>), GruError> {
        backward::<R, F>(saved, config)
    }
}
