//! Tensor-level API for the fused GRU backward-data kernel.

use burn::tensor::{Tensor, TensorPrimitive, backend::Backend};
use gru_core::{GruBackwardConfig, GruError};

use super::{backend::GruBackwardBackend, types::GruSaved};

/// Saved forward state and incoming errors of one backward-data pass.
#[derive(Debug, Clone)]
pub struct GruBackwardInputs<B: Backend> {
    /// `[L, B, H]`
    pub layer_err: Tensor<B, 3>,
    /// `[T, B, H]`
    pub y_err: Tensor<B, 3>,
    /// `[L, T, B, H]`
    pub reset_gate: Tensor<B, 4>,
    /// `[L, T, B, H]`
    pub input_gate: Tensor<B, 4>,
    /// `[L, T, B, H]`
    pub new_gate: Tensor<B, 4>,
    /// `[L, T, B, H]`
    pub hgate_2: Tensor<B, 4>,
    /// `[L, T + 1, B, H]`
    pub hidden: Tensor<B, 4>,
    /// Packed input weights, `[3IH + 3(L - 1)H^2]`
    pub i_weights: Tensor<B, 1>,
    /// Packed hidden weights, `[3LH^2]`
    pub h_weights: Tensor<B, 1>,
    /// `[L - 1, T, B, H]` keep-mask, required when dropout applies
    pub mask: Option<Tensor<B, 4>>,
}

#[derive(Debug, Clone)]
pub struct GruBackwardGrads<B: Backend> {
    /// `[T, B, I]`
    pub x_grad: Tensor<B, 3>,
    /// `[L, B, H]`
    pub x0_grad: Tensor<B, 3>,
}

/// Runs the fused backward-data pass.
///
/// Every tensor is checked against `config` before anything is launched.
/// The gradients come back on the device of `y_err`.
pub fn fused_gru_backward<B: GruBackwardBackend>(
    inputs: GruBackwardInputs<B>,
    config: &GruBackwardConfig,
) -> Result<GruBackwardGrads<B>, GruError> {
    config.validate()?;
    let s = config.shape();
    let (l, t, b, h) = (s.layers, s.seq, s.batch, s.hidden);

    check_dims("layer_err", &inputs.layer_err, [l, b, h])?;
    check_dims("y_err", &inputs.y_err, [t, b, h])?;
    check_dims("reset_gate", &inputs.reset_gate, [l, t, b, h])?;
    check_dims("input_gate", &inputs.input_gate, [l, t, b, h])?;
    check_dims("new_gate", &inputs.new_gate, [l, t, b, h])?;
    check_dims("hgate_2", &inputs.hgate_2, [l, t, b, h])?;
    check_dims("hidden", &inputs.hidden, [l, t + 1, b, h])?;
    check_dims("i_weights", &inputs.i_weights, [s.input_weights_len()])?;
    check_dims("h_weights", &inputs.h_weights, [s.hidden_weights_len()])?;

    let mask = match (config.applies_dropout(), inputs.mask) {
        (true, Some(mask)) => {
            check_dims("mask", &mask, [l - 1, t, b, h])?;
            mask
        }
        (true, None) => {
            return Err(GruError::InvalidConfig(format!(
                "dropout {} over {l} layers needs a keep-mask",
                config.dropout
            )));
        }
        // never read without dropout
        (false, _) => Tensor::zeros([1, 1, 1, 1], &inputs.y_err.device()),
    };

    let saved = GruSaved {
        layer_err: inputs.layer_err.into_primitive().tensor(),
        y_err: inputs.y_err.into_primitive().tensor(),
        reset_gate: inputs.reset_gate.into_primitive().tensor(),
        input_gate: inputs.input_gate.into_primitive().tensor(),
        new_gate: inputs.new_gate.into_primitive().tensor(),
        hgate_2: inputs.hgate_2.into_primitive().tensor(),
        hidden: inputs.hidden.into_primitive().tensor(),
        i_weights: inputs.i_weights.into_primitive().tensor(),
        h_weights: inputs.h_weights.into_primitive().tensor(),
        mask: mask.into_primitive().tensor(),
    };

    let (x_grad, x0_grad) = B::gru_backward(saved, config)?;
    Ok(GruBackwardGrads {
        x_grad: Tensor::from_primitive(TensorPrimitive::Float(x_grad)),
        x0_grad: Tensor::from_primitive(TensorPrimitive::Float(x0_grad)),
    })
}

fn check_dims<B: Backend, const D: usize>(
    tensor: &'static str,
    value: &Tensor<B, D>,
    expected: [usize; D],
) -> Result<(), GruError> {
    let actual = value.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(GruError::TensorShape {
            tensor,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}
