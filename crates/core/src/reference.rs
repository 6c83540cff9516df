//! Scalar GRU forward and backward-data, accumulating in `f64`.
//!
//! # Mathematical Structure
//!
//! Per layer and step, with `x` the layer input and `h` the incoming state:
//!
//! ```text
//! r  = sigmoid(W_ir x + b_ir + W_hr h + b_hr)
//! z  = sigmoid(W_iz x + b_iz + W_hz h + b_hz)
//! g2 = W_hn h + b_hn
//! n  = tanh(W_in x + b_in + r * g2)
//! h' = (1 - z) * n + z * h
//! ```
//!
//! Given the incoming error `dh` on `h'` (carried error plus the error of the
//! layer output at this step), the gate derivatives are
//!
//! ```text
//! da_n = dh * (1 - z) * (1 - n^2)
//! dz   = dh * (h - n) * z * (1 - z)
//! dg2  = da_n * r
//! dr   = da_n * g2 * r * (1 - r)
//! ```
//!
//! packed per row as `bpi0 = [dr, dz, dg2]` and `bpi1 = [dr, dz, da_n]`, so
//! that `dh_prev = dh * z + bpi0 W_h` and `dx = bpi1 W_i`.
//!
//! Between layers the forward pass applies the keep-mask and `1 / (1 - p)`,
//! so the input gradient of layer `l >= 1` is rescaled the same way before it
//! becomes the output error of layer `l - 1`.

use tracing::debug;

use crate::shape::GruShape;

/// GRU parameters in the packed layout described in [`crate::shape`].
#[derive(Debug, Clone, PartialEq)]
pub struct GruWeights {
    pub input: Vec<f32>,
    pub hidden: Vec<f32>,
    /// `[L, 3H]`
    pub input_bias: Vec<f32>,
    /// `[L, 3H]`
    pub hidden_bias: Vec<f32>,
}

/// Everything the forward pass saves for the backward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct GruActivations {
    pub reset_gate: Vec<f32>,
    pub input_gate: Vec<f32>,
    pub new_gate: Vec<f32>,
    pub hgate_2: Vec<f32>,
    pub hidden: Vec<f32>,
    /// Top layer output sequence `[T, B, H]`.
    pub output: Vec<f32>,
}

/// Reference results of the backward-data pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGrads {
    /// `[T, B, I]`
    pub x_grad: Vec<f32>,
    /// `[L, B, H]`
    pub x0_grad: Vec<f32>,
    /// Input gradient of each layer, `[T, B, input_width(l)]`, after the
    /// dropout rescale for `l >= 1`.
    pub layer_input_grads: Vec<Vec<f32>>,
    /// `[L, T, B, 3H]`
    pub bpi0: Vec<f32>,
    /// `[L, T, B, 3H]`
    pub bpi1: Vec<f32>,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn widen(x: &[f32]) -> Vec<f64> {
    x.iter().map(|&v| f64::from(v)).collect()
}

fn narrow(x: &[f64]) -> Vec<f32> {
    x.iter().map(|&v| v as f32).collect()
}

fn dropout_scale(dropout: f32) -> f64 {
    1.0 / (1.0 - f64::from(dropout))
}

/// Multi-layer GRU forward pass over `x: [T, B, I]` from `h0: [L, B, H]`.
///
/// `mask` is `[L - 1, T, B, H]` and is only read when `dropout > 0`.
#[must_use]
pub fn gru_forward(
    shape: &GruShape,
    x: &[f32],
    h0: &[f32],
    weights: &GruWeights,
    mask: &[f32],
    dropout: f32,
) -> GruActivations {
    let GruShape {
        batch,
        hidden,
        seq,
        layers,
        ..
    } = *shape;
    let gates = shape.gates();
    let states = shape.hidden_states();
    let mask_layout = shape.mask();
    let bias = shape.bias();
    let scale = dropout_scale(dropout);

    let mut saved = GruActivations {
        reset_gate: vec![0.0; gates.numel()],
        input_gate: vec![0.0; gates.numel()],
        new_gate: vec![0.0; gates.numel()],
        hgate_2: vec![0.0; gates.numel()],
        hidden: vec![0.0; states.numel()],
        output: Vec::new(),
    };

    let mut input = widen(x);
    for l in 0..layers {
        let width = shape.input_width(l);
        if l > 0 && dropout > 0.0 {
            for t in 0..seq {
                for b in 0..batch {
                    for k in 0..hidden {
                        let m = f64::from(mask[mask_layout.offset([l - 1, t, b, k])]);
                        input[(t * batch + b) * hidden + k] *= m * scale;
                    }
                }
            }
        }

        let w_i = &weights.input[shape.input_weight_offset(l)..][..3 * hidden * width];
        let w_h = &weights.hidden[shape.hidden_weight_offset(l)..][..3 * hidden * hidden];
        let b_i = &weights.input_bias[bias.offset([l, 0])..][..3 * hidden];
        let b_h = &weights.hidden_bias[bias.offset([l, 0])..][..3 * hidden];

        let mut state = widen(&h0[l * batch * hidden..(l + 1) * batch * hidden]);
        let mut output = vec![0.0; seq * batch * hidden];

        for t in 0..seq {
            for b in 0..batch {
                for k in 0..hidden {
                    saved.hidden[states.offset([l, t, b, k])] = state[b * hidden + k] as f32;
                }
            }

            let mut next = vec![0.0; batch * hidden];
            for b in 0..batch {
                let x_row = &input[(t * batch + b) * width..][..width];
                let h_row = &state[b * hidden..][..hidden];
                for k in 0..hidden {
                    let gi = |g: usize| {
                        let row = g * hidden + k;
                        let w = &w_i[row * width..][..width];
                        f64::from(b_i[row])
                            + w.iter().zip(x_row).map(|(&w, &x)| f64::from(w) * x).sum::<f64>()
                    };
                    let gh = |g: usize| {
                        let row = g * hidden + k;
                        let w = &w_h[row * hidden..][..hidden];
                        f64::from(b_h[row])
                            + w.iter().zip(h_row).map(|(&w, &h)| f64::from(w) * h).sum::<f64>()
                    };

                    let r = sigmoid(gi(0) + gh(0));
                    let z = sigmoid(gi(1) + gh(1));
                    let g2 = gh(2);
                    let n = (gi(2) + r * g2).tanh();
                    let h_new = (1.0 - z) * n + z * h_row[k];

                    let idx = gates.offset([l, t, b, k]);
                    saved.reset_gate[idx] = r as f32;
                    saved.input_gate[idx] = z as f32;
                    saved.new_gate[idx] = n as f32;
                    saved.hgate_2[idx] = g2 as f32;

                    next[b * hidden + k] = h_new;
                    output[(t * batch + b) * hidden + k] = h_new;
                }
            }
            state = next;
        }

        for b in 0..batch {
            for k in 0..hidden {
                saved.hidden[states.offset([l, seq, b, k])] = state[b * hidden + k] as f32;
            }
        }
        input = output;
    }

    saved.output = narrow(&input);
    saved
}

/// Backward-data pass from the saved activations.
///
/// `y_err` is the error on the top layer output `[T, B, H]`, `layer_err` the
/// error on each layer's final hidden state `[L, B, H]`.
#[must_use]
pub fn gru_backward(
    shape: &GruShape,
    saved: &GruActivations,
    weights: &GruWeights,
    y_err: &[f32],
    layer_err: &[f32],
    mask: &[f32],
    dropout: f32,
) -> ReferenceGrads {
    let GruShape {
        batch,
        hidden,
        seq,
        layers,
        ..
    } = *shape;
    let gates = shape.gates();
    let states = shape.hidden_states();
    let bpi = shape.bpi();
    let mask_layout = shape.mask();
    let scale = dropout_scale(dropout);
    debug!(?shape, dropout, "reference GRU backward");

    let mut bpi0 = vec![0.0f64; bpi.numel()];
    let mut bpi1 = vec![0.0f64; bpi.numel()];
    let mut x0_grad = vec![0.0f32; shape.layer_states().numel()];
    let mut layer_input_grads = vec![Vec::new(); layers];
    let mut x_grad = Vec::new();

    let mut upstream = widen(y_err);
    for l in (0..layers).rev() {
        let width = shape.input_width(l);
        let w_i = &weights.input[shape.input_weight_offset(l)..][..3 * hidden * width];
        let w_h = &weights.hidden[shape.hidden_weight_offset(l)..][..3 * hidden * hidden];

        let mut carry = widen(&layer_err[l * batch * hidden..(l + 1) * batch * hidden]);
        let mut dx = vec![0.0f64; seq * batch * width];

        for t in (0..seq).rev() {
            let step = bpi.offset([l, t, 0, 0]);
            let mut next_carry = vec![0.0f64; batch * hidden];

            for b in 0..batch {
                let row = step + b * 3 * hidden;
                for k in 0..hidden {
                    let idx = gates.offset([l, t, b, k]);
                    let r = f64::from(saved.reset_gate[idx]);
                    let z = f64::from(saved.input_gate[idx]);
                    let n = f64::from(saved.new_gate[idx]);
                    let g2 = f64::from(saved.hgate_2[idx]);
                    let h_prev = f64::from(saved.hidden[states.offset([l, t, b, k])]);

                    let dh = carry[b * hidden + k] + upstream[(t * batch + b) * hidden + k];
                    let da_n = dh * (1.0 - z) * (1.0 - n * n);
                    let dz = dh * (h_prev - n) * z * (1.0 - z);
                    let dg2 = da_n * r;
                    let dr = da_n * g2 * r * (1.0 - r);

                    bpi0[row + k] = dr;
                    bpi0[row + hidden + k] = dz;
                    bpi0[row + 2 * hidden + k] = dg2;
                    bpi1[row + k] = dr;
                    bpi1[row + hidden + k] = dz;
                    bpi1[row + 2 * hidden + k] = da_n;

                    next_carry[b * hidden + k] = dh * z;
                }

                for j in 0..3 * hidden {
                    let (d0, d1) = (bpi0[row + j], bpi1[row + j]);
                    for n in 0..hidden {
                        next_carry[b * hidden + n] += d0 * f64::from(w_h[j * hidden + n]);
                    }
                    for m in 0..width {
                        dx[(t * batch + b) * width + m] += d1 * f64::from(w_i[j * width + m]);
                    }
                }

                if l > 0 && dropout > 0.0 {
                    for m in 0..width {
                        let keep = f64::from(mask[mask_layout.offset([l - 1, t, b, m])]);
                        dx[(t * batch + b) * width + m] *= keep * scale;
                    }
                }
            }
            carry = next_carry;
        }

        x0_grad[l * batch * hidden..(l + 1) * batch * hidden].copy_from_slice(&narrow(&carry));
        layer_input_grads[l] = narrow(&dx);
        if l == 0 {
            x_grad = narrow(&dx);
        } else {
            upstream = dx;
        }
    }

    ReferenceGrads {
        x_grad,
        x0_grad,
        layer_input_grads,
        bpi0: narrow(&bpi0),
        bpi1: narrow(&bpi1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GruBackwardConfig;

    /// One unit, one step: every quantity can be checked by hand.
    #[test]
    fn single_unit_matches_hand_derivation() {
        let shape = GruShape::from_config(&GruBackwardConfig::new(1, 1, 1, 1, 1));
        let saved = GruActivations {
            reset_gate: vec![0.5],
            input_gate: vec![0.25],
            new_gate: vec![0.5],
            hgate_2: vec![2.0],
            hidden: vec![1.0, 0.0],
            output: vec![0.0],
        };
        let weights = GruWeights {
            input: vec![1.0, 2.0, 3.0],
            hidden: vec![0.5, 0.25, 1.0],
            input_bias: vec![0.0; 3],
            hidden_bias: vec![0.0; 3],
        };

        let grads = gru_backward(&shape, &saved, &weights, &[1.0], &[1.0], &[], 0.0);

        // dh = 2
        let da_n = 2.0 * 0.75 * 0.75;
        let dz = 2.0 * (1.0 - 0.5) * 0.25 * 0.75;
        let dg2 = da_n * 0.5;
        let dr = da_n * 2.0 * 0.5 * 0.5;
        assert_eq!(grads.bpi0, vec![dr as f32, dz as f32, dg2 as f32]);
        assert_eq!(grads.bpi1, vec![dr as f32, dz as f32, da_n as f32]);

        let x = dr * 1.0 + dz * 2.0 + da_n * 3.0;
        let h = 2.0 * 0.25 + dr * 0.5 + dz * 0.25 + dg2 * 1.0;
        assert!((f64::from(grads.x_grad[0]) - x).abs() < 1e-6);
        assert!((f64::from(grads.x0_grad[0]) - h).abs() < 1e-6);
    }

    #[test]
    fn forward_records_entering_states() {
        let shape = GruShape::from_config(&GruBackwardConfig::new(1, 1, 1, 2, 1));
        let weights = GruWeights {
            input: vec![0.1, 0.2, 0.3],
            hidden: vec![0.4, 0.5, 0.6],
            input_bias: vec![0.0; 3],
            hidden_bias: vec![0.0; 3],
        };
        let saved = gru_forward(&shape, &[1.0, -1.0], &[0.5], &weights, &[], 0.0);
        assert_eq!(saved.hidden[0], 0.5);
        assert_eq!(saved.hidden[1], saved.output[0]);
        assert_eq!(saved.hidden[2], saved.output[1]);

        let z = saved.input_gate[0];
        let n = saved.new_gate[0];
        assert!(((1.0 - z) * n + z * 0.5 - saved.output[0]).abs() < 1e-6);
    }
}
