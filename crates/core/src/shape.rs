//! Buffer shapes of the backward-data pass.
//!
//! Every buffer is a dense row-major tensor. Host code and the scalar
//! reference index them through a [`StridedLayout`]; the kernel derives the
//! same offsets from the tensor shapes it is launched with.
//!
//! # Weight packing
//!
//! Gate blocks are ordered reset (`r`), update (`z`), new (`n`); gate `g`,
//! unit `k` is row `g * H + k` of a layer's `[3H, width]` block.
//!
//! - `i_weights`: layer 0 block `[3H, I]` at 0, then one `[3H, H]` block per
//!   layer `l >= 1` at `3IH + 3H^2 (l - 1)`
//! - `h_weights`: one `[3H, H]` block per layer at `3H^2 l`

use crate::config::GruBackwardConfig;

/// Dimensions plus strides of a dense tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StridedLayout<const N: usize> {
    dims: [usize; N],
    strides: [usize; N],
}

impl<const N: usize> StridedLayout<N> {
    /// Row-major layout of `dims`.
    #[must_use]
    pub fn contiguous(dims: [usize; N]) -> Self {
        let mut strides = [0; N];
        let mut acc = 1;
        for axis in (0..N).rev() {
            strides[axis] = acc;
            acc *= dims[axis];
        }
        Self { dims, strides }
    }

    #[must_use]
    pub fn dims(&self) -> [usize; N] {
        self.dims
    }

    #[must_use]
    pub fn stride(&self, axis: usize) -> usize {
        self.strides[axis]
    }

    #[must_use]
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Flat offset of `index`. Bounds are asserted in debug builds.
    #[inline]
    #[must_use]
    pub fn offset(&self, index: [usize; N]) -> usize {
        let mut offset = 0;
        for axis in 0..N {
            debug_assert!(
                index[axis] < self.dims[axis],
                "index {index:?} out of bounds for dims {:?}",
                self.dims
            );
            offset += index[axis] * self.strides[axis];
        }
        offset
    }
}

/// All sizes of one backward-data problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GruShape {
    pub batch: usize,
    pub input: usize,
    pub hidden: usize,
    pub seq: usize,
    pub layers: usize,
}

impl GruShape {
    #[must_use]
    pub fn from_config(config: &GruBackwardConfig) -> Self {
        Self {
            batch: config.batch_size,
            input: config.input_size,
            hidden: config.hidden_size,
            seq: config.sequence_length,
            layers: config.layer_size,
        }
    }

    /// Input width of `layer`: `I` for layer 0, `H` above it.
    #[must_use]
    pub fn input_width(&self, layer: usize) -> usize {
        if layer == 0 { self.input } else { self.hidden }
    }

    /// Saved gate activations `[L, T, B, H]`.
    #[must_use]
    pub fn gates(&self) -> StridedLayout<4> {
        StridedLayout::contiguous([self.layers, self.seq, self.batch, self.hidden])
    }

    /// Saved hidden states `[L, T + 1, B, H]`; step `t` holds the state
    /// entering step `t`.
    #[must_use]
    pub fn hidden_states(&self) -> StridedLayout<4> {
        StridedLayout::contiguous([self.layers, self.seq + 1, self.batch, self.hidden])
    }

    /// Per-layer hidden state `[L, B, H]` (`layer_err`, `x0_grad`, `h0`).
    #[must_use]
    pub fn layer_states(&self) -> StridedLayout<3> {
        StridedLayout::contiguous([self.layers, self.batch, self.hidden])
    }

    /// A sequence `[T, B, width]` (`y_err`, `x_grad`, one ping-pong half).
    #[must_use]
    pub fn sequence(&self, width: usize) -> StridedLayout<3> {
        StridedLayout::contiguous([self.seq, self.batch, width])
    }

    /// Both ping-pong halves `[2, T, B, H]`.
    #[must_use]
    pub fn partial_grad(&self) -> StridedLayout<4> {
        StridedLayout::contiguous([2, self.seq, self.batch, self.hidden])
    }

    /// Dropout keep-mask `[L - 1, T, B, H]`.
    #[must_use]
    pub fn mask(&self) -> StridedLayout<4> {
        let layers = self.layers.saturating_sub(1);
        StridedLayout::contiguous([layers, self.seq, self.batch, self.hidden])
    }

    /// Packed gate derivatives `[L, T, B, 3H]`.
    #[must_use]
    pub fn bpi(&self) -> StridedLayout<4> {
        StridedLayout::contiguous([self.layers, self.seq, self.batch, 3 * self.hidden])
    }

    #[must_use]
    pub fn input_weights_len(&self) -> usize {
        3 * self.input * self.hidden + 3 * self.layers.saturating_sub(1) * self.hidden * self.hidden
    }

    #[must_use]
    pub fn hidden_weights_len(&self) -> usize {
        3 * self.layers * self.hidden * self.hidden
    }

    /// Offset of `layer`'s `[3H, input_width(layer)]` block in `i_weights`.
    #[must_use]
    pub fn input_weight_offset(&self, layer: usize) -> usize {
        if layer == 0 {
            0
        } else {
            3 * self.input * self.hidden + 3 * self.hidden * self.hidden * (layer - 1)
        }
    }

    /// Offset of `layer`'s `[3H, H]` block in `h_weights`.
    #[must_use]
    pub fn hidden_weight_offset(&self, layer: usize) -> usize {
        3 * self.hidden * self.hidden * layer
    }

    /// Per-layer bias `[L, 3H]`.
    #[must_use]
    pub fn bias(&self) -> StridedLayout<2> {
        StridedLayout::contiguous([self.layers, 3 * self.hidden])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> GruShape {
        GruShape::from_config(&GruBackwardConfig::new(2, 5, 3, 4, 3))
    }

    #[test]
    fn contiguous_strides() {
        let layout = StridedLayout::contiguous([2, 3, 4]);
        assert_eq!([layout.stride(0), layout.stride(1), layout.stride(2)], [12, 4, 1]);
        assert_eq!(layout.offset([1, 2, 3]), 23);
        assert_eq!(layout.numel(), 24);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of bounds")]
    fn offset_checks_bounds_in_debug() {
        let _ = StridedLayout::contiguous([2, 3]).offset([0, 3]);
    }

    #[test]
    fn hidden_states_have_one_extra_step() {
        let s = shape();
        assert_eq!(s.hidden_states().dims(), [3, 5, 2, 3]);
        assert_eq!(s.hidden_states().offset([1, 0, 0, 0]), 5 * 2 * 3);
    }

    #[test]
    fn weight_blocks_are_adjacent() {
        let s = shape();
        assert_eq!(s.input_weight_offset(1), 3 * 5 * 3);
        assert_eq!(s.input_weight_offset(2), s.input_weight_offset(1) + 3 * 3 * 3);
        assert_eq!(s.input_weights_len(), s.input_weight_offset(2) + 3 * 3 * 3);
        assert_eq!(s.hidden_weights_len(), s.hidden_weight_offset(2) + 3 * 3 * 3);
    }

    #[test]
    fn single_layer_has_empty_mask() {
        let s = GruShape::from_config(&GruBackwardConfig::new(2, 5, 3, 4, 1));
        assert_eq!(s.mask().numel(), 0);
        assert_eq!(s.input_weights_len(), 3 * 5 * 3);
    }
}
