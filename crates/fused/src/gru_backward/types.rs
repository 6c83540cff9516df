use cubecl::prelude::*;
use gru_core::GruBackwardConfig;

/// Read-only buffers of one launch.
///
/// | buffer | shape |
/// |---|---|
/// | `layer_err` | `[L, B, H]` |
/// | `y_err` | `[T, B, H]` |
/// | gates | `[L, T, B, H]` |
/// | `hidden` | `[L, T + 1, B, H]` |
/// | `i_weights` | `[3IH + 3(L - 1)H^2]` |
/// | `h_weights` | `[3LH^2]` |
/// | `mask` | `[L - 1, T, B, H]`, read only with dropout |
#[derive(CubeType, CubeLaunch)]
pub struct GruInputs<F: Float> {
    pub layer_err: Tensor<F>,
    pub y_err: Tensor<F>,
    pub reset_gate: Tensor<F>,
    pub input_gate: Tensor<F>,
    pub new_gate: Tensor<F>,
    pub hgate_2: Tensor<F>,
    pub hidden: Tensor<F>,
    pub i_weights: Tensor<F>,
    pub h_weights: Tensor<F>,
    pub mask: Tensor<F>,
}

/// Buffers the kernel writes.
///
/// | buffer | shape |
/// |---|---|
/// | `partial_grad` | `[2, T, B, H]` |
/// | `x_grad` | `[T, B, I]` |
/// | `x0_grad` | `[L, B, H]` |
/// | `bpi0`, `bpi1` | `[L, T, B, 3H]` |
#[derive(CubeType, CubeLaunch)]
pub struct GruOutputs<F: Float> {
    pub partial_grad: Tensor<F>,
    pub x_grad: Tensor<F>,
    pub x0_grad: Tensor<F>,
    pub bpi0: Tensor<F>,
    pub bpi1: Tensor<F>,
}

/// Host-side counterpart of [`GruInputs`], one `T` per buffer.
#[derive(Debug, Clone)]
pub struct GruSaved<T> {
    pub layer_err: T,
    pub y_err: T,
    pub reset_gate: T,
    pub input_gate: T,
    pub new_gate: T,
    pub hgate_2: T,
    pub hidden: T,
    pub i_weights: T,
    pub h_weights: T,
    pub mask: T,
}

impl<T> GruSaved<T> {
    pub fn as_ref(&self) -> GruSaved<&T> {
        GruSaved {
            layer_err: &self.layer_err,
            y_err: &self.y_err,
            reset_gate: &self.reset_gate,
            input_gate: &self.input_gate,
            new_gate: &self.new_gate,
            hgate_2: &self.hgate_2,
            hidden: &self.hidden,
            i_weights: &self.i_weights,
            h_weights: &self.h_weights,
            mask: &self.mask,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> GruSaved<U> {
        GruSaved {
            layer_err: f(self.layer_err),
            y_err: f(self.y_err),
            reset_gate: f(self.reset_gate),
            input_gate: f(self.input_gate),
            new_gate: f(self.new_gate),
            hgate_2: f(self.hgate_2),
            hidden: f(self.hidden),
            i_weights: f(self.i_weights),
            h_weights: f(self.h_weights),
            mask: f(self.mask),
        }
    }
}

/// Host-side counterpart of [`GruOutputs`].
#[derive(Debug, Clone)]
pub struct GruScratch<T> {
    pub partial_grad: T,
    pub x_grad: T,
    pub x0_grad: T,
    pub bpi0: T,
    pub bpi1: T,
}

impl<T> GruScratch<T> {
    pub fn as_ref(&self) -> GruScratch<&T> {
        GruScratch {
            partial_grad: &self.partial_grad,
            x_grad: &self.x_grad,
            x0_grad: &self.x0_grad,
            bpi0: &self.bpi0,
            bpi1: &self.bpi1,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> GruScratch<U> {
        GruScratch {
            partial_grad: f(self.partial_grad),
            x_grad: f(self.x_grad),
            x0_grad: f(self.x0_grad),
            bpi0: f(self.bpi0),
            bpi1: f(self.bpi1),
        }
    }
}

/// Launch constants baked into the compiled kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GruKernelConfig {
    /// `1 / (1 - p)` as raw bits, so the config stays hashable.
    pub dropout_scale_bits: u32,
    pub apply_dropout: bool,
    pub prefetch_distance: usize,
}

impl GruKernelConfig {
    #[must_use]
    pub fn new(config: &GruBackwardConfig) -> Self {
        Self {
            dropout_scale_bits: config.dropout_scale().to_bits(),
            apply_dropout: config.applies_dropout(),
            prefetch_distance: config.prefetch_distance,
        }
    }

    #[must_use]
    pub fn dropout_scale(&self) -> f32 {
        f32::from_bits(self.dropout_scale_bits)
    }
}

/// Flat offsets and extents of one layer, for the batch rows of one cube.
///
/// Offsets point at step 0 of the layer's slice of each buffer; the
/// `*_step` helpers add the step.
#[derive(CubeType, Clone, Copy)]
pub struct LayerCtx {
    pub batch: usize,
    pub hidden: usize,
    pub seq: usize,
    /// Input width of this layer: `I` for layer 0, `H` above it.
    pub width: usize,
    pub row_start: usize,
    pub row_end: usize,
    /// Top layer: read the step error from `y_err`, not `partial_grad`.
    pub top: bool,
    /// Layer 0: write the input gradient to `x_grad`, not `partial_grad`.
    pub bottom: bool,
    pub dropout: bool,
    /// `[B, H]` slice of `layer_err`/`x0_grad`.
    pub state_base: usize,
    /// `[T, B, H]` slice of the saved gates.
    pub gate_base: usize,
    /// `[T + 1, B, H]` slice of `hidden`.
    pub hidden_base: usize,
    /// `[T, B, 3H]` slice of `bpi0`/`bpi1`.
    pub bpi_base: usize,
    pub wi_base: usize,
    pub wh_base: usize,
    /// Source half of `partial_grad`, or 0 for `y_err`.
    pub src_base: usize,
    /// Destination half of `partial_grad`, or 0 for `x_grad`.
    pub dst_base: usize,
    pub mask_base: usize,
}

#[cube]
impl LayerCtx {
    /// Context of `layer`, with `ping`/`pong` the `partial_grad` halves it
    /// reads and writes.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        layer: usize,
        layers: usize,
        batch: usize,
        hidden: usize,
        input: usize,
        seq: usize,
        row_start: usize,
        row_end: usize,
        ping: usize,
        pong: usize,
        #[comptime] apply_dropout: bool,
    ) -> LayerCtx {
        let state = batch * hidden;
        let seq_len = seq * state;
        let block = 3 * hidden * hidden;

        let mut width = input;
        let mut wi_base = 0usize;
        let mut mask_base = 0usize;
        let mut dst_base = 0usize;
        if layer > 0 {
            width = hidden;
            dst_base = pong * seq_len;
            wi_base = 3 * input * hidden + block * (layer - 1);
            mask_base = (layer - 1) * seq_len;
        }

        let mut dropout = false;
        if comptime!(apply_dropout) {
            dropout = layer > 0;
        }

        LayerCtx {
            batch,
            hidden,
            seq,
            width,
            row_start,
            row_end,
            top: layer + 1 == layers,
            bottom: layer == 0,
            dropout,
            state_base: layer * state,
            gate_base: layer * seq_len,
            hidden_base: layer * (seq + 1) * state,
            bpi_base: layer * 3 * seq_len,
            wi_base,
            wh_base: layer * block,
            src_base: ping * seq_len,
            dst_base,
            mask_base,
        }
    }

    /// Offset of step `t` in a `[T, B, H]` sequence starting at `base`.
    pub fn seq_step(&self, base: usize, t: usize) -> usize {
        base + t * self.batch * self.hidden
    }

    /// Offset of step `t` of this layer's `bpi` slice.
    pub fn bpi_step(&self, t: usize) -> usize {
        self.bpi_base + t * self.batch * 3 * self.hidden
    }

    /// Offset of step `t` of the layer input gradient.
    pub fn out_step(&self, t: usize) -> usize {
        self.dst_base + t * self.batch * self.width
    }
}

/// Where a layer reads the error on its output sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradSource {
    /// `y_err`, for the top layer.
    TopError,
    /// One half of `partial_grad`.
    PingPong(usize),
}

/// Where a layer writes the gradient of its input sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradDest {
    /// One half of `partial_grad`, consumed by the layer below.
    PingPong(usize),
    /// `x_grad`, for layer 0.
    InputGrad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerRoles {
    pub layer: usize,
    pub source: GradSource,
    pub dest: GradDest,
}

/// Buffer roles of every layer, in processing order (top layer first).
///
/// The `i`-th processed layer reads half `i % 2` and writes the other one,
/// so each layer below the top reads the half the layer above it wrote.
#[must_use]
pub fn layer_schedule(layers: usize) -> Vec<LayerRoles> {
    (0..layers)
        .map(|i| {
            let layer = layers - 1 - i;
            let (ping, pong) = (i % 2, 1 - i % 2);
            LayerRoles {
                layer,
                source: if i == 0 {
                    GradSource::TopError
                } else {
                    GradSource::PingPong(ping)
                },
                dest: if layer == 0 {
                    GradDest::InputGrad
                } else {
                    GradDest::PingPong(pong)
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_layer_consumes_what_the_layer_above_produced() {
        for layers in 1..=5 {
            let schedule = layer_schedule(layers);
            assert_eq!(schedule.len(), layers);
            assert_eq!(schedule[0].layer, layers - 1);
            assert_eq!(schedule[0].source, GradSource::TopError);
            assert_eq!(schedule[layers - 1].dest, GradDest::InputGrad);

            for pair in schedule.windows(2) {
                let (above, below) = (pair[0], pair[1]);
                assert_eq!(below.layer + 1, above.layer);
                match (above.dest, below.source) {
                    (GradDest::PingPong(produced), GradSource::PingPong(consumed)) => {
                        assert_eq!(produced, consumed);
                    }
                    other => panic!("layer {} hand-off is {other:?}", below.layer),
                }
            }
        }
    }

    #[test]
    fn a_layer_never_reads_and_writes_the_same_half() {
        for roles in layer_schedule(4) {
            if let (GradSource::PingPong(src), GradDest::PingPong(dst)) =
                (roles.source, roles.dest)
            {
                assert_ne!(src, dst, "layer {}", roles.layer);
            }
        }
    }

    #[test]
    fn single_layer_reads_top_error_and_writes_input_grad() {
        assert_eq!(
            layer_schedule(1),
            vec![LayerRoles {
                layer: 0,
                source: GradSource::TopError,
                dest: GradDest::InputGrad,
            }]
        );
    }

    #[test]
    fn kernel_config_carries_the_dropout_scale() {
        let config = GruBackwardConfig::new(2, 3, 4, 2, 2).with_dropout(0.75);
        let kernel = GruKernelConfig::new(&config);
        assert!(kernel.apply_dropout);
        assert_eq!(kernel.dropout_scale(), 4.0);
        assert_eq!(kernel.prefetch_distance, 3);

        let single = GruBackwardConfig::new(2, 3, 4, 2, 1).with_dropout(0.75);
        assert!(!GruKernelConfig::new(&single).apply_dropout);
    }
}
