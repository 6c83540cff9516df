//! Deterministic random problems for kernel tests and benches.

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    config::GruBackwardConfig,
    reference::{GruActivations, GruWeights, ReferenceGrads, gru_backward, gru_forward},
    shape::GruShape,
};

/// Installs a `tracing` subscriber honouring `RUST_LOG`, once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A full backward-data problem: forward inputs, saved activations and the
/// errors flowing into the backward pass.
#[derive(Debug, Clone)]
pub struct GruProblem {
    pub config: GruBackwardConfig,
    pub shape: GruShape,
    /// `[T, B, I]`
    pub x: Vec<f32>,
    /// `[L, B, H]`
    pub h0: Vec<f32>,
    pub weights: GruWeights,
    /// `[L - 1, T, B, H]`, entries are 0 or 1
    pub mask: Vec<f32>,
    pub saved: GruActivations,
    /// `[T, B, H]`
    pub y_err: Vec<f32>,
    /// `[L, B, H]`
    pub layer_err: Vec<f32>,
}

fn uniform(rng: &mut StdRng, len: usize, bound: f32) -> Vec<f32> {
    (0..len).map(|_| rng.random_range(-bound..bound)).collect()
}

impl GruProblem {
    /// Random weights in `±1/sqrt(H)`, inputs and errors in `±1`, and a
    /// Bernoulli keep-mask with keep probability `1 - dropout`.
    #[must_use]
    pub fn random(config: &GruBackwardConfig, seed: u64) -> Self {
        let shape = config.shape();
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = 1.0 / (shape.hidden as f32).sqrt();

        let weights = GruWeights {
            input: uniform(&mut rng, shape.input_weights_len(), bound),
            hidden: uniform(&mut rng, shape.hidden_weights_len(), bound),
            input_bias: uniform(&mut rng, shape.bias().numel(), bound),
            hidden_bias: uniform(&mut rng, shape.bias().numel(), bound),
        };
        let x = uniform(&mut rng, shape.sequence(shape.input).numel(), 1.0);
        let h0 = uniform(&mut rng, shape.layer_states().numel(), 1.0);
        let keep = 1.0 - f64::from(config.dropout);
        let mask = (0..shape.mask().numel())
            .map(|_| if rng.random_bool(keep) { 1.0 } else { 0.0 })
            .collect();
        let y_err = uniform(&mut rng, shape.sequence(shape.hidden).numel(), 1.0);
        let layer_err = uniform(&mut rng, shape.layer_states().numel(), 1.0);

        let mut problem = Self {
            config: config.clone(),
            shape,
            x,
            h0,
            weights,
            mask,
            saved: GruActivations {
                reset_gate: Vec::new(),
                input_gate: Vec::new(),
                new_gate: Vec::new(),
                hgate_2: Vec::new(),
                hidden: Vec::new(),
                output: Vec::new(),
            },
            y_err,
            layer_err,
        };
        problem.rerun_forward();
        problem
    }

    /// Replaces the keep-mask with all ones and recomputes the forward pass.
    #[must_use]
    pub fn with_all_ones_mask(mut self) -> Self {
        self.mask.fill(1.0);
        self.rerun_forward();
        self
    }

    fn rerun_forward(&mut self) {
        self.saved = gru_forward(
            &self.shape,
            &self.x,
            &self.h0,
            &self.weights,
            &self.mask,
            self.config.dropout,
        );
    }

    #[must_use]
    pub fn reference(&self) -> ReferenceGrads {
        gru_backward(
            &self.shape,
            &self.saved,
            &self.weights,
            &self.y_err,
            &self.layer_err,
            &self.mask,
            self.config.dropout,
        )
    }
}

/// `|a - e| <= atol + rtol * |e|` for every element; panics with the worst
/// offender.
pub fn assert_close(actual: &[f32], expected: &[f32], rtol: f32, atol: f32, what: &str) {
    assert_eq!(actual.len(), expected.len(), "{what}: length mismatch");
    let mut worst: Option<(usize, f32)> = None;
    let mut failures = 0;
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        let diff = (a - e).abs();
        if !(diff <= atol + rtol * e.abs()) {
            failures += 1;
            if worst.is_none_or(|(_, d)| diff > d) {
                worst = Some((i, diff));
            }
        }
    }
    if let Some((i, diff)) = worst {
        panic!(
            "{what}: {failures}/{} mismatches (rtol={rtol}, atol={atol}); \
             worst at {i}: got {}, expected {}, diff {diff}",
            actual.len(),
            actual[i],
            expected[i]
        );
    }
}
