//! Tests for the fused GRU backward-data kernel.

use burn::tensor::{Tensor, TensorData};
use burn_cubecl::CubeBackend;
use cubecl::{prelude::*, server::Handle};
use gru_core::{
    GruBackwardConfig, GruError, GruShape, GruTiling, MAX_PREFETCH_DISTANCE,
    test_utils::{GruProblem, assert_close, init_tracing},
};
use half::bf16;
use proptest::prelude::*;
use test_case::test_case;
use tilecube::test_utils::{TestFloat, TestRuntime, client, download, get_strides, upload};

use super::*;

const RTOL: f32 = 1e-4;
const ATOL: f32 = 1e-5;
const BF16_RTOL: f32 = 5e-2;
const BF16_ATOL: f32 = 5e-2;

type TestBackend<F = f32> = CubeBackend<TestRuntime, F, i32, u8>;

/// One device buffer in storage precision `F`.
struct DeviceBuffer {
    handle: Handle,
    shape: Vec<usize>,
    strides: Vec<usize>,
    elem_size: usize,
}

impl DeviceBuffer {
    fn new<F: TestFloat>(data: &[f32], shape: &[usize]) -> Self {
        let data: Vec<F> = data.iter().map(|&v| F::from_f64(f64::from(v))).collect();
        Self {
            handle: upload(&client(), &data),
            shape: shape.to_vec(),
            strides: get_strides(shape),
            elem_size: size_of::<F>(),
        }
    }

    fn zeros<F: TestFloat>(shape: &[usize]) -> Self {
        Self::new::<F>(&vec![0.0; shape.iter().product()], shape)
    }

    fn handle_ref(&self) -> TensorHandleRef<'_, TestRuntime> {
        let (handle, strides, shape) = (&self.handle, &self.strides, &self.shape);
        unsafe { TensorHandleRef::from_raw_parts(handle, strides, shape, self.elem_size) }
    }

    fn read<F: TestFloat>(&self) -> Vec<f32> {
        download::<F>(&client(), self.handle.clone())
            .into_iter()
            .map(|v| v.into_f64() as f32)
            .collect()
    }
}

fn saved_buffers<F: TestFloat>(p: &GruProblem, mask: Option<&[f32]>) -> GruSaved<DeviceBuffer> {
    let s = p.shape;
    let (l, t, b, h) = (s.layers, s.seq, s.batch, s.hidden);
    let gates = [l, t, b, h];
    GruSaved {
        layer_err: DeviceBuffer::new::<F>(&p.layer_err, &[l, b, h]),
        y_err: DeviceBuffer::new::<F>(&p.y_err, &[t, b, h]),
        reset_gate: DeviceBuffer::new::<F>(&p.saved.reset_gate, &gates),
        input_gate: DeviceBuffer::new::<F>(&p.saved.input_gate, &gates),
        new_gate: DeviceBuffer::new::<F>(&p.saved.new_gate, &gates),
        hgate_2: DeviceBuffer::new::<F>(&p.saved.hgate_2, &gates),
        hidden: DeviceBuffer::new::<F>(&p.saved.hidden, &[l, t + 1, b, h]),
        i_weights: DeviceBuffer::new::<F>(&p.weights.input, &[s.input_weights_len()]),
        h_weights: DeviceBuffer::new::<F>(&p.weights.hidden, &[s.hidden_weights_len()]),
        mask: match mask {
            Some(mask) => DeviceBuffer::new::<F>(mask, &s.mask().dims()),
            None => DeviceBuffer::zeros::<F>(&[1]),
        },
    }
}

/// Kernel results widened to f32.
struct Outputs {
    x_grad: Vec<f32>,
    x0_grad: Vec<f32>,
    partial_grad: Vec<f32>,
    bpi0: Vec<f32>,
    bpi1: Vec<f32>,
}

fn launch_saved<F: TestFloat>(
    saved: &GruSaved<DeviceBuffer>,
    s: &GruShape,
    config: &GruBackwardConfig,
) -> Result<Outputs, GruError> {
    let scratch = GruScratch {
        partial_grad: DeviceBuffer::zeros::<F>(&s.partial_grad().dims()),
        x_grad: DeviceBuffer::zeros::<F>(&s.sequence(s.input).dims()),
        x0_grad: DeviceBuffer::zeros::<F>(&s.layer_states().dims()),
        bpi0: DeviceBuffer::zeros::<F>(&s.bpi().dims()),
        bpi1: DeviceBuffer::zeros::<F>(&s.bpi().dims()),
    };

    launch_gru_backward::<TestRuntime, F>(
        &client(),
        &saved.as_ref().map(DeviceBuffer::handle_ref),
        &scratch.as_ref().map(DeviceBuffer::handle_ref),
        config,
    )?;

    Ok(Outputs {
        x_grad: scratch.x_grad.read::<F>(),
        x0_grad: scratch.x0_grad.read::<F>(),
        partial_grad: scratch.partial_grad.read::<F>(),
        bpi0: scratch.bpi0.read::<F>(),
        bpi1: scratch.bpi1.read::<F>(),
    })
}

fn run_with<F: TestFloat>(problem: &GruProblem, config: &GruBackwardConfig) -> Outputs {
    let mask = config.applies_dropout().then_some(problem.mask.as_slice());
    let saved = saved_buffers::<F>(problem, mask);
    launch_saved::<F>(&saved, &problem.shape, config).expect("launch succeeds")
}

fn run(problem: &GruProblem) -> Outputs {
    run_with::<f32>(problem, &problem.config)
}

fn check_against_reference(problem: &GruProblem, out: &Outputs, rtol: f32, atol: f32) {
    let reference = problem.reference();
    assert_close(&out.x_grad, &reference.x_grad, rtol, atol, "x_grad");
    assert_close(&out.x0_grad, &reference.x0_grad, rtol, atol, "x0_grad");
    assert_close(&out.bpi0, &reference.bpi0, rtol, atol, "bpi0");
    assert_close(&out.bpi1, &reference.bpi1, rtol, atol, "bpi1");
}

#[test]
fn single_step_packs_reference_derivatives() {
    init_tracing();
    let config = GruBackwardConfig::new(1, 4, 4, 1, 1);
    let problem = GruProblem::random(&config, 1);
    let out = run(&problem);
    let reference = problem.reference();

    assert_close(&out.bpi0, &reference.bpi0, RTOL, ATOL, "bpi0");
    assert_close(&out.bpi1, &reference.bpi1, RTOL, ATOL, "bpi1");
    check_against_reference(&problem, &out, RTOL, ATOL);
}

#[test]
fn each_gate_occupies_its_own_columns() {
    // odd hidden size, so a spilled tile would land in the neighbouring gate
    let config = GruBackwardConfig::new(3, 3, 5, 2, 2).with_tiling(GruTiling::Narrow);
    let problem = GruProblem::random(&config, 2);
    let out = run(&problem);
    let reference = problem.reference();
    let s = problem.shape;
    let bpi = s.bpi();
    let h = s.hidden;

    for l in 0..s.layers {
        for t in 0..s.seq {
            for b in 0..s.batch {
                for g in 0..3 {
                    let start = bpi.offset([l, t, b, g * h]);
                    let range = start..start + h;
                    let what = format!("layer {l} step {t} row {b} gate {g}");
                    let bpi0 = (&out.bpi0[range.clone()], &reference.bpi0[range.clone()]);
                    let bpi1 = (&out.bpi1[range.clone()], &reference.bpi1[range]);
                    assert_close(bpi0.0, bpi0.1, RTOL, ATOL, &what);
                    assert_close(bpi1.0, bpi1.1, RTOL, ATOL, &what);
                }
            }
        }
    }
}

#[test]
fn ping_pong_halves_hold_layer_input_gradients() {
    let config = GruBackwardConfig::new(2, 2, 2, 2, 3);
    let problem = GruProblem::random(&config, 3);
    let out = run(&problem);
    let reference = problem.reference();
    let s = problem.shape;
    let half_len = s.sequence(s.hidden).numel();

    for roles in layer_schedule(s.layers) {
        if let GradDest::PingPong(half) = roles.dest {
            let start = s.partial_grad().offset([half, 0, 0, 0]);
            assert_close(
                &out.partial_grad[start..start + half_len],
                &reference.layer_input_grads[roles.layer],
                RTOL,
                ATOL,
                &format!("layer {} input gradient in half {half}", roles.layer),
            );
        }
    }
    check_against_reference(&problem, &out, RTOL, ATOL);
}

#[test]
fn zero_dropout_skips_mask() {
    let config = GruBackwardConfig::new(3, 2, 4, 2, 2);
    let problem = GruProblem::random(&config, 4);
    let plain = run(&problem);

    // a dropped-everything mask must be ignored when p = 0
    let dropped = vec![0.0; problem.shape.mask().numel()];
    let saved = saved_buffers::<f32>(&problem, Some(&dropped));
    let out = launch_saved::<f32>(&saved, &problem.shape, &config).expect("launch succeeds");

    assert_eq!(out.partial_grad, plain.partial_grad);
    assert_eq!(out.x_grad, plain.x_grad);
}

#[test]
fn half_dropout_with_full_mask_doubles_input_gradient() {
    let config = GruBackwardConfig::new(3, 2, 4, 2, 2).with_dropout(0.5);
    let problem = GruProblem::random(&config, 5).with_all_ones_mask();
    let scaled = run(&problem);
    let unscaled = run_with::<f32>(&problem, &config.clone().with_dropout(0.0));

    let s = problem.shape;
    let half_len = s.sequence(s.hidden).numel();
    let top = layer_schedule(s.layers)[0];
    let GradDest::PingPong(half) = top.dest else {
        panic!("top layer of two writes a ping-pong half");
    };
    let start = s.partial_grad().offset([half, 0, 0, 0]);
    let expected: Vec<f32> = unscaled.partial_grad[start..start + half_len]
        .iter()
        .map(|v| v * 2.0)
        .collect();
    assert_close(&scaled.partial_grad[start..start + half_len], &expected, RTOL, 0.0, "doubled");
    check_against_reference(&problem, &scaled, RTOL, ATOL);
}

#[test]
fn error_at_the_last_step_reaches_every_earlier_step() {
    // only y_err[T - 1] is non-zero: earlier steps see it solely through the
    // carried error, which exists only if steps run last to first
    let config = GruBackwardConfig::new(2, 3, 4, 3, 1);
    let mut problem = GruProblem::random(&config, 6);
    let s = problem.shape;
    let step_len = s.batch * s.hidden;
    problem.layer_err.fill(0.0);
    problem.y_err[..(s.seq - 1) * step_len].fill(0.0);

    let out = run(&problem);
    let x_step = s.batch * s.input;
    for t in 0..s.seq {
        let step = &out.x_grad[t * x_step..(t + 1) * x_step];
        assert!(step.iter().any(|v| v.abs() > 1e-6), "step {t} got no gradient");
    }
    check_against_reference(&problem, &out, RTOL, ATOL);
}

#[test_case(0 ; "no_prefetch")]
#[test_case(1 ; "shallow")]
#[test_case(3 ; "default_depth")]
#[test_case(MAX_PREFETCH_DISTANCE ; "deeper_than_run")]
fn prefetch_depth_does_not_change_results(depth: usize) {
    let config = GruBackwardConfig::new(5, 3, 7, 2, 2)
        .with_tiling(GruTiling::Narrow)
        .with_prefetch_distance(depth);
    let problem = GruProblem::random(&config, 7);
    let baseline = run_with::<f32>(&problem, &config.clone().with_prefetch_distance(0));
    let out = run(&problem);
    assert_eq!(out.x_grad, baseline.x_grad);
    assert_eq!(out.x0_grad, baseline.x0_grad);
}

#[test_case(5, 3, 7, 2, 1, 0.0 ; "odd_single_layer")]
#[test_case(5, 3, 7, 3, 2, 0.0 ; "odd_two_layers")]
#[test_case(5, 3, 7, 2, 3, 0.25 ; "odd_three_layers_dropout")]
#[test_case(9, 17, 13, 2, 2, 0.0 ; "several_cubes_and_tiles")]
#[test_case(18, 40, 36, 2, 2, 0.0 ; "wider_than_a_wide_tile")]
fn odd_sizes_match_reference(
    batch: usize,
    input: usize,
    hidden: usize,
    seq: usize,
    layers: usize,
    dropout: f32,
) {
    init_tracing();
    let config = GruBackwardConfig::new(batch, input, hidden, seq, layers).with_dropout(dropout);
    for tiling in [GruTiling::Narrow, GruTiling::Wide] {
        let config = config.clone().with_tiling(tiling);
        let problem = GruProblem::random(&config, 8);
        check_against_reference(&problem, &run(&problem), RTOL, ATOL);
    }
}

#[test]
#[cfg_attr(feature = "wgpu", ignore = "bf16 storage needs a cuda or rocm runtime")]
fn bf16_storage_matches_reference() {
    let config = GruBackwardConfig::new(4, 6, 8, 3, 2);
    let problem = GruProblem::random(&config, 9);
    let out = run_with::<bf16>(&problem, &config);
    let reference = problem.reference();
    assert_close(&out.x_grad, &reference.x_grad, BF16_RTOL, BF16_ATOL, "x_grad");
    assert_close(&out.x0_grad, &reference.x0_grad, BF16_RTOL, BF16_ATOL, "x0_grad");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn random_sizes_match_reference(
        batch in 1usize..10,
        input in 1usize..7,
        hidden in 1usize..10,
        seq in 1usize..4,
        layers in 1usize..4,
        dropout in prop_oneof![Just(0.0f32), Just(0.25f32)],
        seed in any::<u64>(),
    ) {
        let config = GruBackwardConfig::new(batch, input, hidden, seq, layers)
            .with_dropout(dropout)
            .with_tiling(GruTiling::Narrow);
        let problem = GruProblem::random(&config, seed);
        check_against_reference(&problem, &run(&problem), RTOL, ATOL);
    }
}

#[test]
fn invalid_inputs_are_rejected_before_launch() {
    let config = GruBackwardConfig::new(2, 3, 4, 2, 2);
    let problem = GruProblem::random(&config, 10);
    let saved = saved_buffers::<f32>(&problem, None);
    let s = &problem.shape;

    let empty = GruBackwardConfig::new(0, 3, 4, 2, 2);
    assert!(matches!(
        launch_saved::<f32>(&saved, s, &empty),
        Err(GruError::InvalidConfig(_))
    ));

    let certain_drop = config.clone().with_dropout(1.0);
    assert!(matches!(
        launch_saved::<f32>(&saved, s, &certain_drop),
        Err(GruError::InvalidDropout(_))
    ));

    let too_deep = config.clone().with_prefetch_distance(MAX_PREFETCH_DISTANCE + 1);
    assert!(matches!(
        launch_saved::<f32>(&saved, s, &too_deep),
        Err(GruError::InvalidConfig(_))
    ));
}

fn tensor<const D: usize>(data: &[f32], dims: [usize; D]) -> Tensor<TestBackend, D> {
    Tensor::from_data(TensorData::new(data.to_vec(), dims), &Default::default())
}

fn tensor_inputs(p: &GruProblem, with_mask: bool) -> GruBackwardInputs<TestBackend> {
    let s = p.shape;
    let (l, t, b, h) = (s.layers, s.seq, s.batch, s.hidden);
    GruBackwardInputs {
        layer_err: tensor(&p.layer_err, [l, b, h]),
        y_err: tensor(&p.y_err, [t, b, h]),
        reset_gate: tensor(&p.saved.reset_gate, [l, t, b, h]),
        input_gate: tensor(&p.saved.input_gate, [l, t, b, h]),
        new_gate: tensor(&p.saved.new_gate, [l, t, b, h]),
        hgate_2: tensor(&p.saved.hgate_2, [l, t, b, h]),
        hidden: tensor(&p.saved.hidden, [l, t + 1, b, h]),
        i_weights: tensor(&p.weights.input, [s.input_weights_len()]),
        h_weights: tensor(&p.weights.hidden, [s.hidden_weights_len()]),
        mask: with_mask.then(|| tensor(&p.mask, [l - 1, t, b, h])),
    }
}

fn host<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
    tensor.into_data().convert::<f32>().to_vec::<f32>().expect("f32 data")
}

#[test]
fn tensor_api_matches_reference() {
    let config = GruBackwardConfig::new(3, 5, 6, 3, 2).with_dropout(0.2);
    let problem = GruProblem::random(&config, 11);
    let grads = fused_gru_backward(tensor_inputs(&problem, true), &config).expect("valid inputs");
    let reference = problem.reference();

    let s = problem.shape;
    assert_eq!(grads.x_grad.dims(), [s.seq, s.batch, s.input]);
    assert_eq!(grads.x0_grad.dims(), [s.layers, s.batch, s.hidden]);
    assert_close(&host(grads.x_grad), &reference.x_grad, RTOL, ATOL, "x_grad");
    assert_close(&host(grads.x0_grad), &reference.x0_grad, RTOL, ATOL, "x0_grad");
}

#[test]
fn tensor_api_ignores_mask_without_dropout() {
    let config = GruBackwardConfig::new(3, 5, 6, 2, 2);
    let problem = GruProblem::random(&config, 13);
    let grads =
        fused_gru_backward(tensor_inputs(&problem, false), &config).expect("no mask needed");
    let reference = problem.reference();
    assert_close(&host(grads.x_grad), &reference.x_grad, RTOL, ATOL, "x_grad");
}

#[test]
fn tensor_api_reports_bad_inputs() {
    let config = GruBackwardConfig::new(2, 3, 4, 2, 2).with_dropout(0.3);
    let problem = GruProblem::random(&config, 12);
    let s = problem.shape;

    assert!(matches!(
        fused_gru_backward(tensor_inputs(&problem, false), &config),
        Err(GruError::InvalidConfig(_))
    ));

    let mut inputs = tensor_inputs(&problem, true);
    inputs.y_err = tensor(&problem.y_err, [s.seq * s.batch, s.hidden, 1]);
    let err = fused_gru_backward(inputs, &config).expect_err("y_err shape is wrong");
    assert_eq!(
        err,
        GruError::TensorShape {
            tensor: "y_err",
            expected: vec![2, 2, 4],
            actual: vec![4, 4, 1],
        }
    );
}
