//! Host launch of the GRU backward-data kernel.

use burn_backend::Shape;
use burn_cubecl::{
    CubeRuntime, FloatElement, kernel::into_contiguous, ops::numeric::empty_device,
    tensor::CubeTensor,
};
use cubecl::prelude::*;
use gru_core::{GruBackwardConfig, GruError, GruTiling};
use tilecube::prelude::{Dim, tiles_for};
use tracing::{debug, trace};

use super::{
    helpers::{GruParams, NarrowParams, WideParams, cube_dim, cube_units, validate_params},
    kernel::gru_backward_kernel,
    types::{
        GruInputsLaunch, GruKernelConfig, GruOutputsLaunch, GruSaved, GruScratch,
        layer_schedule,
    },
};

/// Matches the requested tiling to its params type and launches the kernel
/// with one cube per `WgM` batch rows.
macro_rules! dispatch_tiling {
    (
        $tiling:expr, $client:expr, $batch:expr, $inputs:expr, $outputs:expr, $config:expr;
        $($variant:ident => $params:ident),* $(,)?
    ) => {
        match $tiling {
            $(
                GruTiling::$variant => {
                    type P<E> = $params<E>;
                    validate_params::<P<F>>()?;
                    let cubes = tiles_for($batch, <P<F> as GruParams>::WgM::VALUE);
                    debug!(cubes, units = cube_units::<P<F>>(), "launching");
                    gru_backward_kernel::launch::<P<F>, R>(
                        $client,
                        CubeCount::Static(cubes as u32, 1, 1),
                        cube_dim::<P<F>>(),
                        $inputs,
                        $outputs,
                        $config,
                    )
                    .map_err(|e| GruError::Launch(format!("{e:?}")))?;
                }
            )*
        }
    };
}

/// Create an empty tensor with the same client/device as the template.
fn empty_like<R: CubeRuntime, F: FloatElement>(
    template: &CubeTensor<R>,
    shape: impl Into<Shape>,
) -> CubeTensor<R> {
    empty_device::<R, F>(
        template.client.clone(),
        template.device.clone(),
        shape.into(),
    )
}

/// Launches the backward-data kernel over device buffers.
///
/// `saved.mask` may be a one-element placeholder when `config` applies no
/// dropout. Every `scratch` buffer is fully written before it is read, so
/// none needs clearing.
pub fn launch_gru_backward<R: Runtime, F: Float + CubeElement>(
    client: &ComputeClient<R>,
    saved: &GruSaved<TensorHandleRef<'_, R>>,
    scratch: &GruScratch<TensorHandleRef<'_, R>>,
    config: &GruBackwardConfig,
) -> Result<(), GruError> {
    config.validate()?;
    let kernel_config = GruKernelConfig::new(config);

    debug!(
        batch = config.batch_size,
        input = config.input_size,
        hidden = config.hidden_size,
        seq = config.sequence_length,
        layers = config.layer_size,
        dropout = config.dropout,
        prefetch = config.prefetch_distance,
        tiling = ?config.tiling,
        "gru backward"
    );
    for roles in layer_schedule(config.layer_size) {
        trace!(
            layer = roles.layer,
            source = ?roles.source,
            dest = ?roles.dest,
            "layer roles"
        );
    }

    let inputs = GruInputsLaunch::<F, R>::new(
        saved.layer_err.as_tensor_arg(1),
        saved.y_err.as_tensor_arg(1),
        saved.reset_gate.as_tensor_arg(1),
        saved.input_gate.as_tensor_arg(1),
        saved.new_gate.as_tensor_arg(1),
        saved.hgate_2.as_tensor_arg(1),
        saved.hidden.as_tensor_arg(1),
        saved.i_weights.as_tensor_arg(1),
        saved.h_weights.as_tensor_arg(1),
        saved.mask.as_tensor_arg(1),
    );
    let outputs = GruOutputsLaunch::<F, R>::new(
        scratch.partial_grad.as_tensor_arg(1),
        scratch.x_grad.as_tensor_arg(1),
        scratch.x0_grad.as_tensor_arg(1),
        scratch.bpi0.as_tensor_arg(1),
        scratch.bpi1.as_tensor_arg(1),
    );

    dispatch_tiling!(
        config.tiling, client, config.batch_size, inputs, outputs, kernel_config;
        Wide => WideParams,
        Narrow => NarrowParams,
    );
    Ok(())
}

/// Runs the backward-data pass on `saved`, returning `(x_grad, x0_grad)`.
pub fn backward<R: CubeRuntime, F: FloatElement>(
    saved: GruSaved<CubeTensor<R>>,
    config: &GruBackwardConfig,
) -> Result<(CubeTensor<R>, CubeTensor<R>), GruError> {
    let saved = saved.map(into_contiguous);
    let s = config.shape();
    let template = &saved.y_err;

    let scratch = GruScratch {
        partial_grad: empty_like::<R, F>(template, s.partial_grad().dims()),
        x_grad: empty_like::<R, F>(template, s.sequence(s.input).dims()),
        x0_grad: empty_like::<R, F>(template, s.layer_states().dims()),
        bpi0: empty_like::<R, F>(template, s.bpi().dims()),
        bpi1: empty_like::<R, F>(template, s.bpi().dims()),
    };

    launch_gru_backward::<R, F>(
        &template.client,
        &saved.as_ref().map(CubeTensor::as_handle_ref),
        &scratch.as_ref().map(CubeTensor::as_handle_ref),
        config,
    )?;

    Ok((scratch.x_grad, scratch.x0_grad))
}
