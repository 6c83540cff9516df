//! Layer and time-step driver of the GRU backward-data kernel.
//!
//! Cube `g` owns batch rows `[g * WgM, min((g + 1) * WgM, B))` for the whole
//! launch and walks the layers top to bottom and, inside a layer, the steps
//! last to first. Each step is:
//!
//! 1. gate-derivative stage into `bpi0`/`bpi1` ([`gate_derivatives`]),
//! 2. `sync_cube()`,
//! 3. for output tile `j` from last to first: the hidden-side tile of the
//!    carried error, then the input-side tile of the layer input gradient,
//! 4. `sync_cube()`.
//!
//! The closing sync of a layer's last step also separates it from the next
//! layer, whose source half of `partial_grad` is then fully written for this
//! cube's rows. No cube reads rows another cube writes.

use cubecl::prelude::*;
use tilecube::{
    plane::{brgemm, brgemm_col, brgemm_row, load_rt, store_rt},
    prelude::*,
};

use super::{
    helpers::{GruParams, StBpi, StWh, StWi},
    stage::{apply_dropout, gate_derivatives, min_usize},
    types::{GruInputs, GruKernelConfig, GruOutputs, LayerCtx},
};

#[cube(launch)]
pub fn gru_backward_kernel<P: GruParams>(
    inputs: &GruInputs<P::EVal>,
    outputs: &mut GruOutputs<P::EVal>,
    #[comptime] config: GruKernelConfig,
) {
    let layers = inputs.layer_err.shape(0);
    let batch = inputs.layer_err.shape(1);
    let hidden = inputs.layer_err.shape(2);
    let seq = inputs.y_err.shape(0);
    let input = outputs.x_grad.shape(2);

    let row_start = CUBE_POS_X as usize * P::WgM::VALUE;
    let row_end = min_usize(row_start + P::WgM::VALUE, batch);

    let mut st_bpi = P::st_bpi();
    let mut st_wh = P::st_wh();
    let mut st_wi = P::st_wi();

    for i in 0..layers {
        let ping = i % 2;
        let ctx = LayerCtx::new(
            layers - 1 - i,
            layers,
            batch,
            hidden,
            input,
            seq,
            row_start,
            row_end,
            ping,
            1 - ping,
            comptime!(config.apply_dropout),
        );
        layer_backward::<P>(
            inputs,
            outputs,
            &ctx,
            &mut st_bpi,
            &mut st_wh,
            &mut st_wi,
            config,
        );
    }
}

/// Sweeps one layer from step `T - 1` down to `0`.
#[cube]
pub fn layer_backward<P: GruParams>(
    inputs: &GruInputs<P::EVal>,
    outputs: &mut GruOutputs<P::EVal>,
    ctx: &LayerCtx,
    st_bpi: &mut StBpi<P>,
    st_wh: &mut StWh<P>,
    st_wi: &mut StWi<P>,
    #[comptime] config: GruKernelConfig,
) {
    let depth = comptime!(config.prefetch_distance);
    let tiles_h = (ctx.hidden + P::WgN0::VALUE - 1) / P::WgN0::VALUE;
    let tiles_i = (ctx.width + P::WgN1::VALUE - 1) / P::WgN1::VALUE;
    let mut tiles = tiles_h;
    if tiles_i > tiles {
        tiles = tiles_i;
    }

    for s in 0..ctx.seq {
        let t = ctx.seq - 1 - s;
        let first_step = s == 0;

        gate_derivatives::<P>(inputs, outputs, ctx, t, first_step, depth);
        sync_cube();

        for jj in 0..tiles {
            let j = tiles - 1 - jj;
            if j < tiles_h {
                hidden_tile::<P>(inputs, outputs, ctx, st_bpi, st_wh, t, j, first_step);
            }
            if j < tiles_i {
                input_tile::<P>(inputs, outputs, ctx, st_bpi, st_wi, t, j, config);
            }
        }
        sync_cube();
    }
}

/// This cube's rows of the packed `[B, 3H]` block of step `t`.
#[cube]
fn bpi_rows(ctx: &LayerCtx, t: usize) -> TileDesc {
    let packed = 3 * ctx.hidden;
    TileDesc::new(ctx.bpi_step(t), packed, ctx.row_end, packed, 0, ctx.row_start)
}

/// `x0_grad[:, j-th tile] = (carry + partial[t]) * z + bpi0[t] x W_h`.
///
/// Each unit reads the carry tile it then overwrites, and no other unit
/// touches it in between.
#[cube]
fn hidden_tile<P: GruParams>(
    inputs: &GruInputs<P::EVal>,
    outputs: &mut GruOutputs<P::EVal>,
    ctx: &LayerCtx,
    st_bpi: &mut StBpi<P>,
    st_wh: &mut StWh<P>,
    t: usize,
    j: usize,
    first_step: bool,
) {
    let hidden = ctx.hidden;
    let start_n = j * P::WgN0::VALUE;
    let x = start_n + brgemm_col::<P::WgN0, P::SgN0>();
    let y = ctx.row_start + brgemm_row::<P::WgN0, P::SgM, P::SgN0>();

    let state = TileDesc::new(ctx.state_base, hidden, ctx.row_end, hidden, x, y);
    let step = TileDesc::new(ctx.seq_step(ctx.src_base, t), hidden, ctx.row_end, hidden, x, y);
    let gates = TileDesc::new(ctx.seq_step(ctx.gate_base, t), hidden, ctx.row_end, hidden, x, y);

    let mut acc = P::rt_hidden();
    let mut tmp = P::rt_hidden();
    if first_step {
        load_rt(&inputs.layer_err, &mut acc, &state);
    } else {
        load_rt(&outputs.x0_grad, &mut acc, &state);
    }
    if ctx.top {
        load_rt(&inputs.y_err, &mut tmp, &step);
    } else {
        load_rt(&outputs.partial_grad, &mut tmp, &step);
    }
    acc.add(&tmp);
    load_rt(&inputs.input_gate, &mut tmp, &gates);
    acc.mul(&tmp);

    let a_desc = bpi_rows(ctx, t);
    let b_desc = TileDesc::new(ctx.wh_base, hidden, 3 * hidden, hidden, start_n, 0);
    let inner = (3 * hidden + P::SgK::VALUE - 1) / P::SgK::VALUE;
    brgemm::<P::EVal, P::EAcc, P::WgM, P::WgN0, P::SgM, P::SgN0, P::SgK>(
        &mut acc,
        st_bpi,
        st_wh,
        &outputs.bpi0,
        &a_desc,
        &inputs.h_weights,
        &b_desc,
        inner,
    );

    store_rt(&acc, &mut outputs.x0_grad, &state);
}

/// `grad_out[t][:, j-th tile] = (bpi1[t] x W_i) * mask * scale`.
#[cube]
fn input_tile<P: GruParams>(
    inputs: &GruInputs<P::EVal>,
    outputs: &mut GruOutputs<P::EVal>,
    ctx: &LayerCtx,
    st_bpi: &mut StBpi<P>,
    st_wi: &mut StWi<P>,
    t: usize,
    j: usize,
    #[comptime] config: GruKernelConfig,
) {
    let hidden = ctx.hidden;
    let width = ctx.width;
    let start_n = j * P::WgN1::VALUE;
    let x = start_n + brgemm_col::<P::WgN1, P::SgN1>();
    let y = ctx.row_start + brgemm_row::<P::WgN1, P::SgM, P::SgN1>();

    let mut acc = P::rt_input();
    acc.zero();

    let a_desc = bpi_rows(ctx, t);
    let b_desc = TileDesc::new(ctx.wi_base, width, 3 * hidden, width, start_n, 0);
    let inner = (3 * hidden + P::SgK::VALUE - 1) / P::SgK::VALUE;
    brgemm::<P::EVal, P::EAcc, P::WgM, P::WgN1, P::SgM, P::SgN1, P::SgK>(
        &mut acc,
        st_bpi,
        st_wi,
        &outputs.bpi1,
        &a_desc,
        &inputs.i_weights,
        &b_desc,
        inner,
    );

    if comptime!(config.apply_dropout) {
        if ctx.dropout {
            // dropout only sits between layers, so `width == hidden` here
            let mask_base = ctx.seq_step(ctx.mask_base, t);
            let mask = TileDesc::new(mask_base, width, ctx.row_end, width, x, y);
            apply_dropout(&mut acc, &inputs.mask, &mask, comptime!(config.dropout_scale()));
        }
    }

    let out = TileDesc::new(ctx.out_step(t), width, ctx.row_end, width, x, y);
    if ctx.bottom {
        store_rt(&acc, &mut outputs.x_grad, &out);
    } else {
        store_rt(&acc, &mut outputs.partial_grad, &out);
    }
}
