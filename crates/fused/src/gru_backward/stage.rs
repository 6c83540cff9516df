//! Gate-derivative stage and dropout rescale.
//!
//! # Mathematical Structure
//!
//! With `dh = carry + partial[t]` the error on the step output, and the saved
//! `r`, `z`, `n`, `g2 = W_hn h + b_hn` and incoming state `h`:
//!
//! ```text
//! da_n = dh * (1 - z) * (1 - n^2)     -> bpi1[2]
//! dz   = dh * (h - n) * z * (1 - z)   -> bpi0[1], bpi1[1]
//! dg2  = da_n * r                     -> bpi0[2]
//! dr   = da_n * g2 * r * (1 - r)      -> bpi0[0], bpi1[0]
//! ```
//!
//! `bpi*[g]` is the `[B, H]` sub-matrix at column `g * H` of the step's
//! `[B, 3H]` block.

use cubecl::prelude::*;
use tilecube::{
    plane::{TileStream, load_rt, store_rt},
    prelude::*,
};

use super::{
    helpers::GruParams,
    types::{GruInputs, GruOutputs, LayerCtx},
};

#[cube]
pub(crate) fn min_usize(a: usize, b: usize) -> usize {
    let mut m = a;
    if b < a {
        m = b;
    }
    m
}

/// Descriptor of gate `gate`'s sub-matrix of a packed `[B, 3H]` step block,
/// with the tile origin at `(col, row)` inside that gate.
#[cube]
pub fn gate_desc(
    step_base: usize,
    gate: usize,
    ctx: &LayerCtx,
    col: usize,
    row: usize,
) -> TileDesc {
    let hidden = ctx.hidden;
    TileDesc::new(step_base + gate * hidden, hidden, ctx.row_end, 3 * hidden, col, row)
}

/// Hands out the next tile of `stream` from `a` when `use_a`, else from `b`.
#[cube]
fn load_from<FIn: Float, F: Float, R: Dim, C: Dim>(
    stream: &mut TileStream<F, R, C>,
    use_a: bool,
    a: &Tensor<FIn>,
    b: &Tensor<FIn>,
    rt: &mut Rt<F, R, C>,
) {
    if use_a {
        stream.load::<FIn>(a, rt);
    } else {
        stream.load::<FIn>(b, rt);
    }
}

#[cube]
fn prefetch_from<FIn: Float, F: Float, R: Dim, C: Dim>(
    stream: &mut TileStream<F, R, C>,
    use_a: bool,
    a: &Tensor<FIn>,
    b: &Tensor<FIn>,
) {
    if use_a {
        stream.prefetch::<FIn>(a);
    } else {
        stream.prefetch::<FIn>(b);
    }
}

/// Stores `rt` into gate `gate` of both packed blocks.
#[cube]
fn store_both<FAcc: Float, FOut: Float, R: Dim, C: Dim>(
    rt: &Rt<FAcc, R, C>,
    bpi0: &mut Tensor<FOut>,
    bpi1: &mut Tensor<FOut>,
    desc: &TileDesc,
) {
    store_rt::<FAcc, FOut, R, C>(rt, bpi0, desc);
    store_rt::<FAcc, FOut, R, C>(rt, bpi1, desc);
}

/// Computes and stores the packed gate derivatives of step `t` for the rows
/// of this cube.
///
/// Units split the group's rows into `SgM`-row bands and the hidden width
/// into runs of `SgK`-wide tiles; each unit streams its run through a
/// `depth`-deep prefetch pipeline. The carried error comes from `layer_err`
/// on the layer's first processed step and from `x0_grad` after that.
#[cube]
pub fn gate_derivatives<P: GruParams>(
    inputs: &GruInputs<P::EVal>,
    outputs: &mut GruOutputs<P::EVal>,
    ctx: &LayerCtx,
    t: usize,
    first_step: bool,
    #[comptime] depth: usize,
) {
    let hidden = ctx.hidden;
    let sg_k = P::SgK::VALUE;
    let col_lanes = comptime!(P::WgN0::VALUE / P::SgN0::VALUE);

    let unit = UNIT_POS as usize;
    let row = ctx.row_start + (unit / col_lanes) * P::SgM::VALUE;
    let k_tiles = (hidden + sg_k - 1) / sg_k;
    let per_lane = (k_tiles + col_lanes - 1) / col_lanes;
    let first = min_usize((unit % col_lanes) * per_lane, k_tiles);
    let last = min_usize(first + per_lane, k_tiles);

    if row < ctx.row_end && first < last {
        let first_col = first * sg_k;
        let state = TileDesc::new(ctx.state_base, hidden, ctx.row_end, hidden, first_col, row);
        let gates = TileDesc::new(
            ctx.seq_step(ctx.gate_base, t),
            hidden,
            ctx.row_end,
            hidden,
            first_col,
            row,
        );
        let partial = TileDesc::new(
            ctx.seq_step(ctx.src_base, t),
            hidden,
            ctx.row_end,
            hidden,
            first_col,
            row,
        );
        // step `t` of `hidden` is the state entering step `t`
        let prev = TileDesc::new(
            ctx.seq_step(ctx.hidden_base, t),
            hidden,
            ctx.row_end,
            hidden,
            first_col,
            row,
        );

        let mut carry_s = TileStream::<P::EAcc, P::SgM, P::SgK>::new(state, depth);
        let mut partial_s = TileStream::<P::EAcc, P::SgM, P::SgK>::new(partial, depth);
        let mut update_s = TileStream::<P::EAcc, P::SgM, P::SgK>::new(gates, depth);
        let mut new_s = TileStream::<P::EAcc, P::SgM, P::SgK>::new(gates, depth);
        let mut hidden_s = TileStream::<P::EAcc, P::SgM, P::SgK>::new(prev, depth);
        let mut reset_s = TileStream::<P::EAcc, P::SgM, P::SgK>::new(gates, depth);
        let mut hgate_s = TileStream::<P::EAcc, P::SgM, P::SgK>::new(gates, depth);

        #[unroll]
        for _ in 0..depth {
            prefetch_from(&mut carry_s, first_step, &inputs.layer_err, &outputs.x0_grad);
            prefetch_from(&mut partial_s, ctx.top, &inputs.y_err, &outputs.partial_grad);
            update_s.prefetch(&inputs.input_gate);
            new_s.prefetch(&inputs.new_gate);
            hidden_s.prefetch(&inputs.hidden);
            reset_s.prefetch(&inputs.reset_gate);
            hgate_s.prefetch(&inputs.hgate_2);
        }

        let bpi_step = ctx.bpi_step(t);

        let mut dh = P::rt_gate();
        let mut tmp = P::rt_gate();
        let mut z = P::rt_gate();
        let mut one_minus_z = P::rt_gate();
        let mut n = P::rt_gate();
        let mut h_prev = P::rt_gate();
        let mut r = P::rt_gate();
        let mut g2 = P::rt_gate();
        let mut da_n = P::rt_gate();
        let mut d = P::rt_gate();

        for tile in first..last {
            let col = tile * sg_k;

            load_from(&mut carry_s, first_step, &inputs.layer_err, &outputs.x0_grad, &mut dh);
            prefetch_from(&mut carry_s, first_step, &inputs.layer_err, &outputs.x0_grad);
            load_from(&mut partial_s, ctx.top, &inputs.y_err, &outputs.partial_grad, &mut tmp);
            prefetch_from(&mut partial_s, ctx.top, &inputs.y_err, &outputs.partial_grad);
            update_s.load(&inputs.input_gate, &mut z);
            update_s.prefetch(&inputs.input_gate);
            new_s.load(&inputs.new_gate, &mut n);
            new_s.prefetch(&inputs.new_gate);
            hidden_s.load(&inputs.hidden, &mut h_prev);
            hidden_s.prefetch(&inputs.hidden);

            dh.add(&tmp);
            one_minus_z.copy_from(&z);
            one_minus_z.one_minus();

            // da_n = dh * (1 - z) * (1 - n^2)
            da_n.copy_from(&n);
            da_n.square();
            da_n.one_minus();
            da_n.mul(&one_minus_z);
            da_n.mul(&dh);
            store_rt(&da_n, &mut outputs.bpi1, &gate_desc(bpi_step, 2, ctx, col, row));

            // dz = dh * (h - n) * z * (1 - z)
            d.copy_from(&h_prev);
            d.sub(&n);
            d.mul(&z);
            d.mul(&one_minus_z);
            d.mul(&dh);
            store_both(
                &d,
                &mut outputs.bpi0,
                &mut outputs.bpi1,
                &gate_desc(bpi_step, 1, ctx, col, row),
            );

            reset_s.load(&inputs.reset_gate, &mut r);
            reset_s.prefetch(&inputs.reset_gate);
            hgate_s.load(&inputs.hgate_2, &mut g2);
            hgate_s.prefetch(&inputs.hgate_2);

            // dg2 = da_n * r
            d.copy_from(&da_n);
            d.mul(&r);
            store_rt(&d, &mut outputs.bpi0, &gate_desc(bpi_step, 2, ctx, col, row));

            // dr = da_n * g2 * r * (1 - r)
            tmp.copy_from(&r);
            tmp.one_minus();
            d.copy_from(&da_n);
            d.mul(&g2);
            d.mul(&r);
            d.mul(&tmp);
            store_both(
                &d,
                &mut outputs.bpi0,
                &mut outputs.bpi1,
                &gate_desc(bpi_step, 0, ctx, col, row),
            );
        }
    }
}

/// `acc *= mask * scale`, with the mask tile at `desc`.
#[cube]
pub fn apply_dropout<FIn: Float, F: Float, R: Dim, C: Dim>(
    acc: &mut Rt<F, R, C>,
    mask: &Tensor<FIn>,
    desc: &TileDesc,
    #[comptime] scale: f32,
) {
    let mut keep = Rt::<F, R, C>::new();
    load_rt::<FIn, F, R, C>(mask, &mut keep, desc);
    keep.mul_scalar(F::cast_from(scale));
    acc.mul(&keep);
}
