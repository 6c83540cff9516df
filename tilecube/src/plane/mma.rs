use cubecl::prelude::*;

use crate::{
    plane::load_st,
    prelude::*,
    tiles::mma::mma_AB,
};

/// Units a `WgM x WgN` block needs when each owns an `SgM x SgN` sub-tile.
#[must_use]
pub fn brgemm_units<WgM: Dim, WgN: Dim, SgM: Dim, SgN: Dim>() -> u32 {
    ((WgM::VALUE / SgM::VALUE) * (WgN::VALUE / SgN::VALUE)) as u32
}

/// Row of this unit's accumulator sub-tile inside the `WgM x WgN` block.
#[cube]
pub fn brgemm_row<WgN: Dim, SgM: Dim, SgN: Dim>() -> usize {
    let units_n = comptime!(WgN::VALUE / SgN::VALUE);
    (UNIT_POS as usize / units_n) * SgM::VALUE
}

/// Column of this unit's accumulator sub-tile inside the `WgM x WgN` block.
#[cube]
pub fn brgemm_col<WgN: Dim, SgN: Dim>() -> usize {
    let units_n = comptime!(WgN::VALUE / SgN::VALUE);
    (UNIT_POS as usize % units_n) * SgN::VALUE
}

/// Cube-cooperative batch-reduce matmul: `acc += A x B`.
///
/// `a_desc` places the `[WgM, K]` row block of A and `b_desc` the `[K, WgN]`
/// column block of B. Each of the `inner_loop_count` iterations stages one
/// `SgK`-deep slice of both through shared memory and accumulates it into
/// the unit's `SgM x SgN` sub-tile at ([`brgemm_row`], [`brgemm_col`]).
/// Slices past either matrix read as zero, so a ragged K or N needs no
/// special casing.
///
/// Every unit of the cube must call this with the same arguments: the
/// staging is separated by `sync_cube()` on both sides of the multiply.
#[cube]
pub fn brgemm<FIn: Float, FAcc: Float, WgM: Dim, WgN: Dim, SgM: Dim, SgN: Dim, SgK: Dim>(
    acc: &mut Rt<FAcc, SgM, SgN>,
    st_a: &mut St<FAcc, WgM, SgK>,
    st_b: &mut St<FAcc, SgK, WgN>,
    a: &Tensor<FIn>,
    a_desc: &TileDesc,
    b: &Tensor<FIn>,
    b_desc: &TileDesc,
    inner_loop_count: usize,
) {
    let units = comptime!((WgM::VALUE / SgM::VALUE) * (WgN::VALUE / SgN::VALUE));
    let offset_m = brgemm_row::<WgN, SgM, SgN>();
    let offset_n = brgemm_col::<WgN, SgN>();

    for i in 0..inner_loop_count {
        let k_offset = i * SgK::VALUE;

        load_st::<FIn, FAcc, WgM, SgK>(a, st_a, &a_desc.step_cols(k_offset));
        load_st::<FIn, FAcc, SgK, WgN>(b, st_b, &b_desc.step_rows(k_offset));

        sync_cube();

        if (UNIT_POS as usize) < units {
            mma_AB::<FAcc, SgM, SgN, WgM, SgK, WgN>(acc, st_a, st_b, offset_m, offset_n);
        }

        sync_cube();
    }
}
