#![allow(type_alias_bounds)]

use std::marker::PhantomData;

use cubecl::prelude::*;
use gru_core::GruError;
use tilecube::{plane::brgemm_units, prelude::*};

// Register tiles (Rt) - use EAcc (accumulator type)
pub type RtGate<P: GruParams> = Rt<P::EAcc, P::SgM, P::SgK>;
pub type RtHidden<P: GruParams> = Rt<P::EAcc, P::SgM, P::SgN0>;
pub type RtInput<P: GruParams> = Rt<P::EAcc, P::SgM, P::SgN1>;

// Shared staging tiles (St) - also EAcc, widened once on the way in
pub type StBpi<P: GruParams> = St<P::EAcc, P::WgM, P::SgK>;
pub type StWh<P: GruParams> = St<P::EAcc, P::SgK, P::WgN0>;
pub type StWi<P: GruParams> = St<P::EAcc, P::SgK, P::WgN1>;

/// Compile-time tiling and precision of the GRU backward kernel.
///
/// Both matmuls share the batch tile `WgM`, the per-unit row count `SgM` and
/// the reduction slice `SgK`. `WgN0`/`SgN0` tile the hidden-side output
/// (`x0_grad`), `WgN1`/`SgN1` the input side.
#[cube]
pub trait GruParams: Send + Sync + 'static {
    /// Value type of every buffer (e.g. bf16 for reduced memory)
    type EVal: Float;
    /// Accumulator type for registers (e.g. f32 for precision)
    type EAcc: Float;

    /// Batch rows per cube.
    type WgM: Dim;
    /// Batch rows per unit.
    type SgM: Dim;
    /// Reduction slice of both matmuls, and gate-stage tile width.
    type SgK: Dim;

    type WgN0: Dim;
    type SgN0: Dim;
    type WgN1: Dim;
    type SgN1: Dim;

    // CubeCL won't let us do default impls
    fn rt_gate() -> RtGate<Self>;
    fn rt_hidden() -> RtHidden<Self>;
    fn rt_input() -> RtInput<Self>;

    fn st_bpi() -> StBpi<Self>;
    fn st_wh() -> StWh<Self>;
    fn st_wi() -> StWi<Self>;
}

pub struct Params<EVal, EAcc, WgM, SgM, SgK, WgN0, SgN0, WgN1, SgN1> {
    _phantom: PhantomData<(EVal, EAcc, WgM, SgM, SgK, WgN0, SgN0, WgN1, SgN1)>,
}

#[cube]
impl<
    EVal: Float,
    EAcc: Float,
    WgM: Dim,
    SgM: Dim,
    SgK: Dim,
    WgN0: Dim,
    SgN0: Dim,
    WgN1: Dim,
    SgN1: Dim,
> GruParams for Params<EVal, EAcc, WgM, SgM, SgK, WgN0, SgN0, WgN1, SgN1>
{
    type EVal = EVal;
    type EAcc = EAcc;
    type WgM = WgM;
    type SgM = SgM;
    type SgK = SgK;
    type WgN0 = WgN0;
    type SgN0 = SgN0;
    type WgN1 = WgN1;
    type SgN1 = SgN1;

    fn rt_gate() -> RtGate<Self> {
        Rt::new()
    }

    fn rt_hidden() -> RtHidden<Self> {
        Rt::new()
    }

    fn rt_input() -> RtInput<Self> {
        Rt::new()
    }

    fn st_bpi() -> StBpi<Self> {
        St::new()
    }

    fn st_wh() -> StWh<Self> {
        St::new()
    }

    fn st_wi() -> StWi<Self> {
        St::new()
    }
}

/// 16 batch rows per cube, 32-wide output tiles, 32 units.
pub type WideParams<E> = Params<E, f32, D16, D4, D8, D32, D4, D32, D4>;

/// 4 batch rows per cube, 8-wide output tiles, 4 units.
pub type NarrowParams<E> = Params<E, f32, D4, D2, D4, D8, D4, D8, D4>;

/// Units per cube `P` runs on.
#[must_use]
pub fn cube_units<P: GruParams>() -> u32 {
    brgemm_units::<P::WgM, P::WgN0, P::SgM, P::SgN0>()
}

#[must_use]
pub fn cube_dim<P: GruParams>() -> CubeDim {
    CubeDim::new_1d(cube_units::<P>())
}

/// Checks that the two matmuls and the gate stage agree on the unit count
/// and that every sub-tile divides its block.
pub fn validate_params<P: GruParams>() -> Result<(), GruError> {
    let blocks = [
        ("WgM / SgM", P::WgM::VALUE, P::SgM::VALUE),
        ("WgN0 / SgN0", P::WgN0::VALUE, P::SgN0::VALUE),
        ("WgN1 / SgN1", P::WgN1::VALUE, P::SgN1::VALUE),
    ];
    for (name, block, sub) in blocks {
        if sub > block || block % sub != 0 {
            return Err(GruError::TileConfig(format!(
                "{name}: sub-tile {sub} does not divide block {block}"
            )));
        }
    }

    let hidden = brgemm_units::<P::WgM, P::WgN0, P::SgM, P::SgN0>();
    let input = brgemm_units::<P::WgM, P::WgN1, P::SgM, P::SgN1>();
    if hidden != input {
        return Err(GruError::TileConfig(format!(
            "hidden-side matmul needs {hidden} units, input side {input}"
        )));
    }
    Ok(())
}
