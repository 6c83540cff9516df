use cubecl::prelude::*;

use crate::prelude::*;

/// Writes the part of this unit's tile that lies inside the matrix at `desc`,
/// narrowing `FAcc` to the storage precision `FOut`.
///
/// Elements past the clamped extent are dropped, so a boundary tile never
/// writes outside its matrix.
#[cube]
pub fn store_rt<FAcc: Float, FOut: Float, R: Dim, C: Dim>(
    rt_mem: &Rt<FAcc, R, C>,
    g_mem: &mut Tensor<FOut>,
    desc: &TileDesc,
) {
    #[unroll(R::VALUE <= UNROLL_LIMIT)]
    for row in 0..R::VALUE {
        #[unroll]
        for col in 0..C::VALUE {
            if desc.contains(row, col) {
                g_mem[desc.offset(row, col)] = FOut::cast_from(rt_mem.data[row * C::VALUE + col]);
            }
        }
    }
}
