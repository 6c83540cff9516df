use cubecl::prelude::*;

use crate::prelude::*;

/// Loads the tile at `desc` into this unit's registers.
///
/// Not a cooperative operation: every unit loads its own tile. Elements
/// outside the matrix read as zero, and storage precision `FIn` is widened
/// to `FAcc` on the way in.
#[cube]
pub fn load_rt<FIn: Float, FAcc: Float, R: Dim, C: Dim>(
    g_mem: &Tensor<FIn>,
    rt_mem: &mut Rt<FAcc, R, C>,
    desc: &TileDesc,
) {
    #[unroll(R::VALUE <= UNROLL_LIMIT)]
    for row in 0..R::VALUE {
        #[unroll]
        for col in 0..C::VALUE {
            let rt_idx = row * C::VALUE + col;
            if desc.contains(row, col) {
                rt_mem.data[rt_idx] = FAcc::cast_from(g_mem[desc.offset(row, col)]);
            } else {
                rt_mem.data[rt_idx] = FAcc::from_int(0);
            }
        }
    }
}

/// Cooperatively loads the `R x C` block at `desc` into shared memory.
///
/// All units of the cube take part, each loading a strided share of the
/// elements. The caller must `sync_cube()` before reading the tile.
#[cube]
pub fn load_st<FIn: Float, FAcc: Float, R: Dim, C: Dim>(
    g_mem: &Tensor<FIn>,
    s_mem: &mut St<FAcc, R, C>,
    desc: &TileDesc,
) {
    let total = comptime!(R::VALUE * C::VALUE);

    let num_threads = CUBE_DIM as usize;
    let tid = UNIT_POS as usize;

    for i in range_stepped(tid, total, num_threads) {
        let row = i / C::VALUE;
        let col = i % C::VALUE;

        if desc.contains(row, col) {
            s_mem.data[i] = FAcc::cast_from(g_mem[desc.offset(row, col)]);
        } else {
            s_mem.data[i] = FAcc::from_int(0);
        }
    }
}
