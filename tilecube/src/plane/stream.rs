use std::marker::PhantomData;

use cubecl::prelude::*;

use crate::{plane::load_rt, prelude::*};

/// Prefetching reader over a run of `R x C` tiles laid side by side along
/// the columns of one matrix, starting at the origin of `desc`.
///
/// [`TileStream::prefetch`] reads the next tile of the run into a ring of
/// `depth` register slots ahead of its use; [`TileStream::load`] hands the
/// tiles out in order, from the ring when the tile was prefetched and
/// straight from memory otherwise. With `depth == 0` every `load` is a
/// direct read. Tiles past the matrix read as zero, like [`load_rt`].
#[derive(CubeType)]
pub struct TileStream<F: Float, R: Dim, C: Dim> {
    ring: Array<F>,
    desc: TileDesc,
    /// Tiles read into the ring so far.
    fetched: usize,
    /// Tiles handed out by `load` so far.
    consumed: usize,
    #[cube(comptime)]
    depth: usize,
    #[cube(comptime)]
    _phantom: PhantomData<(R, C)>,
}

#[cube]
impl<F: Float, R: Dim, C: Dim> TileStream<F, R, C> {
    pub fn new(desc: TileDesc, #[comptime] depth: usize) -> TileStream<F, R, C> {
        TileStream::<F, R, C> {
            ring: Array::new(comptime!(depth.max(1) * R::VALUE * C::VALUE)),
            desc,
            fetched: 0,
            consumed: 0,
            depth,
            _phantom: PhantomData,
        }
    }

    /// Reads the next unfetched tile into the ring, if a slot is free.
    pub fn prefetch<FIn: Float>(&mut self, g_mem: &Tensor<FIn>) {
        let depth = comptime!(self.depth);
        if comptime!(depth > 0) {
            if self.fetched < self.consumed + depth {
                let slot = (self.fetched % depth) * comptime!(R::VALUE * C::VALUE);
                let desc = self.desc.step_cols(self.fetched * C::VALUE);

                #[unroll(R::VALUE <= UNROLL_LIMIT)]
                for row in 0..R::VALUE {
                    #[unroll]
                    for col in 0..C::VALUE {
                        let idx = slot + row * C::VALUE + col;
                        if desc.contains(row, col) {
                            self.ring[idx] = F::cast_from(g_mem[desc.offset(row, col)]);
                        } else {
                            self.ring[idx] = F::from_int(0);
                        }
                    }
                }

                self.fetched += 1;
            }
        }
    }

    /// Hands out the next tile of the run.
    pub fn load<FIn: Float>(&mut self, g_mem: &Tensor<FIn>, rt_mem: &mut Rt<F, R, C>) {
        let depth = comptime!(self.depth);
        if comptime!(depth > 0) {
            if self.consumed < self.fetched {
                let slot = (self.consumed % depth) * comptime!(R::VALUE * C::VALUE);
                #[unroll]
                for i in 0..comptime!(R::VALUE * C::VALUE) {
                    rt_mem.data[i] = self.ring[slot + i];
                }
            } else {
                load_rt(g_mem, rt_mem, &self.desc.step_cols(self.consumed * C::VALUE));
            }
        } else {
            load_rt(g_mem, rt_mem, &self.desc.step_cols(self.consumed * C::VALUE));
        }
        self.consumed += 1;
    }
}
