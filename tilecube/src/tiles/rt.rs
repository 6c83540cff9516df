use std::marker::PhantomData;

use cubecl::prelude::*;

use crate::{binary_ops::*, unary_ops::*};

use super::dim::Dim;

/// Per-unit register tile of `R x C` elements, row-major.
///
/// Elements are plain scalars rather than `Line`s: tile origins in the GRU
/// buffers sit at arbitrary gate offsets, so nothing is line-aligned.
#[derive(CubeType)]
pub struct Rt<F: Float, R: Dim, C: Dim> {
    pub data: Array<F>,
    #[cube(comptime)]
    _phantom: PhantomData<(R, C)>,
    // This is just for ergonomics,
    // as we can't access Self::LEN due to CubeCL limitations
    #[cube(comptime)]
    len: usize,
}

impl<F: Float, R: Dim, C: Dim> Rt<F, R, C> {
    pub const ROWS: usize = R::VALUE;
    pub const COLS: usize = C::VALUE;
    pub const LEN: usize = R::VALUE * C::VALUE;

    pub fn len() -> usize {
        Self::LEN
    }
}

#[cube]
impl<F: Float, R: Dim, C: Dim> Rt<F, R, C> {
    pub fn new() -> Rt<F, R, C> {
        Rt::<F, R, C> {
            data: Array::new(comptime!(Rt::<F, R, C>::len())),
            _phantom: PhantomData,
            len: Self::LEN,
        }
    }

    pub fn apply_unary_op<O: UnaryOp<F>>(&mut self, op: O) {
        #[unroll]
        for i in 0..self.len {
            self.data[i] = op.apply(self.data[i]);
        }
    }

    pub fn apply_binary_op<O: BinaryOp<F>>(&mut self, op: O, other: &Rt<F, R, C>) {
        #[unroll]
        for i in 0..self.len {
            self.data[i] = op.apply(self.data[i], other.data[i]);
        }
    }

    pub fn copy_from(&mut self, other: &Rt<F, R, C>) {
        #[unroll]
        for i in 0..self.len {
            self.data[i] = other.data[i];
        }
    }
}
