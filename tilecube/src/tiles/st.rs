use std::marker::PhantomData;

use cubecl::prelude::*;

use super::dim::Dim;

/// Cube-shared staging tile of `R x C` elements, row-major.
#[derive(CubeType)]
pub struct St<F: Float, R: Dim, C: Dim> {
    pub data: SharedMemory<F>,
    #[cube(comptime)]
    _phantom: PhantomData<(R, C)>,
}

impl<F: Float, R: Dim, C: Dim> St<F, R, C> {
    pub const ROWS: usize = R::VALUE;
    pub const COLS: usize = C::VALUE;
    pub const LEN: usize = R::VALUE * C::VALUE;

    pub fn len() -> usize {
        Self::LEN
    }
}

#[cube]
impl<F: Float, R: Dim, C: Dim> St<F, R, C> {
    pub fn new() -> St<F, R, C> {
        St::<F, R, C> {
            data: SharedMemory::new(comptime!(St::<F, R, C>::len())),
            _phantom: PhantomData,
        }
    }
}
