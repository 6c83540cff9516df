#![allow(non_snake_case)]

use cubecl::prelude::*;

use crate::{prelude::*, tiles::Dim};

/// C += A * B
///
/// LAYOUT ASSUMPTIONS:
/// - A: shared `[M, K]`, row-major.
/// - B: shared `[K, N]`, row-major.
/// - C: register `[CM, CN]`, the sub-tile of the `[M, N]` product whose
///   top-left element sits at `(offset_m, offset_n)`.
#[cube]
pub fn mma_AB<F: Float, CM: Dim, CN: Dim, M: Dim, K: Dim, N: Dim>(
    c: &mut Rt<F, CM, CN>,
    a: &St<F, M, K>,
    b: &St<F, K, N>,
    offset_m: usize,
    offset_n: usize,
) {
    #[unroll(K::VALUE <= UNROLL_LIMIT_HOT)]
    for k in 0..K::VALUE {
        #[unroll]
        for i in 0..CM::VALUE {
            let a_val = a.data[(offset_m + i) * K::VALUE + k];
            #[unroll]
            for j in 0..CN::VALUE {
                c.data[i * CN::VALUE + j] += a_val * b.data[k * N::VALUE + offset_n + j];
            }
        }
    }
}
