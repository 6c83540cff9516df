//! Tile-level building blocks for cubecl kernels.
//!
//! Kernels are written against a small vocabulary: per-unit register tiles
//! ([`tiles::Rt`]), cube-shared staging tiles ([`tiles::St`]), rectangular
//! windows into flat buffers ([`tiles::TileDesc`]), clamped loads and stores,
//! a prefetching tile reader ([`plane::TileStream`]) and a cube-cooperative
//! accumulate-matmul ([`plane::brgemm`]).

#![allow(
    clippy::identity_op,
    reason = "For `addr + 0`, it makes some stuff cleaner to read"
)]
#![allow(
    clippy::len_without_is_empty,
    reason = "Empty tiles aren't a thing, so this method would be confusing"
)]
#![allow(clippy::needless_range_loop)]
#![allow(
    clippy::trivially_copy_pass_by_ref,
    reason = "erroneous false positives on #[cube] functions"
)]

pub mod binary_ops;
pub mod plane;
pub mod tiles;
pub mod unary_ops;

#[cfg(any(test, feature = "test-utils"))]
#[macro_use]
pub mod test_utils;

/// Maximum loop iteration count to unconditionally unroll (general/outer loops)
pub const UNROLL_LIMIT: usize = 4;
/// Maximum loop iteration count to unconditionally unroll (hot/inner loops)
pub const UNROLL_LIMIT_HOT: usize = 8;

pub mod prelude {
    pub use crate::UNROLL_LIMIT;
    pub use crate::UNROLL_LIMIT_HOT;
    pub use crate::plane;
    #[cfg(test)]
    pub use crate::test_kernel;
    pub use crate::tiles::*;
}
