/// Marker trait for compile-time dimensions.
/// CubeCL doesn't like const generics, so we improvise.
pub trait Dim: Send + Sync + 'static {
    const VALUE: usize;
}

/// Compile-time dimension of 2.
pub struct D2;
impl Dim for D2 {
    const VALUE: usize = 2;
}

/// Compile-time dimension of 4.
pub struct D4;
impl Dim for D4 {
    const VALUE: usize = 4;
}

/// Compile-time dimension of 8.
pub struct D8;
impl Dim for D8 {
    const VALUE: usize = 8;
}

/// Compile-time dimension of 16.
pub struct D16;
impl Dim for D16 {
    const VALUE: usize = 16;
}

/// Compile-time dimension of 32.
pub struct D32;
impl Dim for D32 {
    const VALUE: usize = 32;
}

/// Number of `tile`-sized steps needed to cover `extent`.
#[must_use]
pub fn tiles_for(extent: usize, tile: usize) -> usize {
    extent.div_ceil(tile)
}
