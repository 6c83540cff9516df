mod load;
mod mma;
mod store;
mod stream;

#[cfg(test)]
mod tests;

pub use load::*;
pub use mma::*;
pub use store::*;
pub use stream::*;
