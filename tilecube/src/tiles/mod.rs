mod desc;
mod dim;
mod rt;
mod st;

pub mod mma;

pub use desc::*;
pub use dim::*;
pub use rt::*;
pub use st::*;
