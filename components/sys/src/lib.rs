pub mod p2;
pub mod bitops;

pub use p2::*;
pub use bitops::*;
