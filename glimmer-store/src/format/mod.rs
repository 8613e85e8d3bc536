//! The on-disk corpus container: bit-packed compressed frames.

pub mod bits;
pub mod block;
pub mod stream;
