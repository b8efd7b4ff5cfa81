pub(crate) mod pool;
pub(crate) mod slab;

pub(crate) use slab::{Key, Slab};
