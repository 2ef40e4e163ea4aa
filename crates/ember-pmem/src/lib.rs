//! EmberDB persistent-memory pool.
//!
//! Realizes the durable-allocator collaborator of the index: one operation,
//! allocate a zero-initialized durable block, plus the cache-line flush and
//! fence primitives every index mutation is ordered by.

pub mod persist;
pub mod pool;

pub use persist::{flush_range, store_fence, CACHE_LINE};
pub use pool::PmemPool;
