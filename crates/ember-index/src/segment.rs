//! Extendible-hash segment: a local depth plus a fixed bucket array.
//!
//! Layout:
//! +------------------+ 0
//! | depth: u64       | 8
//! | bucket[0]        | 72
//! | ...              |
//! | bucket[255]      | 16392 (SEGMENT_BYTES)
//! +------------------+
//!
//! A segment referenced by a node directory is aliased by
//! `2^(global_depth - depth)` contiguous directory slots.

use crate::bucket::Bucket;
use crate::constants::{BUCKET_BYTES, SEGMENT_BYTES, SEGMENT_HEADER_BYTES, SLOT_BYTES};
use ember_common::Result;
use ember_pmem::PmemPool;

/// Allocates a segment with the given local depth.
///
/// The bucket array relies on the pool's zero-initialization; a nonzero
/// depth is flushed so a crash cannot resurrect it as depth zero.
pub(crate) fn allocate(pool: &mut PmemPool, depth: u8) -> Result<u64> {
    let seg = pool.allocate(SEGMENT_BYTES)?;
    if depth > 0 {
        pool.write_u64(seg, u64::from(depth));
        pool.persist(seg, SEGMENT_HEADER_BYTES);
    }
    Ok(seg)
}

/// Reads a segment's local depth.
#[inline]
pub(crate) fn depth(pool: &PmemPool, seg: u64) -> u8 {
    pool.read_u64(seg) as u8
}

/// Bumps a segment's local depth and flushes it. Last step of a split.
pub(crate) fn set_depth(pool: &mut PmemPool, seg: u64, depth: u8) {
    pool.write_u64(seg, u64::from(depth));
    pool.persist(seg, SEGMENT_HEADER_BYTES);
}

/// Pool offset of bucket `index` within the segment.
#[inline]
pub(crate) fn bucket_offset(seg: u64, index: usize) -> u64 {
    seg + SEGMENT_HEADER_BYTES as u64 + (index * BUCKET_BYTES) as u64
}

/// Pool offset of a slot's tag field.
#[inline]
pub(crate) fn slot_offset(seg: u64, bucket: usize, slot: usize) -> u64 {
    bucket_offset(seg, bucket) + (slot * SLOT_BYTES) as u64
}

/// Typed view of a bucket in pool memory.
#[inline]
pub(crate) fn bucket(pool: &PmemPool, seg: u64, index: usize) -> &Bucket {
    unsafe { &*(pool.ptr(bucket_offset(seg, index)) as *const Bucket) }
}
