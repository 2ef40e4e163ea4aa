//! Index layout constants.

/// Key-value slots per bucket.
pub(crate) const BUCKET_SLOTS: usize = 4;

/// Low bits of a subkey selecting the bucket within a segment.
pub(crate) const BUCKET_BITS: usize = 8;

/// Buckets per segment.
pub(crate) const SEGMENT_BUCKETS: usize = 1 << BUCKET_BITS;

/// Bucket slot size: 8-byte tag plus 8-byte payload.
pub(crate) const SLOT_BYTES: usize = 16;

/// Bucket size in bytes.
pub(crate) const BUCKET_BYTES: usize = BUCKET_SLOTS * SLOT_BYTES;

/// Segment header size (local depth).
pub(crate) const SEGMENT_HEADER_BYTES: usize = 8;

/// Total segment size in bytes.
pub(crate) const SEGMENT_BYTES: usize = SEGMENT_HEADER_BYTES + SEGMENT_BUCKETS * BUCKET_BYTES;

/// Compressed prefix capacity of a node header.
pub(crate) const PREFIX_CAPACITY: usize = 6;

/// Header length sentinel: no prefix committed yet.
pub(crate) const PREFIX_UNSET: u8 = 7;

/// Slots in a node's in-prefix value array.
pub(crate) const TREE_VALUE_SLOTS: usize = 7;

/// Key-value record size.
pub(crate) const RECORD_BYTES: usize = 16;

/// In-prefix value array size.
pub(crate) const TREE_VALUES_BYTES: usize = TREE_VALUE_SLOTS * RECORD_BYTES;

/// Node header size: prefix header, directory geometry, value-array offset.
pub(crate) const NODE_HEADER_BYTES: usize = 24;

/// Size of the persistent root anchor cell.
pub(crate) const ANCHOR_BYTES: usize = 8;
