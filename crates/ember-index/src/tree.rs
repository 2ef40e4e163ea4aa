//! Tree facade: insert, search, and memory accounting.
//!
//! Descent consumes the key most-significant byte first: each node's
//! compressed prefix, then one 32-bit subkey resolved through the node's
//! directory, segment, and bucket. A key that ends inside a node's prefix
//! lives in that node's in-prefix value array instead of the hash level.
//!
//! Durability discipline on every mutation: new content is flushed before
//! the pointer or tag write that makes it reachable, a payload is flushed
//! before the tag that marks its slot occupied, and the predecessor
//! retargeting that publishes a restructured subtree is the last flush of
//! the operation. Restructuring never mutates a reachable node in place; a
//! node whose prefix must shrink is re-seated as a fresh copy sharing its
//! segments, and the superseded block is abandoned unreclaimed.

use crate::bucket::{self, SlotPayload};
use crate::constants::{ANCHOR_BYTES, RECORD_BYTES, TREE_VALUE_SLOTS};
use crate::node::{self, SlotHandle};
use crate::segment;
use ember_common::{key, EmberError, IndexConfig, Result, MAX_GLOBAL_DEPTH};
use ember_pmem::PmemPool;

/// A key-value pair, as stored in pool records and returned by scans.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyValue {
    pub key: u64,
    pub value: u64,
}

impl KeyValue {
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.key == 0 && self.value == 0
    }
}

/// Persistent-memory index mapping 64-bit keys to 64-bit values.
///
/// Single-writer: mutation takes `&mut self`. Lookups may run concurrently
/// with each other but are not guaranteed a consistent snapshot against an
/// in-flight insert; callers needing that serialize externally.
pub struct RadixTreeIndex {
    pub(crate) pool: PmemPool,
    /// Pool offset of the root anchor cell, the durable root reference.
    anchor: u64,
}

impl RadixTreeIndex {
    /// Creates an index on a fresh pool with an empty root directory.
    pub fn create(pool: PmemPool) -> Result<Self> {
        Self::create_with_depth(pool, 0)
    }

    /// Creates an index whose root directory is pre-sized to
    /// `2^initial_global_depth` segments.
    pub fn create_with_depth(mut pool: PmemPool, initial_global_depth: u8) -> Result<Self> {
        if initial_global_depth > MAX_GLOBAL_DEPTH {
            return Err(EmberError::InvalidParameter {
                name: "initial_global_depth".to_string(),
                value: initial_global_depth.to_string(),
            });
        }
        let anchor = pool.allocate(ANCHOR_BYTES)?;
        let root = node::allocate(&mut pool, 1, initial_global_depth)?;
        node::persist_block(&mut pool, root);
        pool.write_u64(anchor, root);
        pool.persist(anchor, ANCHOR_BYTES);
        Ok(Self { pool, anchor })
    }

    /// Builds the pool described by `config` and creates an index on it.
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        let pool = match &config.pool_path {
            Some(path) => PmemPool::create_file(path, config.pool_capacity)?,
            None => PmemPool::with_capacity(config.pool_capacity)?,
        };
        Self::create_with_depth(pool, config.initial_global_depth)
    }

    /// Reopens an index from a pool holding one, given its anchor offset.
    /// Bootstrap (re-mapping the pool, locating the anchor) is the caller's
    /// concern.
    pub fn open(pool: PmemPool, anchor: u64) -> Self {
        Self { pool, anchor }
    }

    /// Pool offset of the root anchor cell, for reopening.
    pub fn anchor(&self) -> u64 {
        self.anchor
    }

    pub fn pool(&self) -> &PmemPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut PmemPool {
        &mut self.pool
    }

    pub fn into_pool(self) -> PmemPool {
        self.pool
    }

    #[inline]
    pub(crate) fn root(&self) -> u64 {
        self.pool.read_u64(self.anchor)
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts a key-value pair; an existing key's value is overwritten in
    /// place.
    pub fn insert(&mut self, key: u64, value: u64) -> Result<()> {
        let root = self.root();
        let anchor = self.anchor;
        self.insert_at(root, SlotHandle::Anchor { cell: anchor }, key, value, 0)?;
        Ok(())
    }

    /// Inserts into the subtree rooted at `entry`, entered at key byte
    /// `start`. Returns the subtree root, which changes when a split or
    /// directory doubling replaces it; `entry_link` is the reference to
    /// retarget in that case (or `Detached` for a subtree not yet
    /// published).
    fn insert_at(
        &mut self,
        entry: u64,
        entry_link: SlotHandle,
        key: u64,
        value: u64,
        start: usize,
    ) -> Result<u64> {
        let mut subtree = entry;
        let mut node_off = entry;
        let mut link = entry_link;
        let mut pos = start;
        loop {
            let hdr = *node::header(&self.pool, node_off);
            if hdr.prefix.is_unset() {
                // first insert into a fresh node: commit a prefix covering
                // one compressed span, bounded by the remaining key
                let len = key::SPAN_BYTES.min(key::KEY_BYTES - pos);
                let h = node::header_mut(&mut self.pool, node_off);
                h.prefix.assign(key, pos, len);
                self.pool.persist(node_off, 8);
                continue;
            }
            let prefix_len = hdr.prefix.len as usize;
            let matched = hdr.prefix.compute_prefix(key, pos);

            if pos + matched == key::KEY_BYTES {
                // the key ends inside this node's prefix
                self.store_tree_value(node_off, prefix_len - matched, key, value);
                return Ok(subtree);
            }
            if matched < prefix_len {
                let replacement = self.split_node(node_off, link, key, value, pos, matched)?;
                if node_off == subtree {
                    subtree = replacement;
                }
                return Ok(subtree);
            }

            pos += prefix_len;
            let subkey = key::subkey_at(key, pos);
            let final_level = pos + key::SPAN_BYTES >= key::KEY_BYTES;
            let Some(slot) = node::probe(&self.pool, node_off, subkey) else {
                let payload = if final_level {
                    value
                } else {
                    self.new_record(key, value)?
                };
                let after = node::hash_insert(
                    &mut self.pool,
                    node_off,
                    link,
                    subkey,
                    bucket::terminal_tag(subkey),
                    payload,
                )?;
                if node_off == subtree {
                    subtree = after;
                }
                return Ok(subtree);
            };
            match bucket::decode(slot.tag, slot.value, final_level) {
                SlotPayload::Value(_) => {
                    let off =
                        segment::slot_offset(slot.segment, slot.bucket as usize, slot.slot as usize)
                            + 8;
                    self.pool.write_u64(off, value);
                    self.pool.persist(off, 8);
                    return Ok(subtree);
                }
                SlotPayload::Record(record) => {
                    let existing = self.read_record(record);
                    if existing.key == key {
                        self.pool.write_u64(record + 8, value);
                        self.pool.persist(record + 8, 8);
                        return Ok(subtree);
                    }
                    // two keys share this subkey: move both into a child
                    let child_pos = pos + key::SPAN_BYTES;
                    let mut child =
                        node::allocate(&mut self.pool, hdr.prefix.depth + 1, 0)?;
                    child = self.insert_at(
                        child,
                        SlotHandle::Detached,
                        existing.key,
                        existing.value,
                        child_pos,
                    )?;
                    child =
                        self.insert_at(child, SlotHandle::Detached, key, value, child_pos)?;
                    node::persist_block(&mut self.pool, child);
                    // republish the slot as a child reference
                    let slot_off = segment::slot_offset(
                        slot.segment,
                        slot.bucket as usize,
                        slot.slot as usize,
                    );
                    self.pool.write_u64(slot_off + 8, child);
                    self.pool.store_fence();
                    self.pool.write_u64(slot_off, bucket::child_tag(subkey));
                    self.pool.persist(slot_off, 16);
                    return Ok(subtree);
                }
                SlotPayload::Child(child) => {
                    link = SlotHandle::Slot {
                        segment: slot.segment,
                        bucket: slot.bucket,
                        slot: slot.slot,
                    };
                    node_off = child;
                    pos += key::SPAN_BYTES;
                }
            }
        }
    }

    /// Splits a node whose prefix diverges from the key at `matched` of
    /// `prefix_len` bytes. Every new block is flushed before the single
    /// predecessor retarget that publishes it; the superseded node is never
    /// mutated, so a truncated flush sequence leaves the old subtree fully
    /// valid.
    fn split_node(
        &mut self,
        node_off: u64,
        link: SlotHandle,
        key: u64,
        value: u64,
        pos: usize,
        matched: usize,
    ) -> Result<u64> {
        let prefix_len = node::header(&self.pool, node_off).prefix.len as usize;
        if prefix_len >= key::SPAN_BYTES {
            self.relink_split(node_off, link, key, value, pos, matched)
        } else {
            self.rebuild_split(node_off, link, key, value, pos, matched)
        }
    }

    /// Split shape for nodes carrying at least one full span of prefix:
    /// a new branch node keeps the shared bytes, the old node is re-seated
    /// one hash level deeper under a subkey cut from its former prefix.
    ///
    /// The branch point is clamped so the relink subkey is four real prefix
    /// bytes; branching earlier than the first mismatch only costs
    /// compression, never correctness.
    fn relink_split(
        &mut self,
        node_off: u64,
        link: SlotHandle,
        key: u64,
        value: u64,
        pos: usize,
        matched: usize,
    ) -> Result<u64> {
        let hdr = *node::header(&self.pool, node_off);
        let prefix_len = hdr.prefix.len as usize;
        let cut = matched.min(prefix_len - key::SPAN_BYTES);

        let parent = node::allocate(&mut self.pool, hdr.prefix.depth, 0)?;
        node::header_mut(&mut self.pool, parent).prefix =
            hdr.prefix.derived(cut, hdr.prefix.depth);

        let reseated =
            node::clone_shifted(&mut self.pool, node_off, cut + key::SPAN_BYTES, hdr.prefix.depth + 1)?;
        let link_subkey = key::subkey_from_bytes(&hdr.prefix.bytes[cut..prefix_len]);
        let new_subkey = key::subkey_at(key, pos + cut);
        debug_assert_ne!(link_subkey, new_subkey);

        let parent_final = pos + cut + key::SPAN_BYTES >= key::KEY_BYTES;
        let payload = if parent_final {
            value
        } else {
            self.new_record(key, value)?
        };
        let mut parent = node::hash_insert(
            &mut self.pool,
            parent,
            SlotHandle::Detached,
            new_subkey,
            bucket::terminal_tag(new_subkey),
            payload,
        )?;
        parent = node::hash_insert(
            &mut self.pool,
            parent,
            SlotHandle::Detached,
            link_subkey,
            bucket::child_tag(link_subkey),
            reseated,
        )?;
        node::persist_block(&mut self.pool, parent);
        link.retarget(&mut self.pool, parent);
        Ok(parent)
    }

    /// Split shape for short-prefix nodes, whose hash level reaches the end
    /// of the key: every live entry is a raw value with a reconstructible
    /// key, so the node's content is re-inserted into a fresh branch node
    /// and the old block abandoned.
    fn rebuild_split(
        &mut self,
        node_off: u64,
        link: SlotHandle,
        key_in: u64,
        value_in: u64,
        pos: usize,
        matched: usize,
    ) -> Result<u64> {
        let hdr = *node::header(&self.pool, node_off);
        let prefix_len = hdr.prefix.len as usize;
        debug_assert!(prefix_len < key::SPAN_BYTES);
        debug_assert!(pos + matched + key::SPAN_BYTES >= key::KEY_BYTES);
        let cut = matched;

        let mut parent = node::allocate(&mut self.pool, hdr.prefix.depth, 0)?;
        node::header_mut(&mut self.pool, parent).prefix =
            hdr.prefix.derived(cut, hdr.prefix.depth);

        // carry over keys that ended inside the old prefix
        for index in 0..TREE_VALUE_SLOTS {
            if index > prefix_len {
                continue;
            }
            let entry = self.tree_value(node_off, index);
            if entry.is_empty() {
                continue;
            }
            let entry_matched = prefix_len - index;
            if entry_matched <= cut {
                self.store_tree_value(parent, cut - entry_matched, entry.key, entry.value);
            } else {
                parent =
                    self.insert_at(parent, SlotHandle::Detached, entry.key, entry.value, pos)?;
            }
        }

        // carry over the hash level, if it lies within the key
        let hash_pos = pos + prefix_len;
        if hash_pos < key::KEY_BYTES {
            // bytes [0, pos) are shared by every key in this node
            let high = if pos == 0 {
                0
            } else {
                key_in >> ((key::KEY_BYTES - pos) * 8)
            };
            let acc = key::extend(high, &hdr.prefix.bytes[..prefix_len]);
            let mut entries = Vec::new();
            node::for_each_live_slot(&self.pool, node_off, |tag, value| {
                entries.push((tag, value));
            });
            for (tag, value) in entries {
                debug_assert!(bucket::tag_is_terminal(tag));
                let entry_key = key::compose(acc, hash_pos, bucket::tag_subkey(tag));
                parent = self.insert_at(parent, SlotHandle::Detached, entry_key, value, pos)?;
            }
        }

        parent = self.insert_at(parent, SlotHandle::Detached, key_in, value_in, pos)?;
        node::persist_block(&mut self.pool, parent);
        link.retarget(&mut self.pool, parent);
        Ok(parent)
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Point lookup. Returns None when the key was never inserted.
    pub fn search(&self, key: u64) -> Option<u64> {
        let mut node_off = self.root();
        let mut pos = 0usize;
        loop {
            let hdr = node::header(&self.pool, node_off);
            if hdr.prefix.is_unset() {
                return None;
            }
            let prefix_len = hdr.prefix.len as usize;
            let remaining = key::KEY_BYTES - pos;
            if remaining <= prefix_len {
                // the key can only end inside this node's prefix
                let entry = self.tree_value(node_off, prefix_len - remaining);
                if !entry.is_empty() && entry.key == key {
                    return Some(entry.value);
                }
                return None;
            }
            if hdr.prefix.compute_prefix(key, pos) < prefix_len {
                return None;
            }
            pos += prefix_len;
            let subkey = key::subkey_at(key, pos);
            let slot = node::probe(&self.pool, node_off, subkey)?;
            pos += key::SPAN_BYTES;
            match bucket::decode(slot.tag, slot.value, pos >= key::KEY_BYTES) {
                SlotPayload::Value(value) => return Some(value),
                SlotPayload::Record(record) => {
                    let entry = self.read_record(record);
                    return (entry.key == key).then_some(entry.value);
                }
                SlotPayload::Child(child) => node_off = child,
            }
        }
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    /// Bytes of pool memory reachable from the index: anchor, nodes,
    /// value arrays, segments, and records. Diagnostics only; abandoned
    /// blocks from past splits are not counted.
    pub fn memory_footprint(&self) -> u64 {
        ANCHOR_BYTES as u64 + node::footprint(&self.pool, self.root(), 0)
    }

    // =========================================================================
    // Pool record helpers
    // =========================================================================

    /// Allocates and flushes a key-value record.
    pub(crate) fn new_record(&mut self, key: u64, value: u64) -> Result<u64> {
        let record = self.pool.allocate(RECORD_BYTES)?;
        self.pool.write_u64(record + 8, value);
        self.pool.write_u64(record, key);
        self.pool.persist(record, RECORD_BYTES);
        Ok(record)
    }

    #[inline]
    pub(crate) fn read_record(&self, record: u64) -> KeyValue {
        KeyValue {
            key: self.pool.read_u64(record),
            value: self.pool.read_u64(record + 8),
        }
    }

    /// Reads slot `index` of a node's in-prefix value array.
    pub(crate) fn tree_value(&self, node_off: u64, index: usize) -> KeyValue {
        debug_assert!(index < TREE_VALUE_SLOTS);
        let base = node::header(&self.pool, node_off).tree_values;
        self.read_record(base + (index * RECORD_BYTES) as u64)
    }

    /// Writes slot `index` of a node's in-prefix value array: value first,
    /// fence, then the key that marks the slot occupied.
    fn store_tree_value(&mut self, node_off: u64, index: usize, key: u64, value: u64) {
        debug_assert!(index < TREE_VALUE_SLOTS);
        let base = node::header(&self.pool, node_off).tree_values;
        let off = base + (index * RECORD_BYTES) as u64;
        let existing = self.read_record(off);
        if !existing.is_empty() && existing.key == key {
            self.pool.write_u64(off + 8, value);
            self.pool.persist(off + 8, 8);
        } else {
            debug_assert!(existing.is_empty(), "in-prefix slot holds a different key");
            self.pool.write_u64(off + 8, value);
            self.pool.store_fence();
            self.pool.write_u64(off, key);
            self.pool.persist(off, RECORD_BYTES);
        }
    }
}
