//! Range scan: boundary-aware recursion plus a full-subtree dump.
//!
//! Per node, each bound is compared byte-wise against the compressed
//! prefix: a bound that diverges below (above) the prefix stops
//! constraining the subtree and is dropped, one that excludes the whole
//! prefix range short-circuits the node. A bound consumed down to a single
//! directory slot degenerates into a point probe; otherwise every slot
//! between the two bound indices is walked, stale copies are discarded,
//! and entries are classified as strictly inside (dumped without further
//! checks) or boundary-equal (recursed with the surviving bound).

use crate::bucket::{self, SlotPayload};
use crate::constants::{BUCKET_SLOTS, SEGMENT_BUCKETS, TREE_VALUE_SLOTS};
use crate::node;
use crate::segment;
use crate::tree::{KeyValue, RadixTreeIndex};
use ember_common::key;

impl RadixTreeIndex {
    /// Collects every pair with `left <= key <= right`, in no particular
    /// order.
    pub fn scan(&self, left: u64, right: u64) -> Vec<KeyValue> {
        let mut out = Vec::new();
        if left <= right {
            self.scan_node(self.root(), Some(left), Some(right), 0, 0, &mut out);
        }
        out
    }

    /// Scans the node entered at key byte `pos`. A bound of None no longer
    /// constrains this subtree; `acc` holds the key bytes consumed so far.
    fn scan_node(
        &self,
        node_off: u64,
        mut lo: Option<u64>,
        mut hi: Option<u64>,
        pos: usize,
        acc: u64,
        out: &mut Vec<KeyValue>,
    ) {
        let hdr = *node::header(&self.pool, node_off);
        if hdr.prefix.is_unset() {
            return;
        }
        let prefix_len = hdr.prefix.len as usize;
        let prefix = &hdr.prefix.bytes[..prefix_len];

        if let Some(l) = lo {
            for (i, &p) in prefix.iter().enumerate() {
                let b = key::byte_at(l, pos + i);
                if b > p {
                    // every key here sorts below the lower bound
                    return;
                }
                if b < p {
                    lo = None;
                    break;
                }
            }
        }
        if let Some(r) = hi {
            for (i, &p) in prefix.iter().enumerate() {
                let b = key::byte_at(r, pos + i);
                if b < p {
                    return;
                }
                if b > p {
                    hi = None;
                    break;
                }
            }
        }

        self.collect_tree_values(node_off, lo, hi, out);

        let acc = key::extend(acc, prefix);
        let hash_pos = pos + prefix_len;
        if hash_pos >= key::KEY_BYTES {
            return;
        }
        let lo_sub = lo.map(|l| key::subkey_at(l, hash_pos));
        let hi_sub = hi.map(|r| key::subkey_at(r, hash_pos));
        let after = hash_pos + key::SPAN_BYTES;
        let final_level = after >= key::KEY_BYTES;

        // both bounds collapse to one directory slot: a point probe
        if let (Some(ls), Some(rs)) = (lo_sub, hi_sub) {
            if ls == rs {
                let Some(slot) = node::probe(&self.pool, node_off, ls) else {
                    return;
                };
                match bucket::decode(slot.tag, slot.value, final_level) {
                    SlotPayload::Value(value) => {
                        let k = key::compose(acc, hash_pos, ls);
                        if in_bounds(k, lo, hi) {
                            out.push(KeyValue { key: k, value });
                        }
                    }
                    SlotPayload::Record(record) => {
                        let entry = self.read_record(record);
                        if in_bounds(entry.key, lo, hi) {
                            out.push(entry);
                        }
                    }
                    SlotPayload::Child(child) => {
                        self.scan_node(child, lo, hi, after, (acc << 32) | u64::from(ls), out);
                    }
                }
                return;
            }
        }

        let dir_size = hdr.dir_size as usize;
        let lo_idx = lo_sub.map_or(0, |s| key::dir_index(s, hdr.global_depth));
        let hi_idx = hi_sub.map_or(dir_size - 1, |s| key::dir_index(s, hdr.global_depth));
        let mut last_seg = None;
        for i in lo_idx..=hi_idx {
            let seg = node::dir_entry(&self.pool, node_off, i);
            if last_seg == Some(seg) {
                continue;
            }
            last_seg = Some(seg);
            for b in 0..SEGMENT_BUCKETS {
                for s in 0..BUCKET_SLOTS {
                    let slot = segment::bucket(&self.pool, seg, b).slots[s];
                    if slot.is_empty() {
                        continue;
                    }
                    let subkey = bucket::tag_subkey(slot.tag);
                    if node::dir_entry(&self.pool, node_off, key::dir_index(subkey, hdr.global_depth))
                        != seg
                    {
                        continue; // stale copy from an earlier split
                    }
                    let above_lo = lo_sub.map_or(true, |ls| subkey > ls);
                    let below_hi = hi_sub.map_or(true, |rs| subkey < rs);
                    if above_lo && below_hi {
                        match bucket::decode(slot.tag, slot.value, final_level) {
                            SlotPayload::Value(value) => {
                                let k = key::compose(acc, hash_pos, subkey);
                                out.push(KeyValue { key: k, value });
                            }
                            SlotPayload::Record(record) => out.push(self.read_record(record)),
                            SlotPayload::Child(child) => self.dump_subtree(
                                child,
                                after,
                                (acc << 32) | u64::from(subkey),
                                out,
                            ),
                        }
                    } else if lo_sub == Some(subkey) || hi_sub == Some(subkey) {
                        match bucket::decode(slot.tag, slot.value, final_level) {
                            SlotPayload::Value(value) => {
                                let k = key::compose(acc, hash_pos, subkey);
                                if in_bounds(k, lo, hi) {
                                    out.push(KeyValue { key: k, value });
                                }
                            }
                            SlotPayload::Record(record) => {
                                let entry = self.read_record(record);
                                if in_bounds(entry.key, lo, hi) {
                                    out.push(entry);
                                }
                            }
                            SlotPayload::Child(child) => {
                                // only the touched bound keeps constraining
                                let next_lo = if lo_sub == Some(subkey) { lo } else { None };
                                let next_hi = if hi_sub == Some(subkey) { hi } else { None };
                                self.scan_node(
                                    child,
                                    next_lo,
                                    next_hi,
                                    after,
                                    (acc << 32) | u64::from(subkey),
                                    out,
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    /// Dumps an entire subtree known to lie inside the scan bounds.
    fn dump_subtree(&self, node_off: u64, pos: usize, acc: u64, out: &mut Vec<KeyValue>) {
        let hdr = *node::header(&self.pool, node_off);
        if hdr.prefix.is_unset() {
            return;
        }
        let prefix_len = hdr.prefix.len as usize;
        self.collect_tree_values(node_off, None, None, out);

        let acc = key::extend(acc, &hdr.prefix.bytes[..prefix_len]);
        let hash_pos = pos + prefix_len;
        if hash_pos >= key::KEY_BYTES {
            return;
        }
        let final_level = hash_pos + key::SPAN_BYTES >= key::KEY_BYTES;
        let mut entries = Vec::new();
        node::for_each_live_slot(&self.pool, node_off, |tag, value| entries.push((tag, value)));
        for (tag, value) in entries {
            let subkey = bucket::tag_subkey(tag);
            match bucket::decode(tag, value, final_level) {
                SlotPayload::Value(v) => out.push(KeyValue {
                    key: key::compose(acc, hash_pos, subkey),
                    value: v,
                }),
                SlotPayload::Record(record) => out.push(self.read_record(record)),
                SlotPayload::Child(child) => self.dump_subtree(
                    child,
                    hash_pos + key::SPAN_BYTES,
                    (acc << 32) | u64::from(subkey),
                    out,
                ),
            }
        }
    }

    /// Pushes in-bounds entries of a node's in-prefix value array.
    fn collect_tree_values(
        &self,
        node_off: u64,
        lo: Option<u64>,
        hi: Option<u64>,
        out: &mut Vec<KeyValue>,
    ) {
        for index in 0..TREE_VALUE_SLOTS {
            let entry = self.tree_value(node_off, index);
            if !entry.is_empty() && in_bounds(entry.key, lo, hi) {
                out.push(entry);
            }
        }
    }
}

#[inline]
fn in_bounds(key: u64, lo: Option<u64>, hi: Option<u64>) -> bool {
    lo.map_or(true, |l| key >= l) && hi.map_or(true, |h| key <= h)
}
