//! Persistent-memory extendible radix tree index.
//!
//! Maps fixed-width 64-bit keys to 64-bit values on byte-addressable
//! non-volatile memory. Updates survive power loss through cache-line flush
//! ordering alone; there is no write-ahead log.
//!
//! ## Structure
//!
//! Each trie level combines path compression with an extendible hash table:
//!
//! ```text
//! key:  [ prefix 0-6 bytes | 32-bit subkey | ... next level ... ]
//!
//! Node ──► Header (compressed prefix, depth)
//!      ──► directory[2^global_depth] ──► Segment (local depth)
//!      │                                   └── 256 buckets x 4 slots
//!      └─► tree_values[7]  (keys ending inside the prefix)
//!
//! slot payload: raw value | key-value record | child node
//! ```
//!
//! A bucket overflow splits its segment (local depth + 1, upper half of the
//! aliasing directory range retargeted); when local depth reaches global
//! depth the directory doubles into a replacement node. A prefix mismatch
//! splits the node itself: a new branch node keeps the shared bytes and the
//! old content is either re-seated one level deeper or rebuilt. Superseded
//! blocks are abandoned, never reclaimed.
//!
//! ## Durability
//!
//! Every mutation flushes content before the pointer or tag write that
//! publishes it, and publishes a restructured subtree with a single final
//! pointer flush. A crash between any two flushes leaves the index reading
//! as if the mutation either fully happened or never started.

mod bucket;
mod constants;
mod header;
mod node;
mod scan;
mod segment;
mod tree;

pub use tree::{KeyValue, RadixTreeIndex};
