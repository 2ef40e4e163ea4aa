//! Persistent-memory pool allocator.
//!
//! A pool is one byte-addressable region handed out as zero-initialized,
//! 8-byte-aligned blocks by a bump allocator. Blocks are never reclaimed:
//! superseded nodes and segments stay allocated, trading space for fewer
//! durable writes. Structures inside the pool reference each other by pool
//! offset, so a region re-mapped at a different address stays valid.
//!
//! The pool optionally carries a crash-simulation shadow: a second buffer
//! that receives data only on explicit `persist` calls. Truncating the
//! flush sequence and restoring the shadow reproduces an arbitrary power
//! failure for the fault-injection tests.

use crate::persist::{flush_range, line_start, store_fence, CACHE_LINE};
use ember_common::{EmberError, Result};
use memmap2::MmapMut;
use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Anonymous cache-line-aligned memory region.
struct AnonRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AnonRegion {
    fn new(capacity: usize) -> Self {
        // Layout construction only fails on absurd sizes; capacity is
        // validated by the caller.
        let layout = Layout::from_size_align(capacity, CACHE_LINE)
            .expect("pool capacity overflows Layout");
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        Self { ptr, layout }
    }
}

impl Drop for AnonRegion {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Backing storage for a pool region.
enum Backing {
    /// Anonymous memory, volatile. Used for tests and development.
    Anon(AnonRegion),
    /// File-backed mapping, standing in for a DAX persistent-memory map.
    File(MmapMut),
}

impl Backing {
    fn as_ptr(&self) -> *const u8 {
        match self {
            Backing::Anon(region) => region.ptr.as_ptr(),
            Backing::File(map) => map.as_ptr(),
        }
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            Backing::Anon(region) => region.ptr.as_ptr(),
            Backing::File(map) => map.as_mut_ptr(),
        }
    }
}

/// Crash-simulation state: the shadow holds exactly the bytes that have
/// been persisted so far.
struct CrashState {
    shadow: Box<[u8]>,
    /// Remaining `persist` calls that will reach the shadow. None means
    /// unlimited.
    budget: Option<u64>,
}

/// Persistent-memory pool.
///
/// Allocation is thread-safe (atomic bump). Reads and writes of pool
/// content go through raw pointers obtained from `ptr`/`ptr_mut`; mutation
/// requires `&mut self`, so a single writer is enforced by the type system.
pub struct PmemPool {
    backing: Backing,
    capacity: usize,
    /// Bump cursor. Grows upward, never rewinds.
    alloc_offset: AtomicU64,
    /// Total `persist` calls issued, for flush-sequence enumeration.
    flushes: AtomicU64,
    crash: Mutex<Option<CrashState>>,
}

// Raw pointers make the pool !Send/!Sync by default. Content mutation is
// gated on &mut self and allocation is atomic, so the usual borrow rules
// carry the safety argument.
unsafe impl Send for PmemPool {}
unsafe impl Sync for PmemPool {}

impl PmemPool {
    /// Creates an anonymous in-memory pool.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::check_capacity(capacity)?;
        debug!(capacity, "creating anonymous pmem pool");
        Ok(Self::from_backing(
            Backing::Anon(AnonRegion::new(capacity)),
            capacity,
        ))
    }

    /// Creates an anonymous pool with crash simulation enabled.
    ///
    /// Every `persist` call mirrors the flushed lines into a shadow buffer;
    /// `simulate_crash` discards everything that was never persisted.
    pub fn with_crash_simulation(capacity: usize) -> Result<Self> {
        let mut pool = Self::with_capacity(capacity)?;
        *pool.crash.get_mut() = Some(CrashState {
            shadow: vec![0u8; capacity].into_boxed_slice(),
            budget: None,
        });
        Ok(pool)
    }

    /// Creates or overwrites a file-backed pool at `path`.
    ///
    /// The file is sized to `capacity` and mapped writable. A fresh file
    /// reads as zeros, matching the durable zero-initialized contract.
    pub fn create_file<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        Self::check_capacity(capacity)?;
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(capacity as u64)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        debug!(capacity, path = %path.as_ref().display(), "created file-backed pmem pool");
        Ok(Self::from_backing(Backing::File(map), capacity))
    }

    fn from_backing(backing: Backing, capacity: usize) -> Self {
        Self {
            backing,
            capacity,
            alloc_offset: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            crash: Mutex::new(None),
        }
    }

    fn check_capacity(capacity: usize) -> Result<()> {
        if capacity < ember_common::MIN_POOL_CAPACITY {
            return Err(EmberError::PoolTooSmall {
                capacity,
                minimum: ember_common::MIN_POOL_CAPACITY,
            });
        }
        Ok(())
    }

    /// Returns the pool capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of bytes allocated so far.
    pub fn allocated(&self) -> usize {
        (self.alloc_offset.load(Ordering::Relaxed) as usize).min(self.capacity)
    }

    /// Allocates a zero-initialized durable block of `size` bytes and
    /// returns its pool offset. Blocks are 8-byte aligned and never freed.
    ///
    /// Exhaustion is fatal for the caller; there is no retry policy.
    pub fn allocate(&self, size: usize) -> Result<u64> {
        let padded = (size + 7) & !7;
        let offset = self.alloc_offset.fetch_add(padded as u64, Ordering::Relaxed);
        if offset as usize + padded > self.capacity {
            warn!(
                requested = padded,
                allocated = offset,
                capacity = self.capacity,
                "pmem pool exhausted"
            );
            return Err(EmberError::PoolExhausted {
                requested: padded,
                available: self.capacity.saturating_sub(offset as usize),
            });
        }
        Ok(offset)
    }

    /// Read pointer to pool content at `offset`.
    #[inline]
    pub fn ptr(&self, offset: u64) -> *const u8 {
        debug_assert!((offset as usize) < self.capacity);
        unsafe { self.backing.as_ptr().add(offset as usize) }
    }

    /// Write pointer to pool content at `offset`.
    #[inline]
    pub fn ptr_mut(&mut self, offset: u64) -> *mut u8 {
        debug_assert!((offset as usize) < self.capacity);
        unsafe { self.backing.as_mut_ptr().add(offset as usize) }
    }

    /// Reads a native-endian `u64` from pool content at `offset`.
    #[inline]
    pub fn read_u64(&self, offset: u64) -> u64 {
        unsafe { (self.ptr(offset) as *const u64).read_unaligned() }
    }

    /// Writes a native-endian `u64` to pool content at `offset`.
    #[inline]
    pub fn write_u64(&mut self, offset: u64, value: u64) {
        unsafe { (self.ptr_mut(offset) as *mut u64).write_unaligned(value) };
    }

    /// Flushes `[offset, offset + len)` to persistent memory, fenced.
    ///
    /// With crash simulation enabled, the covered cache lines are copied to
    /// the shadow buffer while the flush budget lasts.
    pub fn persist(&self, offset: u64, len: usize) {
        debug_assert!(offset as usize + len <= self.capacity);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        flush_range(self.ptr(offset), len);

        let mut guard = self.crash.lock();
        if let Some(state) = guard.as_mut() {
            match &mut state.budget {
                Some(0) => return,
                Some(n) => *n -= 1,
                None => {}
            }
            let start = line_start(offset as usize);
            let end = (offset as usize + len + CACHE_LINE - 1) & !(CACHE_LINE - 1);
            let end = end.min(self.capacity);
            let src = unsafe {
                std::slice::from_raw_parts(self.backing.as_ptr().add(start), end - start)
            };
            state.shadow[start..end].copy_from_slice(src);
        }
    }

    /// Store fence without a flush. Orders a value write before the tag
    /// write that publishes it within one slot.
    #[inline]
    pub fn store_fence(&self) {
        store_fence();
    }

    /// Total `persist` calls issued on this pool.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Limits crash-simulation mirroring to the next `budget` persist
    /// calls; later flushes are dropped, as if power failed mid-sequence.
    ///
    /// No-op unless the pool was created with `with_crash_simulation`.
    pub fn arm_crash_after(&self, budget: u64) {
        if let Some(state) = self.crash.lock().as_mut() {
            state.budget = Some(budget);
        }
    }

    /// Replaces pool content with the shadow: only persisted bytes
    /// survive, as after a power failure and remap. Disarms the budget.
    ///
    /// No-op unless the pool was created with `with_crash_simulation`.
    pub fn simulate_crash(&mut self) {
        let mut guard = self.crash.lock();
        if let Some(state) = guard.as_mut() {
            state.budget = None;
            let dst =
                unsafe { std::slice::from_raw_parts_mut(self.backing.as_mut_ptr(), self.capacity) };
            dst.copy_from_slice(&state.shadow);
        }
    }
}
