//! Cache-line flush and fence primitives.
//!
//! On x86-64 these lower to `clflush`/`sfence`; elsewhere they degrade to
//! compiler-visible fences, which is sufficient for the tests and for
//! volatile development machines.

/// Cache line size assumed for flush granularity.
pub const CACHE_LINE: usize = 64;

/// Rounds an address or offset down to its cache line.
#[inline]
pub fn line_start(addr: usize) -> usize {
    addr & !(CACHE_LINE - 1)
}

/// Issues a store fence. Stores before the fence become persistent-memory
/// ordered before stores after it.
#[inline]
pub fn store_fence() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_sfence();
    }
    #[cfg(not(target_arch = "x86_64"))]
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

/// Flushes every cache line covering `[ptr, ptr + len)`, fenced on both
/// sides. Mirrors the fully-fenced flush discipline of persistent-memory
/// runtimes: when this returns, the range is durable.
#[inline]
pub fn flush_range(ptr: *const u8, len: usize) {
    if len == 0 {
        return;
    }
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_sfence();
        let start = line_start(ptr as usize);
        let end = ptr as usize + len;
        let mut line = start;
        while line < end {
            core::arch::x86_64::_mm_clflush(line as *const u8);
            line += CACHE_LINE;
        }
        core::arch::x86_64::_mm_sfence();
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = ptr;
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}
