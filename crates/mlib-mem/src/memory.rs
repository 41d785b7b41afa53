//! Injectable memory interface.
//!
//! Chunk blocks are never obtained from the global allocator directly. They go
//! through a [`MemoryOps`] implementation owned by the array, which keeps the
//! allocator core testable without a real heap and lets tests account for every
//! block handed out.
//!
//! - [`SystemMemory`]: thin wrapper over `std::alloc` (the default).
//! - [`CountingMemory`]: accounting wrapper that tracks live blocks and can be
//!   given an allocation budget to simulate exhaustion (feature `accounting`).

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

/// Alignment of every block returned by [`SystemMemory`].
///
/// Slot headers and payloads inside a chunk are laid out on this boundary.
pub const BLOCK_ALIGNMENT: usize = 8;

/// Allocate, release, copy and fill raw memory.
///
/// Implementations must return blocks aligned to at least
/// [`BLOCK_ALIGNMENT`] and must accept back exactly the `(ptr, size)` pairs
/// they handed out.
pub trait MemoryOps {
    /// Allocates `size` bytes. Returns `None` on exhaustion or when `size` is 0.
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Releases a block obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `self.allocate(size)` with the same `size`, and
    /// must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize);

    /// Copies `len` bytes from `src` to `dst`.
    ///
    /// # Safety
    ///
    /// Both ranges must be valid for `len` bytes and must not overlap.
    unsafe fn copy(&self, dst: NonNull<u8>, src: NonNull<u8>, len: usize) {
        // SAFETY: forwarded from the caller.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), len) }
    }

    /// Sets `len` bytes at `dst` to `value`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `len` bytes.
    unsafe fn fill(&self, dst: NonNull<u8>, value: u8, len: usize) {
        // SAFETY: forwarded from the caller.
        unsafe { ptr::write_bytes(dst.as_ptr(), value, len) }
    }
}

/// Blocks from the global allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemMemory;

impl SystemMemory {
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size, BLOCK_ALIGNMENT).ok()
    }
}

impl MemoryOps for SystemMemory {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Self::layout(size)?;
        // SAFETY: layout has a non-zero size.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        // The layout was valid when the block was allocated.
        if let Some(layout) = Self::layout(size) {
            // SAFETY: the caller guarantees ptr came from allocate(size).
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}

#[cfg(feature = "accounting")]
pub use accounting::{CountingMemory, MemoryStats};

#[cfg(feature = "accounting")]
mod accounting {
    use super::{MemoryOps, SystemMemory};
    use crate::spin::SpinLock;
    use fxhash::FxBuildHasher;
    use hashbrown::HashMap;
    use std::ptr::NonNull;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const UNLIMITED: usize = usize::MAX;

    /// Snapshot of a [`CountingMemory`]'s counters.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct MemoryStats {
        /// Successful allocations since creation.
        pub allocations: usize,
        /// Deallocations of known blocks since creation.
        pub deallocations: usize,
        /// Allocation requests refused by the budget or the system.
        pub failures: usize,
        /// Blocks allocated and not yet released.
        pub outstanding: usize,
        /// Bytes allocated and not yet released.
        pub outstanding_bytes: usize,
    }

    struct Accounting {
        live: SpinLock<HashMap<usize, usize, FxBuildHasher>>,
        allocations: AtomicUsize,
        deallocations: AtomicUsize,
        failures: AtomicUsize,
        budget: AtomicUsize,
    }

    /// Accounting wrapper over [`SystemMemory`].
    ///
    /// Clones share the same counters, so a test can keep one handle while the
    /// array owns another, then check that every block was returned:
    ///
    /// ```
    /// use mlib_mem::{DynamicArray, memory::CountingMemory};
    ///
    /// let memory = CountingMemory::new();
    /// let mut array = DynamicArray::with_memory(4, 16, 64, memory.clone()).unwrap();
    /// array.alloc().unwrap();
    /// assert_eq!(memory.outstanding(), 1);
    ///
    /// array.exit();
    /// assert_eq!(memory.outstanding(), 0);
    /// ```
    #[derive(Clone)]
    pub struct CountingMemory {
        inner: Arc<Accounting>,
    }

    impl CountingMemory {
        /// Creates an accounting allocator with no budget.
        pub fn new() -> Self {
            CountingMemory {
                inner: Arc::new(Accounting {
                    live: SpinLock::new(HashMap::with_hasher(FxBuildHasher::default())),
                    allocations: AtomicUsize::new(0),
                    deallocations: AtomicUsize::new(0),
                    failures: AtomicUsize::new(0),
                    budget: AtomicUsize::new(UNLIMITED),
                }),
            }
        }

        /// Creates an allocator that grants `budget` more allocations and then
        /// reports exhaustion.
        pub fn with_budget(budget: usize) -> Self {
            let memory = Self::new();
            memory.set_budget(Some(budget));
            memory
        }

        /// Replaces the remaining budget; `None` removes the limit.
        pub fn set_budget(&self, budget: Option<usize>) {
            self.inner
                .budget
                .store(budget.unwrap_or(UNLIMITED), Ordering::SeqCst);
        }

        /// Blocks allocated and not yet released.
        pub fn outstanding(&self) -> usize {
            self.inner.live.lock().len()
        }

        /// Bytes allocated and not yet released.
        pub fn outstanding_bytes(&self) -> usize {
            self.inner.live.lock().values().sum()
        }

        /// Current counters.
        pub fn stats(&self) -> MemoryStats {
            let live = self.inner.live.lock();
            MemoryStats {
                allocations: self.inner.allocations.load(Ordering::Relaxed),
                deallocations: self.inner.deallocations.load(Ordering::Relaxed),
                failures: self.inner.failures.load(Ordering::Relaxed),
                outstanding: live.len(),
                outstanding_bytes: live.values().sum(),
            }
        }

        fn take_budget(&self) -> bool {
            self.inner
                .budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                    UNLIMITED => Some(UNLIMITED),
                    0 => None,
                    n => Some(n - 1),
                })
                .is_ok()
        }
    }

    impl Default for CountingMemory {
        fn default() -> Self {
            Self::new()
        }
    }

    impl std::fmt::Debug for CountingMemory {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CountingMemory")
                .field("stats", &self.stats())
                .finish()
        }
    }

    impl MemoryOps for CountingMemory {
        fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
            let block = if self.take_budget() {
                SystemMemory.allocate(size)
            } else {
                None
            };

            match block {
                Some(ptr) => {
                    self.inner.live.lock().insert(ptr.as_ptr().addr(), size);
                    self.inner.allocations.fetch_add(1, Ordering::Relaxed);
                    Some(ptr)
                }
                None => {
                    self.inner.failures.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
            let known = self.inner.live.lock().remove(&ptr.as_ptr().addr());
            match known {
                Some(recorded) if recorded == size => {
                    self.inner.deallocations.fetch_add(1, Ordering::Relaxed);
                    // SAFETY: the block is one we handed out with this size.
                    unsafe { SystemMemory.deallocate(ptr, size) }
                }
                Some(recorded) => {
                    // Put it back; releasing with the wrong layout is UB.
                    self.inner.live.lock().insert(ptr.as_ptr().addr(), recorded);
                    mlib_log::error!(
                        "deallocate {:p}: size {} does not match allocated size {}",
                        ptr,
                        size,
                        recorded
                    );
                }
                None => {
                    mlib_log::error!("deallocate {:p}: block was not allocated here", ptr);
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_tracks_outstanding_blocks() {
            let memory = CountingMemory::new();
            let a = memory.allocate(32).unwrap();
            let b = memory.allocate(64).unwrap();
            assert_eq!(memory.outstanding(), 2);
            assert_eq!(memory.outstanding_bytes(), 96);

            unsafe { memory.deallocate(a, 32) };
            let stats = memory.stats();
            assert_eq!(stats.allocations, 2);
            assert_eq!(stats.deallocations, 1);
            assert_eq!(stats.outstanding, 1);
            assert_eq!(stats.outstanding_bytes, 64);

            unsafe { memory.deallocate(b, 64) };
            assert_eq!(memory.outstanding(), 0);
        }

        #[test]
        fn test_budget_exhaustion() {
            let memory = CountingMemory::with_budget(1);
            let block = memory.allocate(8).unwrap();
            assert!(memory.allocate(8).is_none());
            assert_eq!(memory.stats().failures, 1);

            memory.set_budget(None);
            let again = memory.allocate(8).unwrap();

            unsafe {
                memory.deallocate(block, 8);
                memory.deallocate(again, 8);
            }
            assert_eq!(memory.outstanding(), 0);
        }

        #[test]
        fn test_clones_share_counters() {
            let memory = CountingMemory::new();
            let clone = memory.clone();
            let block = clone.allocate(16).unwrap();
            assert_eq!(memory.outstanding(), 1);
            unsafe { memory.deallocate(block, 16) };
            assert_eq!(clone.outstanding(), 0);
        }

        #[test]
        fn test_mismatched_size_is_refused() {
            let memory = CountingMemory::new();
            let block = memory.allocate(16).unwrap();
            unsafe { memory.deallocate(block, 8) };
            assert_eq!(memory.outstanding(), 1);
            unsafe { memory.deallocate(block, 16) };
            assert_eq!(memory.outstanding(), 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_allocate_is_aligned() {
        let memory = SystemMemory;
        let block = memory.allocate(24).unwrap();
        assert_eq!(block.as_ptr().addr() % BLOCK_ALIGNMENT, 0);
        unsafe { memory.deallocate(block, 24) };
    }

    #[test]
    fn test_zero_size_is_refused() {
        assert!(SystemMemory.allocate(0).is_none());
    }

    #[test]
    fn test_fill_and_copy() {
        let memory = SystemMemory;
        let src = memory.allocate(8).unwrap();
        let dst = memory.allocate(8).unwrap();

        unsafe {
            memory.fill(src, 0xAB, 8);
            memory.fill(dst, 0, 8);
            memory.copy(dst, src, 4);

            let bytes = std::slice::from_raw_parts(dst.as_ptr(), 8);
            assert_eq!(bytes, &[0xAB, 0xAB, 0xAB, 0xAB, 0, 0, 0, 0]);

            memory.deallocate(src, 8);
            memory.deallocate(dst, 8);
        }
    }
}
