//! Slab allocator with stable indices.
//!
//! A [`DynamicArray`] hands out fixed-size slots identified by a permanent
//! index. Storage grows one chunk at a time and is never moved or shrunk, so a
//! slot's index and payload address stay valid until the array is torn down.
//!
//! # Example
//!
//! ```
//! use mlib_mem::{DynamicArray, Error};
//!
//! let mut array = DynamicArray::new(2, 4, 5).unwrap();
//!
//! let (a, _) = array.alloc().unwrap();
//! let (b, _) = array.alloc().unwrap();
//! assert_eq!((a, b), (0, 1));
//!
//! array.write(b, &[1, 2, 3, 4]).unwrap();
//! assert_eq!(array.get_slice(b).unwrap(), &[1, 2, 3, 4]);
//!
//! array.free(a).unwrap();
//! assert_eq!(array.alloc().unwrap().0, 0);
//!
//! array.alloc_at(4).unwrap();
//! assert!(matches!(array.alloc_at(4), Err(Error::AlreadyAllocated { idx: 4, .. })));
//!
//! array.exit();
//! ```
//!
//! # Operating modes
//!
//! The chunk list type parameter picks the mode:
//!
//! - [`DynamicArray`] keeps chunks in a plain [`List`]; the caller serializes
//!   every operation.
//! - [`LockedDynamicArray`] keeps them in a [`LockedList`], taking the list's
//!   spin lock for each chunk-level call. Scans make one call per chunk and do
//!   not hold the lock across the whole walk.

use crate::chunk::{self, Chunk, ChunkList, SlotLayout};
use crate::config::ArrayConfig;
use crate::error::{Error, Result};
use crate::list::{List, LockedList};
use crate::memory::{MemoryOps, SystemMemory};
use mlib_log::{debug, trace, warn};
use std::fmt;
use std::ptr::NonNull;
use std::slice;

/// Snapshot of a [`DynamicArray`]'s occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayStats {
    /// Entries currently allocated.
    pub entry_num: usize,
    /// Ceiling on allocated entries.
    pub entry_max_num: usize,
    /// Chunks created so far.
    pub chunk_count: usize,
    /// Slots across all chunks, free or used.
    pub capacity: usize,
    /// Bytes held from the memory interface.
    pub reserved_bytes: usize,
}

/// Chunked slab allocator.
///
/// See the [module documentation](self) for an overview.
pub struct DynamicArray<M: MemoryOps = SystemMemory, L: ChunkList = List<Chunk>> {
    chunks: L,
    memory: M,
    layout: SlotLayout,
    chunk_size: usize,
    entry_max_num: usize,
    entry_num: usize,
}

/// [`DynamicArray`] whose chunk list is guarded by a spin lock.
pub type LockedDynamicArray<M = SystemMemory> = DynamicArray<M, LockedList<Chunk>>;

impl DynamicArray {
    /// Creates an empty array backed by the global allocator.
    ///
    /// Fails with [`Error::InvalidArgument`] if any parameter is zero.
    pub fn new(chunk_size: usize, entry_size: usize, entry_max_num: usize) -> Result<Self> {
        Self::with_config(ArrayConfig::new(chunk_size, entry_size, entry_max_num))
    }

    /// Creates an empty array from `config`.
    pub fn with_config(config: ArrayConfig) -> Result<Self> {
        Self::with_config_in(config, SystemMemory)
    }
}

impl<M: MemoryOps> DynamicArray<M, List<Chunk>> {
    /// Creates an empty array that takes chunk blocks from `memory`.
    pub fn with_memory(
        chunk_size: usize,
        entry_size: usize,
        entry_max_num: usize,
        memory: M,
    ) -> Result<Self> {
        Self::with_config_in(
            ArrayConfig::new(chunk_size, entry_size, entry_max_num),
            memory,
        )
    }
}

impl LockedDynamicArray {
    /// Lock-guarded counterpart of [`DynamicArray::new`].
    pub fn new_locked(chunk_size: usize, entry_size: usize, entry_max_num: usize) -> Result<Self> {
        Self::with_config_in(
            ArrayConfig::new(chunk_size, entry_size, entry_max_num),
            SystemMemory,
        )
    }
}

impl<M: MemoryOps> DynamicArray<M, LockedList<Chunk>> {
    /// Lock-guarded counterpart of [`DynamicArray::with_memory`].
    pub fn with_memory_locked(
        chunk_size: usize,
        entry_size: usize,
        entry_max_num: usize,
        memory: M,
    ) -> Result<Self> {
        Self::with_config_in(
            ArrayConfig::new(chunk_size, entry_size, entry_max_num),
            memory,
        )
    }
}

impl<M: MemoryOps, L: ChunkList> DynamicArray<M, L> {
    /// Creates an empty array of any mode from `config` and `memory`.
    pub fn with_config_in(config: ArrayConfig, memory: M) -> Result<Self> {
        let layout = config.validate()?;
        debug!(
            "dynamic array created: chunk_size={} entry_size={} entry_max_num={} stride={}",
            config.chunk_size,
            config.entry_size,
            config.entry_max_num,
            layout.stride()
        );
        Ok(DynamicArray {
            chunks: L::default(),
            memory,
            layout,
            chunk_size: config.chunk_size,
            entry_max_num: config.entry_max_num,
            entry_num: 0,
        })
    }

    /// Allocates the lowest-numbered free slot, creating a chunk if every
    /// existing slot is in use.
    ///
    /// Returns the slot's index and payload address. Fails with
    /// [`Error::LimitExceeded`] once `entry_max_num` entries are allocated and
    /// with [`Error::OutOfMemory`] if a new chunk cannot be obtained.
    pub fn alloc(&mut self) -> Result<(usize, NonNull<u8>)> {
        if self.entry_num >= self.entry_max_num {
            return Err(Error::LimitExceeded {
                limit: self.entry_max_num,
            });
        }

        let (chunk, offset) = match self.find_free() {
            Some(found) => found,
            None => (self.grow()?, 0),
        };
        let idx = chunk.slot_idx(offset);
        Ok((idx, self.claim(chunk, offset)))
    }

    /// Allocates the slot with index `idx`, creating every chunk up to the
    /// one that covers it.
    ///
    /// Fails with [`Error::LimitExceeded`] if `idx >= entry_max_num`, and with
    /// [`Error::AlreadyAllocated`] if the slot is in use; that error carries
    /// the slot's payload address and leaves the slot untouched.
    pub fn alloc_at(&mut self, idx: usize) -> Result<NonNull<u8>> {
        if idx >= self.entry_max_num {
            return Err(Error::LimitExceeded {
                limit: self.entry_max_num,
            });
        }

        while self.capacity() <= idx {
            self.grow()?;
        }
        let (chunk, offset) = self.locate(idx).ok_or(Error::no_entry(idx))?;

        if chunk.is_used(offset) {
            return Err(Error::AlreadyAllocated {
                idx,
                entry: chunk.entry(offset),
            });
        }
        Ok(self.claim(chunk, offset))
    }

    /// Releases slot `idx`.
    ///
    /// Always succeeds. Freeing a slot that is not in use, or an index that
    /// no chunk covers, changes nothing.
    pub fn free(&mut self, idx: usize) -> Result<()> {
        match self.locate(idx) {
            Some((chunk, offset)) if chunk.is_used(offset) => {
                chunk.set_used(offset, false);
                self.entry_num -= 1;
                trace!("free {} ({} in use)", idx, self.entry_num);
            }
            Some(_) => warn!("free {}: entry is not allocated", idx),
            None => warn!("free {}: no chunk covers this index", idx),
        }
        Ok(())
    }

    /// Payload address of allocated slot `idx`.
    pub fn get(&self, idx: usize) -> Result<NonNull<u8>> {
        match self.locate(idx) {
            Some((chunk, offset)) if chunk.is_used(offset) => Ok(chunk.entry(offset)),
            _ => Err(Error::no_entry(idx)),
        }
    }

    /// Payload bytes of allocated slot `idx`.
    pub fn get_slice(&self, idx: usize) -> Result<&[u8]> {
        let entry = self.get(idx)?;
        // SAFETY: the payload is entry_size initialized bytes inside a live
        // chunk, and `&self` keeps it from being freed or released.
        Ok(unsafe { slice::from_raw_parts(entry.as_ptr(), self.entry_size()) })
    }

    /// Mutable payload bytes of allocated slot `idx`.
    pub fn get_slice_mut(&mut self, idx: usize) -> Result<&mut [u8]> {
        let entry = self.get(idx)?;
        // SAFETY: as in get_slice; `&mut self` makes the borrow exclusive.
        Ok(unsafe { slice::from_raw_parts_mut(entry.as_ptr(), self.entry_size()) })
    }

    /// Copies `data` to the start of allocated slot `idx`.
    pub fn write(&mut self, idx: usize, data: &[u8]) -> Result<()> {
        if data.len() > self.entry_size() {
            return Err(Error::invalid("data is longer than entry_size"));
        }
        let entry = self.get(idx)?;
        // SAFETY: the payload holds entry_size >= data.len() bytes and cannot
        // overlap a borrowed slice.
        unsafe {
            self.memory
                .copy(entry, NonNull::from(data).cast(), data.len())
        };
        Ok(())
    }

    /// Copies the first `buf.len()` bytes of allocated slot `idx` into `buf`.
    pub fn read(&self, idx: usize, buf: &mut [u8]) -> Result<()> {
        if buf.len() > self.entry_size() {
            return Err(Error::invalid("buffer is longer than entry_size"));
        }
        let entry = self.get(idx)?;
        let len = buf.len();
        // SAFETY: see write.
        unsafe { self.memory.copy(NonNull::from(buf).cast(), entry, len) };
        Ok(())
    }

    /// First allocated slot, in index order, for which `predicate` returns
    /// `true`.
    ///
    /// Fails with [`Error::NoSuchEntry`] if nothing matches.
    pub fn search<F>(&self, predicate: F) -> Result<(usize, NonNull<u8>)>
    where
        F: FnMut(usize, NonNull<u8>) -> bool,
    {
        self.find_used(predicate)
            .ok_or(Error::NoSuchEntry { idx: None })
    }

    /// Calls `f` for every allocated slot in index order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(usize, NonNull<u8>),
    {
        self.find_used(|idx, entry| {
            f(idx, entry);
            false
        });
    }

    /// Releases every chunk and consumes the array.
    pub fn exit(mut self) {
        let released = self.release();
        debug!("dynamic array exited: {} chunks released", released);
    }

    /// Whether slot `idx` is currently allocated.
    pub fn is_allocated(&self, idx: usize) -> bool {
        self.locate(idx)
            .is_some_and(|(chunk, offset)| chunk.is_used(offset))
    }

    /// Entries currently allocated.
    pub fn len(&self) -> usize {
        self.entry_num
    }

    pub fn is_empty(&self) -> bool {
        self.entry_num == 0
    }

    /// Slots across all created chunks.
    pub fn capacity(&self) -> usize {
        self.chunks.chunk_count().saturating_mul(self.chunk_size)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.chunk_count()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn entry_size(&self) -> usize {
        self.layout.entry_size()
    }

    pub fn entry_max_num(&self) -> usize {
        self.entry_max_num
    }

    /// The memory interface chunks are taken from.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn stats(&self) -> ArrayStats {
        let chunk_count = self.chunk_count();
        ArrayStats {
            entry_num: self.entry_num,
            entry_max_num: self.entry_max_num,
            chunk_count,
            capacity: self.capacity(),
            reserved_bytes: self
                .layout
                .block_size(self.chunk_size)
                .map_or(usize::MAX, |bytes| bytes.saturating_mul(chunk_count)),
        }
    }

    fn grow(&mut self) -> Result<Chunk> {
        chunk::add_chunk(&mut self.chunks, &self.memory, self.layout, self.chunk_size)
    }

    fn claim(&mut self, chunk: Chunk, offset: usize) -> NonNull<u8> {
        chunk.set_used(offset, true);
        self.entry_num += 1;
        trace!(
            "alloc {} ({} in use)",
            chunk.slot_idx(offset),
            self.entry_num
        );
        chunk.entry(offset)
    }

    /// Chunk owning `idx` and the slot's offset in it.
    fn locate(&self, idx: usize) -> Option<(Chunk, usize)> {
        let mut cursor = None;
        while let Some((node, chunk)) = self.chunks.next_chunk(cursor) {
            let (first, end) = chunk.recorded_range();
            if (first..end).contains(&idx) {
                return Some((chunk, idx - first));
            }
            cursor = Some(node);
        }
        None
    }

    fn find_free(&self) -> Option<(Chunk, usize)> {
        let mut cursor = None;
        while let Some((node, chunk)) = self.chunks.next_chunk(cursor) {
            if let Some(offset) = chunk.first_free() {
                return Some((chunk, offset));
            }
            cursor = Some(node);
        }
        None
    }

    fn find_used<F>(&self, mut predicate: F) -> Option<(usize, NonNull<u8>)>
    where
        F: FnMut(usize, NonNull<u8>) -> bool,
    {
        let mut cursor = None;
        while let Some((node, chunk)) = self.chunks.next_chunk(cursor) {
            for offset in 0..chunk.len() {
                if !chunk.is_used(offset) {
                    continue;
                }
                let idx = chunk.slot_idx(offset);
                let entry = chunk.entry(offset);
                if predicate(idx, entry) {
                    return Some((idx, entry));
                }
            }
            cursor = Some(node);
        }
        None
    }

    fn release(&mut self) -> usize {
        self.entry_num = 0;
        chunk::release_chunks(&mut self.chunks, &self.memory)
    }
}

impl<M: MemoryOps, L: ChunkList> Drop for DynamicArray<M, L> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<M: MemoryOps, L: ChunkList> fmt::Debug for DynamicArray<M, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicArray")
            .field("chunk_size", &self.chunk_size)
            .field("entry_size", &self.entry_size())
            .field("entry_max_num", &self.entry_max_num)
            .field("entry_num", &self.entry_num)
            .field("chunk_count", &self.chunk_count())
            .finish_non_exhaustive()
    }
}
