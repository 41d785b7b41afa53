//! Chunk manager.
//!
//! A chunk is one block from the memory interface holding `chunk_size` slots
//! laid out back to back. Each slot starts with a [`SlotHeader`] (permanent
//! index and used flag) followed by the caller's payload:
//!
//! ```text
//! block ─┬─ slot 0 ─┬─ header { idx, used }
//!        │          └─ payload [entry_size bytes, 8-aligned]
//!        ├─ slot 1 ...
//!        └─ slot chunk_size - 1
//! ```
//!
//! Chunks are appended to a [`ChunkList`] in creation order and stay there
//! until the owning array is torn down, so chunk *k* always covers indices
//! `[k * chunk_size, (k + 1) * chunk_size)`.

use crate::error::{Error, Result};
use crate::list::{List, LockedList, NodeId};
use crate::memory::{BLOCK_ALIGNMENT, MemoryOps};
use mlib_log::{debug, error};
use std::mem;
use std::ptr::NonNull;

/// Per-slot bookkeeping stored in front of each payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotHeader {
    pub(crate) idx: usize,
    pub(crate) used: bool,
}

#[inline]
const fn align_up(n: usize) -> Option<usize> {
    match n.checked_add(BLOCK_ALIGNMENT - 1) {
        Some(n) => Some(n & !(BLOCK_ALIGNMENT - 1)),
        None => None,
    }
}

/// Byte layout of one slot for a given entry size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    entry_size: usize,
    payload_offset: usize,
    stride: usize,
}

impl SlotLayout {
    /// Computes the layout for `entry_size`-byte payloads.
    ///
    /// Returns `None` if the slot size overflows `usize`.
    pub const fn new(entry_size: usize) -> Option<Self> {
        let Some(payload_offset) = align_up(mem::size_of::<SlotHeader>()) else {
            return None;
        };
        let Some(end) = payload_offset.checked_add(entry_size) else {
            return None;
        };
        let Some(stride) = align_up(end) else {
            return None;
        };
        Some(SlotLayout {
            entry_size,
            payload_offset,
            stride,
        })
    }

    /// Payload bytes per slot.
    pub const fn entry_size(&self) -> usize {
        self.entry_size
    }

    /// Distance between consecutive slots, header included.
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Offset of the payload from the start of its slot.
    pub const fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    /// Bytes needed for a chunk of `chunk_size` slots.
    pub const fn block_size(&self, chunk_size: usize) -> Option<usize> {
        self.stride.checked_mul(chunk_size)
    }
}

/// One block of slots.
///
/// A `Chunk` is a plain descriptor (pointer, first index, slot count); the
/// block it points at is owned by the array whose chunk list holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    block: NonNull<u8>,
    first_idx: usize,
    slots: usize,
    layout: SlotLayout,
}

// SAFETY: a chunk is only a descriptor. Access to the block is serialized by
// whoever owns the chunk list.
unsafe impl Send for Chunk {}

impl Chunk {
    /// Index of the first slot.
    pub fn first_idx(&self) -> usize {
        self.first_idx
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots
    }

    /// Chunks always hold at least one slot.
    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    /// One past the last slot index.
    pub fn end_idx(&self) -> usize {
        self.first_idx + self.slots
    }

    /// Whether `idx` falls in this chunk's range.
    pub fn contains(&self, idx: usize) -> bool {
        (self.first_idx..self.end_idx()).contains(&idx)
    }

    /// Size of the underlying block in bytes.
    pub fn block_size(&self) -> usize {
        // Cannot overflow: the block was allocated with this size.
        self.layout.stride * self.slots
    }

    fn slot(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset < self.slots, "slot offset {offset} out of range");
        // SAFETY: offset < slots, so the slot lies inside the block.
        unsafe { self.block.add(offset * self.layout.stride) }
    }

    fn header(&self, offset: usize) -> NonNull<SlotHeader> {
        self.slot(offset).cast()
    }

    /// Reads the header of slot `offset`.
    pub(crate) fn read_header(&self, offset: usize) -> SlotHeader {
        // SAFETY: headers are written for every slot in add_chunk and the
        // block lives as long as the chunk is in its list.
        unsafe { self.header(offset).read() }
    }

    /// Payload address of slot `offset`.
    pub(crate) fn entry(&self, offset: usize) -> NonNull<u8> {
        // SAFETY: payload_offset + entry_size <= stride.
        unsafe { self.slot(offset).add(self.layout.payload_offset) }
    }

    /// Permanent index recorded in slot `offset`.
    pub(crate) fn slot_idx(&self, offset: usize) -> usize {
        self.read_header(offset).idx
    }

    pub(crate) fn is_used(&self, offset: usize) -> bool {
        self.read_header(offset).used
    }

    pub(crate) fn set_used(&self, offset: usize, used: bool) {
        // SAFETY: see read_header; `used` is written through its own field so
        // the index is never touched after creation.
        unsafe {
            let header = self.header(offset).as_ptr();
            (&raw mut (*header).used).write(used);
        }
    }

    /// Offset of the first free slot, scanning in offset order.
    pub(crate) fn first_free(&self) -> Option<usize> {
        (0..self.slots).find(|&offset| !self.is_used(offset))
    }

    /// Index range recorded in the slot headers: first slot's index up to
    /// one past the last slot's index.
    pub(crate) fn recorded_range(&self) -> (usize, usize) {
        let first = self.slot_idx(0);
        (first, self.slot_idx(self.slots - 1) + 1)
    }
}

/// Storage for an array's chunks.
///
/// Implemented by [`List<Chunk>`] (caller-serialized) and
/// [`LockedList<Chunk>`] (each call under the list's spin lock). Arrays only
/// walk chunks through [`next_chunk`](Self::next_chunk), one call per chunk.
pub trait ChunkList: Default {
    /// Cursor step: the first chunk for `None`, else the chunk after `cursor`.
    fn next_chunk(&self, cursor: Option<NodeId>) -> Option<(NodeId, Chunk)>;

    /// The most recently appended chunk.
    fn last_chunk(&self) -> Option<Chunk>;

    /// Appends a chunk at the tail.
    fn append(&mut self, chunk: Chunk) -> Result<NodeId>;

    /// Detaches the most recently appended chunk.
    fn pop_last(&mut self) -> Option<Chunk>;

    /// Number of chunks.
    fn chunk_count(&self) -> usize;
}

impl ChunkList for List<Chunk> {
    fn next_chunk(&self, cursor: Option<NodeId>) -> Option<(NodeId, Chunk)> {
        let node = self.next_node(cursor)?;
        self.get(node).map(|chunk| (node, *chunk))
    }

    fn last_chunk(&self) -> Option<Chunk> {
        self.prev_node(None).and_then(|node| self.get(node).copied())
    }

    fn append(&mut self, chunk: Chunk) -> Result<NodeId> {
        self.insert_tail(chunk)
    }

    fn pop_last(&mut self) -> Option<Chunk> {
        self.remove_tail()
    }

    fn chunk_count(&self) -> usize {
        self.len()
    }
}

impl ChunkList for LockedList<Chunk> {
    fn next_chunk(&self, cursor: Option<NodeId>) -> Option<(NodeId, Chunk)> {
        self.locked().next_chunk(cursor)
    }

    fn last_chunk(&self) -> Option<Chunk> {
        self.locked().last_chunk()
    }

    fn append(&mut self, chunk: Chunk) -> Result<NodeId> {
        self.insert_tail(chunk)
    }

    fn pop_last(&mut self) -> Option<Chunk> {
        self.remove_tail()
    }

    fn chunk_count(&self) -> usize {
        self.len()
    }
}

/// Allocates a zeroed chunk, numbers its slots after the last existing chunk
/// and appends it to `chunks`.
pub(crate) fn add_chunk<M, L>(
    chunks: &mut L,
    memory: &M,
    layout: SlotLayout,
    chunk_size: usize,
) -> Result<Chunk>
where
    M: MemoryOps,
    L: ChunkList,
{
    let first_idx = chunks
        .last_chunk()
        .map_or(0, |last| last.recorded_range().1);

    let size = layout
        .block_size(chunk_size)
        .ok_or(Error::OutOfMemory { size: usize::MAX })?;

    let Some(block) = memory.allocate(size) else {
        error!("chunk allocation of {} bytes failed", size);
        return Err(Error::OutOfMemory { size });
    };

    // SAFETY: block is a fresh allocation of `size` bytes.
    unsafe { memory.fill(block, 0, size) };

    let chunk = Chunk {
        block,
        first_idx,
        slots: chunk_size,
        layout,
    };
    for offset in 0..chunk_size {
        // SAFETY: the slot lies in the block and is aligned to
        // BLOCK_ALIGNMENT, which satisfies SlotHeader.
        unsafe {
            chunk.header(offset).write(SlotHeader {
                idx: first_idx + offset,
                used: false,
            });
        }
    }

    if let Err(err) = chunks.append(chunk) {
        // SAFETY: the block never escaped this function.
        unsafe { memory.deallocate(block, size) };
        return Err(err);
    }

    debug!(
        "chunk {} added: indices {}..{} ({} bytes)",
        chunks.chunk_count() - 1,
        first_idx,
        chunk.end_idx(),
        size
    );
    Ok(chunk)
}

/// Returns every chunk block to `memory`. Returns the number released.
pub(crate) fn release_chunks<M, L>(chunks: &mut L, memory: &M) -> usize
where
    M: MemoryOps,
    L: ChunkList,
{
    let mut released = 0;
    while let Some(chunk) = chunks.pop_last() {
        // SAFETY: every chunk in the list owns a block allocated by `memory`
        // with exactly block_size() bytes, and it has just left the list.
        unsafe { memory.deallocate(chunk.block, chunk.block_size()) };
        released += 1;
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SystemMemory;

    #[test]
    fn test_slot_layout_alignment() {
        let header = mem::size_of::<SlotHeader>();
        for entry_size in [1, 4, 7, 8, 9, 64, 100] {
            let layout = SlotLayout::new(entry_size).unwrap();
            assert_eq!(layout.stride() % BLOCK_ALIGNMENT, 0);
            assert_eq!(layout.payload_offset() % BLOCK_ALIGNMENT, 0);
            assert!(layout.payload_offset() >= header);
            assert!(layout.payload_offset() + entry_size <= layout.stride());
        }
    }

    #[test]
    fn test_slot_layout_overflow() {
        assert!(SlotLayout::new(usize::MAX).is_none());
        let layout = SlotLayout::new(64).unwrap();
        assert_eq!(layout.block_size(usize::MAX), None);
    }

    #[test]
    fn test_add_chunk_numbers_slots_consecutively() {
        let layout = SlotLayout::new(4).unwrap();
        let mut chunks: List<Chunk> = List::new();

        let first = add_chunk(&mut chunks, &SystemMemory, layout, 3).unwrap();
        let second = add_chunk(&mut chunks, &SystemMemory, layout, 3).unwrap();

        assert_eq!(first.first_idx(), 0);
        assert_eq!(first.end_idx(), 3);
        assert_eq!(second.first_idx(), 3);
        assert_eq!(second.recorded_range(), (3, 6));
        assert!(second.contains(5));
        assert!(!second.contains(6));

        for offset in 0..3 {
            assert_eq!(second.slot_idx(offset), 3 + offset);
            assert!(!second.is_used(offset));
        }
        assert_eq!(chunks.chunk_count(), 2);
        assert_eq!(release_chunks(&mut chunks, &SystemMemory), 2);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_used_flag_and_first_free() {
        let layout = SlotLayout::new(16).unwrap();
        let mut chunks: List<Chunk> = List::new();
        let chunk = add_chunk(&mut chunks, &SystemMemory, layout, 4).unwrap();

        assert_eq!(chunk.first_free(), Some(0));
        chunk.set_used(0, true);
        chunk.set_used(1, true);
        assert_eq!(chunk.first_free(), Some(2));
        chunk.set_used(0, false);
        assert_eq!(chunk.first_free(), Some(0));
        assert_eq!(chunk.slot_idx(1), 1);

        for offset in 0..4 {
            chunk.set_used(offset, true);
        }
        assert_eq!(chunk.first_free(), None);

        release_chunks(&mut chunks, &SystemMemory);
    }

    #[test]
    fn test_payload_is_zeroed_and_aligned() {
        let layout = SlotLayout::new(12).unwrap();
        let mut chunks: List<Chunk> = List::new();
        let chunk = add_chunk(&mut chunks, &SystemMemory, layout, 2).unwrap();

        for offset in 0..2 {
            let entry = chunk.entry(offset);
            assert_eq!(entry.as_ptr().addr() % BLOCK_ALIGNMENT, 0);
            let bytes = unsafe { std::slice::from_raw_parts(entry.as_ptr(), 12) };
            assert!(bytes.iter().all(|&b| b == 0));
        }

        release_chunks(&mut chunks, &SystemMemory);
    }

    #[test]
    fn test_locked_chunk_list_walk() {
        let layout = SlotLayout::new(8).unwrap();
        let mut chunks: LockedList<Chunk> = LockedList::new();
        for _ in 0..3 {
            add_chunk(&mut chunks, &SystemMemory, layout, 2).unwrap();
        }

        let mut starts = Vec::new();
        let mut cursor = None;
        while let Some((node, chunk)) = chunks.next_chunk(cursor) {
            starts.push(chunk.first_idx());
            cursor = Some(node);
        }
        assert_eq!(starts, vec![0, 2, 4]);
        assert_eq!(chunks.last_chunk().map(|c| c.first_idx()), Some(4));

        assert_eq!(release_chunks(&mut chunks, &SystemMemory), 3);
        assert_eq!(chunks.chunk_count(), 0);
    }
}
