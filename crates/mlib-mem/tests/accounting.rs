//! Chunk accounting and out-of-memory tests.
//!
//! Every array here takes its chunk blocks from a `CountingMemory`, so the
//! tests can check that teardown returns each block exactly once and that
//! allocation failures surface as `OutOfMemory` without corrupting state.

use mlib_mem::{ArrayConfig, CountingMemory, DynamicArray, Error, LockedDynamicArray};

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_exit_releases_every_chunk() {
    let memory = CountingMemory::new();
    let mut array = DynamicArray::with_memory(2, 4, 5, memory.clone()).unwrap();
    assert_eq!(memory.outstanding(), 0);

    for _ in 0..3 {
        array.alloc().unwrap();
    }
    array.free(0).unwrap();
    array.alloc().unwrap();
    array.alloc_at(4).unwrap();
    assert_eq!(memory.outstanding(), 3);
    assert_eq!(
        memory.outstanding_bytes(),
        ArrayConfig::new(2, 4, 5).chunk_bytes().unwrap() * 3
    );

    array.exit();
    let stats = memory.stats();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.outstanding_bytes, 0);
    assert_eq!(stats.allocations, 3);
    assert_eq!(stats.deallocations, 3);
}

#[test]
fn test_drop_releases_every_chunk() {
    let memory = CountingMemory::new();
    {
        let mut array = DynamicArray::with_memory(4, 32, 64, memory.clone()).unwrap();
        for _ in 0..40 {
            array.alloc().unwrap();
        }
        assert_eq!(memory.outstanding(), 10);
    }
    assert_eq!(memory.outstanding(), 0);
}

#[test]
fn test_locked_array_releases_every_chunk() {
    let memory = CountingMemory::new();
    let mut array = LockedDynamicArray::with_memory_locked(3, 8, 30, memory.clone()).unwrap();
    array.alloc_at(29).unwrap();
    assert_eq!(memory.outstanding(), 10);

    array.exit();
    assert_eq!(memory.outstanding(), 0);
}

#[test]
fn test_reserved_bytes_match_memory() {
    let memory = CountingMemory::new();
    let mut array = DynamicArray::with_memory(5, 12, 50, memory.clone()).unwrap();
    array.alloc_at(23).unwrap();

    assert_eq!(array.stats().reserved_bytes, memory.outstanding_bytes());
}

// ============================================================================
// Out of memory
// ============================================================================

#[test]
fn test_alloc_reports_out_of_memory() {
    let memory = CountingMemory::with_budget(1);
    let mut array = DynamicArray::with_memory(2, 8, 10, memory.clone()).unwrap();

    assert_eq!(array.alloc().unwrap().0, 0);
    assert_eq!(array.alloc().unwrap().0, 1);
    assert!(matches!(array.alloc(), Err(Error::OutOfMemory { .. })));
    assert_eq!(array.len(), 2);
    assert_eq!(array.chunk_count(), 1);
    assert_eq!(memory.stats().failures, 1);

    // Freed slots are still usable without new chunks.
    array.free(1).unwrap();
    assert_eq!(array.alloc().unwrap().0, 1);

    memory.set_budget(None);
    assert_eq!(array.alloc().unwrap().0, 2);

    array.exit();
    assert_eq!(memory.outstanding(), 0);
}

#[test]
fn test_alloc_at_keeps_chunks_created_before_failure() {
    let memory = CountingMemory::with_budget(2);
    let mut array = DynamicArray::with_memory(2, 8, 10, memory.clone()).unwrap();

    assert!(matches!(array.alloc_at(7), Err(Error::OutOfMemory { .. })));
    assert_eq!(array.chunk_count(), 2);
    assert!(array.is_empty());

    memory.set_budget(None);
    array.alloc_at(7).unwrap();
    assert_eq!(array.chunk_count(), 4);

    drop(array);
    assert_eq!(memory.outstanding(), 0);
}

#[test]
fn test_first_chunk_failure() {
    let memory = CountingMemory::with_budget(0);
    let mut array = DynamicArray::with_memory(4, 4, 4, memory.clone()).unwrap();

    let size = ArrayConfig::new(4, 4, 4).chunk_bytes().unwrap();
    assert_eq!(array.alloc(), Err(Error::OutOfMemory { size }));
    assert_eq!(array.chunk_count(), 0);
    assert_eq!(memory.outstanding(), 0);
}
