//! MLib memory primitives
//!
//! This crate provides a chunked slab allocator and the pieces it is built
//! from:
//!
//! - **Dynamic array**: fixed-size slots with permanent indices, grown one
//!   chunk at a time ([`DynamicArray`], [`LockedDynamicArray`])
//! - **Linked list**: arena-backed doubly-linked list with cursor iteration
//!   ([`List`], [`LockedList`])
//! - **Spin lock**: busy-wait lock used by the lock-guarded variants
//! - **Memory interface**: injectable allocator ([`MemoryOps`]), with an
//!   accounting implementation for tests (requires `accounting` feature)
//!
//! Logging goes through `mlib-log`; set `MLIB_LOG=debug` and call
//! `mlib_log::init_from_env()` to see chunk growth.

pub mod chunk;
pub mod config;
pub mod dynamic_array;
pub mod error;
pub mod list;
pub mod memory;
pub mod spin;

pub use config::ArrayConfig;
pub use dynamic_array::{ArrayStats, DynamicArray, LockedDynamicArray};
pub use error::{Error, Result};
pub use list::{List, LockedList, NodeId};
#[cfg(feature = "accounting")]
pub use memory::CountingMemory;
pub use memory::{MemoryOps, SystemMemory};
pub use spin::SpinLock;
