//! Doubly-linked list over an arena of node slots.
//!
//! Nodes live in a `Vec` owned by the list and link to each other by slot
//! index. Removed slots go onto a free-list and are reused by later inserts, so
//! a long-lived list never reallocates once it reaches its steady-state size.
//!
//! Callers address nodes through [`NodeId`] handles. A handle records which
//! list created it and the generation of its slot, which gives the two checks
//! an intrusive list gets from its back-pointer:
//!
//! - a handle passed to the wrong list is rejected ([`Error::InvalidArgument`]);
//! - a handle to a node that has since been removed is rejected even if its
//!   slot was reused ([`Error::NoSuchEntry`] from `remove`,
//!   [`Error::InvalidArgument`] when used as an insert anchor).
//!
//! Iteration is cursor based: [`List::next_node`] and [`List::prev_node`]
//! take the previous position (or `None` to start) and return the next one.
//! There is no iterator object to keep alive between steps.
//!
//! [`LockedList`] wraps a list in a [`SpinLock`] and takes the lock for each
//! call individually.
//!
//! # Example
//!
//! ```
//! use mlib_mem::list::List;
//!
//! let mut list = List::new();
//! let b = list.insert_tail('b').unwrap();
//! list.insert_head('a').unwrap();
//! list.insert_next(Some(b), 'c').unwrap();
//!
//! let mut cursor = None;
//! let mut seen = String::new();
//! while let Some(node) = list.next_node(cursor) {
//!     seen.push(*list.get(node).unwrap());
//!     cursor = Some(node);
//! }
//! assert_eq!(seen, "abc");
//! ```

use crate::error::{Error, Result};
use crate::spin::{SpinGuard, SpinLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a list instance, unique for the life of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListId(u64);

impl ListId {
    fn next() -> Self {
        ListId(NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle to a node of a particular [`List`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    list: ListId,
    slot: usize,
    generation: u32,
}

impl NodeId {
    /// The list this node was inserted into.
    pub fn list(&self) -> ListId {
        self.list
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}#{} of list {}", self.slot, self.generation, self.list.0)
    }
}

/// What [`List::search`] does with the first matching node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// Leave the node linked and return its handle.
    Keep,
    /// Detach the node and return its value.
    Remove,
}

/// Result of a successful [`List::search`].
#[derive(Debug, PartialEq, Eq)]
pub enum Found<T> {
    /// The node is still in the list.
    Linked(NodeId),
    /// The node was detached; its handle is now stale.
    Removed(T),
}

struct Node<T> {
    value: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
    generation: u32,
}

/// A doubly-linked list of `T`.
pub struct List<T> {
    id: ListId,
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    max_len: usize,
}

impl<T> List<T> {
    /// Creates an empty list whose size is bounded only by `usize::MAX`.
    pub fn new() -> Self {
        Self::with_max_len(usize::MAX)
    }

    /// Creates an empty list that rejects inserts once it holds `max_len`
    /// nodes.
    pub fn with_max_len(max_len: usize) -> Self {
        List {
            id: ListId::next(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            max_len,
        }
    }

    /// Identity checked against every [`NodeId`] passed in.
    pub fn id(&self) -> ListId {
        self.id
    }

    /// Number of linked nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list has no nodes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size at which inserts start failing.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Inserts `value` before the first node.
    pub fn insert_head(&mut self, value: T) -> Result<NodeId> {
        self.check_room()?;
        let slot = self.new_node(value);
        self.link(slot, None, self.head);
        Ok(self.handle(slot))
    }

    /// Inserts `value` after the last node.
    pub fn insert_tail(&mut self, value: T) -> Result<NodeId> {
        self.check_room()?;
        let slot = self.new_node(value);
        self.link(slot, self.tail, None);
        Ok(self.handle(slot))
    }

    /// Inserts `value` right after `anchor`, or at the head when `anchor` is
    /// `None`.
    pub fn insert_next(&mut self, anchor: Option<NodeId>, value: T) -> Result<NodeId> {
        let Some(anchor) = anchor else {
            return self.insert_head(value);
        };
        let at = self.resolve_anchor(anchor)?;
        self.check_room()?;
        let slot = self.new_node(value);
        self.link(slot, Some(at), self.nodes[at].next);
        Ok(self.handle(slot))
    }

    /// Inserts `value` right before `anchor`, or at the tail when `anchor` is
    /// `None`.
    pub fn insert_prev(&mut self, anchor: Option<NodeId>, value: T) -> Result<NodeId> {
        let Some(anchor) = anchor else {
            return self.insert_tail(value);
        };
        let at = self.resolve_anchor(anchor)?;
        self.check_room()?;
        let slot = self.new_node(value);
        self.link(slot, self.nodes[at].prev, Some(at));
        Ok(self.handle(slot))
    }

    /// Detaches `node` and returns its value.
    ///
    /// Fails with [`Error::InvalidArgument`] if the node belongs to another
    /// list, and with [`Error::NoSuchEntry`] if this list is empty or the
    /// node was already removed.
    pub fn remove(&mut self, node: NodeId) -> Result<T> {
        if node.list != self.id {
            return Err(Error::invalid("node belongs to another list"));
        }
        if self.is_empty() {
            return Err(Error::NoSuchEntry { idx: None });
        }
        let slot = self.resolve(node)?;
        Ok(self.unlink(slot))
    }

    /// Detaches the first node, if any.
    pub fn remove_head(&mut self) -> Option<T> {
        let slot = self.head?;
        Some(self.unlink(slot))
    }

    /// Detaches the last node, if any.
    pub fn remove_tail(&mut self) -> Option<T> {
        let slot = self.tail?;
        Some(self.unlink(slot))
    }

    /// Cursor step forwards: `None` yields the first node, a node yields its
    /// successor. Foreign or stale cursors yield `None`.
    pub fn next_node(&self, cursor: Option<NodeId>) -> Option<NodeId> {
        let slot = match cursor {
            None => self.head?,
            Some(node) => self.nodes[self.resolve(node).ok()?].next?,
        };
        Some(self.handle(slot))
    }

    /// Cursor step backwards: `None` yields the last node, a node yields its
    /// predecessor. Foreign or stale cursors yield `None`.
    pub fn prev_node(&self, cursor: Option<NodeId>) -> Option<NodeId> {
        let slot = match cursor {
            None => self.tail?,
            Some(node) => self.nodes[self.resolve(node).ok()?].prev?,
        };
        Some(self.handle(slot))
    }

    /// The value stored at `node`.
    pub fn get(&self, node: NodeId) -> Option<&T> {
        let slot = self.resolve(node).ok()?;
        self.nodes[slot].value.as_ref()
    }

    /// Mutable access to the value stored at `node`.
    pub fn get_mut(&mut self, node: NodeId) -> Option<&mut T> {
        let slot = self.resolve(node).ok()?;
        self.nodes[slot].value.as_mut()
    }

    /// Scans from the head for the first node whose value satisfies
    /// `predicate`.
    ///
    /// With [`SearchMode::Remove`] the match is detached before returning.
    pub fn search<F>(&mut self, mut predicate: F, mode: SearchMode) -> Option<Found<T>>
    where
        F: FnMut(NodeId, &T) -> bool,
    {
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let handle = self.handle(slot);
            let node = &self.nodes[slot];
            let next = node.next;
            if node.value.as_ref().is_some_and(|value| predicate(handle, value)) {
                return Some(match mode {
                    SearchMode::Keep => Found::Linked(handle),
                    SearchMode::Remove => Found::Removed(self.unlink(slot)),
                });
            }
            cursor = next;
        }
        None
    }

    fn check_room(&self) -> Result<()> {
        if self.len >= self.max_len {
            return Err(Error::LimitExceeded {
                limit: self.max_len,
            });
        }
        Ok(())
    }

    fn handle(&self, slot: usize) -> NodeId {
        NodeId {
            list: self.id,
            slot,
            generation: self.nodes[slot].generation,
        }
    }

    fn resolve(&self, node: NodeId) -> Result<usize> {
        if node.list != self.id {
            return Err(Error::invalid("node belongs to another list"));
        }
        match self.nodes.get(node.slot) {
            Some(n) if n.generation == node.generation && n.value.is_some() => Ok(node.slot),
            _ => Err(Error::NoSuchEntry { idx: None }),
        }
    }

    fn resolve_anchor(&self, anchor: NodeId) -> Result<usize> {
        match self.resolve(anchor) {
            Err(Error::NoSuchEntry { .. }) => Err(Error::invalid("anchor node is no longer linked")),
            other => other,
        }
    }

    fn new_node(&mut self, value: T) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot].value = Some(value);
                slot
            }
            None => {
                self.nodes.push(Node {
                    value: Some(value),
                    prev: None,
                    next: None,
                    generation: 0,
                });
                self.nodes.len() - 1
            }
        }
    }

    fn link(&mut self, slot: usize, prev: Option<usize>, next: Option<usize>) {
        self.nodes[slot].prev = prev;
        self.nodes[slot].next = next;
        match prev {
            Some(p) => self.nodes[p].next = Some(slot),
            None => self.head = Some(slot),
        }
        match next {
            Some(n) => self.nodes[n].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.len += 1;
    }

    fn unlink(&mut self, slot: usize) -> T {
        let node = &mut self.nodes[slot];
        let (prev, next) = (node.prev.take(), node.next.take());
        let value = node.value.take();
        node.generation = node.generation.wrapping_add(1);

        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
        self.free.push(slot);

        // Only linked slots are ever unlinked, and linked slots hold a value.
        match value {
            Some(value) => value,
            None => unreachable!("unlinked an empty list slot"),
        }
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries = f.debug_list();
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            entries.entry(&self.nodes[slot].value);
            cursor = self.nodes[slot].next;
        }
        entries.finish()
    }
}

/// A [`List`] whose every call runs under a [`SpinLock`].
///
/// The lock is held for one call at a time. A traversal made of several
/// [`next_node`](Self::next_node) calls is not atomic: another thread may
/// insert or remove between steps, so callers that walk the list while others
/// mutate it still need their own serialization.
pub struct LockedList<T> {
    inner: SpinLock<List<T>>,
}

impl<T> LockedList<T> {
    /// Creates an empty lock-guarded list.
    pub fn new() -> Self {
        Self::from_list(List::new())
    }

    /// Wraps an existing list.
    pub fn from_list(list: List<T>) -> Self {
        LockedList {
            inner: SpinLock::new(list),
        }
    }

    pub(crate) fn locked(&self) -> SpinGuard<'_, List<T>> {
        self.inner.lock()
    }

    /// Identity checked against every [`NodeId`] passed in.
    pub fn id(&self) -> ListId {
        self.locked().id()
    }

    /// Number of linked nodes.
    pub fn len(&self) -> usize {
        self.locked().len()
    }

    /// Whether the list has no nodes.
    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    /// See [`List::insert_head`].
    pub fn insert_head(&self, value: T) -> Result<NodeId> {
        self.locked().insert_head(value)
    }

    /// See [`List::insert_tail`].
    pub fn insert_tail(&self, value: T) -> Result<NodeId> {
        self.locked().insert_tail(value)
    }

    /// See [`List::insert_next`].
    pub fn insert_next(&self, anchor: Option<NodeId>, value: T) -> Result<NodeId> {
        self.locked().insert_next(anchor, value)
    }

    /// See [`List::insert_prev`].
    pub fn insert_prev(&self, anchor: Option<NodeId>, value: T) -> Result<NodeId> {
        self.locked().insert_prev(anchor, value)
    }

    /// See [`List::remove`].
    pub fn remove(&self, node: NodeId) -> Result<T> {
        self.locked().remove(node)
    }

    /// See [`List::remove_head`].
    pub fn remove_head(&self) -> Option<T> {
        self.locked().remove_head()
    }

    /// See [`List::remove_tail`].
    pub fn remove_tail(&self) -> Option<T> {
        self.locked().remove_tail()
    }

    /// See [`List::next_node`].
    pub fn next_node(&self, cursor: Option<NodeId>) -> Option<NodeId> {
        self.locked().next_node(cursor)
    }

    /// See [`List::prev_node`].
    pub fn prev_node(&self, cursor: Option<NodeId>) -> Option<NodeId> {
        self.locked().prev_node(cursor)
    }

    /// Runs `f` on the value at `node` while the lock is held.
    ///
    /// Keep `f` short: every other caller spins until it returns.
    pub fn with<R>(&self, node: NodeId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.locked().get_mut(node).map(f)
    }

    /// See [`List::search`]. The predicate runs with the lock held.
    pub fn search<F>(&self, predicate: F, mode: SearchMode) -> Option<Found<T>>
    where
        F: FnMut(NodeId, &T) -> bool,
    {
        self.locked().search(predicate, mode)
    }

    /// Unlocked access; `&mut self` proves exclusivity.
    pub fn get_mut(&mut self) -> &mut List<T> {
        self.inner.get_mut()
    }

    /// Unwraps the list.
    pub fn into_inner(self) -> List<T> {
        self.inner.into_inner()
    }
}

impl<T: Copy> LockedList<T> {
    /// Copy of the value at `node`.
    pub fn get(&self, node: NodeId) -> Option<T> {
        self.locked().get(node).copied()
    }
}

impl<T> Default for LockedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LockedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedList")
            .field("lock", &self.inner)
            .finish_non_exhaustive()
    }
}
