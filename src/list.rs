//! Lock-free intrusive doubly linked list over a caller-owned slot region.
//!
//! The list never allocates: callers hand it a slice of elements, each of
//! which embeds one [`Node`] link record, and the list addresses elements by
//! their slot index within that slice. All mutating operations are bounded
//! retry loops over single-word compare-exchanges; an operation that loses
//! too many races fails cleanly instead of blocking.
//!
//! # Storage Invariant
//!
//! A list borrows its slot region for its whole lifetime. An element that is
//! linked is logically owned by the list until it is removed; the caller must
//! not hand the same element to a second list or overwrite its `Node` while
//! it is linked.
//!
//! # Example
//!
//! ```
//! use slotlist::{Linked, List, Node};
//!
//! struct Entry {
//!     value: u64,
//!     node: Node,
//! }
//!
//! impl Linked for Entry {
//!     fn node(&self) -> &Node {
//!         &self.node
//!     }
//! }
//!
//! let slots: Vec<Entry> = (0..4)
//!     .map(|value| Entry { value, node: Node::new() })
//!     .collect();
//! let list = List::new(&slots);
//!
//! assert!(list.push_back(&slots[0]));
//! assert!(list.push_back(&slots[1]));
//! assert!(list.insert_after(&slots[0], &slots[2]));
//!
//! let found = list.find(|entry| entry.value == 2).unwrap();
//! assert_eq!(found.value, 2);
//!
//! assert!(list.remove(&slots[2]).is_some());
//! assert_eq!(list.size(), 2);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::iter::{Iter, IterRev};
use crate::link::{Link, Links, Node, DELETING, MAX_CAPACITY, NULL_LINK, NULL_PTR};

/// Per-operation retry ceiling. Exhaustion surfaces as a failed operation,
/// never as a corrupted list.
pub(crate) const MAX_RETRIES: usize = 100;

/// Locates the embedded [`Node`] within an element.
///
/// Exactly one node per element; the same accessor must be used for the
/// element's whole membership in a list.
pub trait Linked {
    /// Returns the element's link record.
    fn node(&self) -> &Node;
}

/// Outcome of a bounded neighbour fix-up loop.
enum Fix {
    Done,
    /// The neighbour was removed or no longer points where we expected.
    Lost,
    Exhausted,
}

/// A lock-free intrusive doubly linked list.
///
/// `head` names the first live node and `tail` the last; both are slot
/// indices into the borrowed region, `NULL_PTR` when the list is empty.
/// `size` is a relaxed counter: monotone per operation, not a point-in-time
/// snapshot under concurrency.
pub struct List<'buf, T: Linked> {
    head: CachePadded<AtomicU32>,
    tail: CachePadded<AtomicU32>,
    size: CachePadded<AtomicUsize>,
    base: *const T,
    capacity: usize,
    _buf: PhantomData<&'buf [T]>,
}

// Safety: the list shares `&T` references across threads and synchronises
// all structural state through atomics, so it is as shareable as `&T` is.
unsafe impl<T: Linked + Sync> Send for List<'_, T> {}
unsafe impl<T: Linked + Sync> Sync for List<'_, T> {}

impl<'buf, T: Linked> List<'buf, T> {
    /// Creates a list over the given slot region.
    ///
    /// Every slot must hold a free node (see [`Node::is_free`]) before it is
    /// first pushed or inserted.
    ///
    /// # Panics
    ///
    /// Panics if the region is empty or longer than the link encoding can
    /// address.
    pub fn new(slots: &'buf [T]) -> Self {
        assert!(!slots.is_empty(), "slot region must not be empty");
        assert!(
            slots.len() <= MAX_CAPACITY,
            "slot region exceeds link addressing range"
        );
        assert!(mem::size_of::<T>() > 0, "zero-sized elements cannot embed a node");

        Self {
            head: CachePadded::new(AtomicU32::new(NULL_PTR)),
            tail: CachePadded::new(AtomicU32::new(NULL_PTR)),
            size: CachePadded::new(AtomicUsize::new(0)),
            base: slots.as_ptr(),
            capacity: slots.len(),
            _buf: PhantomData,
        }
    }

    /// Approximate number of linked elements.
    ///
    /// Updated with relaxed ordering; exact only once all concurrent
    /// operations have completed.
    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Returns `true` if no node is currently published at the head.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == NULL_PTR
    }

    /// Number of slots in the borrowed region.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    // ========================================================================
    // Index <-> reference conversion
    // ========================================================================

    #[inline]
    fn index_of(&self, item: &T) -> Link {
        let base = self.base as usize;
        let addr = item as *const T as usize;
        debug_assert!(addr >= base, "element outside the slot region");

        let offset = addr - base;
        debug_assert_eq!(offset % mem::size_of::<T>(), 0, "misaligned element");

        let index = offset / mem::size_of::<T>();
        debug_assert!(index < self.capacity, "element outside the slot region");

        index as Link
    }

    #[inline]
    pub(crate) fn item(&self, link: Link) -> &T {
        debug_assert!((link as usize) < self.capacity, "link out of range");
        // Safety: links only ever hold indices derived from in-region
        // references, checked at insertion.
        unsafe { &*self.base.add(link as usize) }
    }

    #[inline]
    pub(crate) fn node_at(&self, link: Link) -> &Node {
        self.item(link).node()
    }

    #[inline]
    pub(crate) fn load_head(&self) -> Link {
        self.head.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn load_tail(&self) -> Link {
        self.tail.load(Ordering::Acquire)
    }

    #[cfg(target_arch = "x86_64")]
    #[inline]
    fn prefetch(&self, link: Link) {
        if link != NULL_PTR {
            // Traversal is pointer-chasing bound; touch the next link word early.
            unsafe {
                use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
                _mm_prefetch::<_MM_HINT_T0>(self.base.add(link as usize).cast::<i8>());
            }
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    #[inline]
    fn prefetch(&self, _link: Link) {}

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Pushes `item` to the front of the list.
    ///
    /// Returns `false` if the retry budget was exhausted or the displaced
    /// head vanished mid-operation; the node is free again afterwards.
    #[must_use = "push_front returns false on retry exhaustion, which should be handled"]
    pub fn push_front(&self, item: &T) -> bool {
        let node = item.node();
        debug_assert!(node.is_free(), "pushing a node that is already linked");
        let item_link = self.index_of(item);

        for _ in 0..MAX_RETRIES {
            let head = self.head.load(Ordering::Acquire);
            let init = Links::new(head, NULL_PTR).pack();
            // Not yet reachable, so plain ordering is enough.
            node.store(init, Ordering::Relaxed);

            if self
                .head
                .compare_exchange(head, item_link, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            if head == NULL_PTR {
                // First element: the tail is ours unless a racing pusher beat
                // us to it.
                if self.claim_tail(item_link) {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                // The dying previous tail never cleared; give the head back
                // and report the push failed.
                if self.swing_head(item_link, NULL_PTR) && self.retract(node, init) {
                    return false;
                }
                // Somebody built on the new node before we could take it
                // back; the push stands.
                let _ = self.claim_tail(item_link);
                self.size.fetch_add(1, Ordering::Relaxed);
                return true;
            }

            match self.fix_prev(head, NULL_PTR, item_link) {
                Fix::Done => {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Fix::Lost | Fix::Exhausted => {
                    // The displaced head is being torn down. Hand the anchor
                    // back (its deleter is spinning on it) and back out.
                    if self.swing_head(item_link, head) && self.retract(node, init) {
                        return false;
                    }
                    // Somebody built on the new node before we could take it
                    // back; the push stands. Make a last attempt at the
                    // stitch we owe.
                    let _ = self.fix_prev(head, NULL_PTR, item_link);
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
            }
        }

        node.store(NULL_LINK, Ordering::Release);
        false
    }

    /// Pushes `item` to the back of the list.
    #[must_use = "push_back returns false on retry exhaustion, which should be handled"]
    pub fn push_back(&self, item: &T) -> bool {
        let node = item.node();
        debug_assert!(node.is_free(), "pushing a node that is already linked");
        let item_link = self.index_of(item);

        for _ in 0..MAX_RETRIES {
            let tail = self.tail.load(Ordering::Acquire);
            let init = Links::new(NULL_PTR, tail).pack();
            node.store(init, Ordering::Relaxed);

            if self
                .tail
                .compare_exchange(tail, item_link, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            if tail == NULL_PTR {
                if self.claim_head(item_link) {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                // The dying previous head never cleared; give the tail back
                // and report the push failed.
                if self.swing_tail(item_link, NULL_PTR) && self.retract(node, init) {
                    return false;
                }
                let _ = self.claim_head(item_link);
                self.size.fetch_add(1, Ordering::Relaxed);
                return true;
            }

            match self.fix_next(tail, NULL_PTR, item_link) {
                Fix::Done => {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Fix::Lost | Fix::Exhausted => {
                    if self.swing_tail(item_link, tail) && self.retract(node, init) {
                        return false;
                    }
                    let _ = self.fix_next(tail, NULL_PTR, item_link);
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
            }
        }

        node.store(NULL_LINK, Ordering::Release);
        false
    }

    /// Inserts `item` directly after `anchor`.
    ///
    /// Returns `false` if the anchor is no longer in the list or the retry
    /// budget was exhausted.
    #[must_use = "insert_after returns false if the anchor was removed, which should be handled"]
    pub fn insert_after(&self, anchor: &T, item: &T) -> bool {
        let node = item.node();
        debug_assert!(node.is_free(), "inserting a node that is already linked");
        debug_assert!(!std::ptr::eq(anchor, item), "inserting an element relative to itself");

        let anchor_link = self.index_of(anchor);
        let item_link = self.index_of(item);
        let anchor_node = anchor.node();

        for _ in 0..MAX_RETRIES {
            let word = anchor_node.load(Ordering::Acquire);
            if word == NULL_LINK {
                return false;
            }
            let links = Links::unpack(word);
            if links.is_deleting() {
                return false;
            }
            let next = links.next;

            let init = Links::new(next, anchor_link).pack();
            node.store(init, Ordering::Relaxed);

            if anchor_node
                .compare_exchange(word, links.with_next(item_link).pack())
                .is_err()
            {
                continue;
            }

            // The new node is published on the anchor's forward side; stitch
            // the far neighbour's backward side (or the tail anchor).
            let outcome = if next == NULL_PTR {
                if self.swing_tail(anchor_link, item_link) {
                    Fix::Done
                } else {
                    Fix::Exhausted
                }
            } else {
                self.fix_prev(next, anchor_link, item_link)
            };

            match outcome {
                Fix::Done => {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                outcome => {
                    let retracted =
                        self.restore_next(anchor_node, item_link, next) && self.retract(node, init);
                    if !retracted {
                        // A neighbour's deleter (or a stacked insert) routed
                        // the chain through the new node already; finish the
                        // far-side stitch we still owe, best effort.
                        if next != NULL_PTR {
                            let _ = self.fix_prev(next, anchor_link, item_link);
                        }
                        self.size.fetch_add(1, Ordering::Relaxed);
                        return true;
                    }
                    if matches!(outcome, Fix::Exhausted) {
                        return false;
                    }
                    // Fix::Lost: the far neighbour moved on; retry against
                    // the refreshed chain.
                }
            }
        }

        node.store(NULL_LINK, Ordering::Release);
        false
    }

    /// Inserts `item` directly before `anchor`.
    #[must_use = "insert_before returns false if the anchor was removed, which should be handled"]
    pub fn insert_before(&self, anchor: &T, item: &T) -> bool {
        let node = item.node();
        debug_assert!(node.is_free(), "inserting a node that is already linked");
        debug_assert!(!std::ptr::eq(anchor, item), "inserting an element relative to itself");

        let anchor_link = self.index_of(anchor);
        let item_link = self.index_of(item);
        let anchor_node = anchor.node();

        for _ in 0..MAX_RETRIES {
            let word = anchor_node.load(Ordering::Acquire);
            if word == NULL_LINK {
                return false;
            }
            let links = Links::unpack(word);
            if links.is_deleting() {
                return false;
            }
            let prev = links.prev;

            let init = Links::new(anchor_link, prev).pack();
            node.store(init, Ordering::Relaxed);

            if anchor_node
                .compare_exchange(word, links.with_prev(item_link).pack())
                .is_err()
            {
                continue;
            }

            let outcome = if prev == NULL_PTR {
                if self.swing_head(anchor_link, item_link) {
                    Fix::Done
                } else {
                    Fix::Exhausted
                }
            } else {
                self.fix_next(prev, anchor_link, item_link)
            };

            match outcome {
                Fix::Done => {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                outcome => {
                    let retracted =
                        self.restore_prev(anchor_node, item_link, prev) && self.retract(node, init);
                    if !retracted {
                        if prev != NULL_PTR {
                            let _ = self.fix_next(prev, anchor_link, item_link);
                        }
                        self.size.fetch_add(1, Ordering::Relaxed);
                        return true;
                    }
                    if matches!(outcome, Fix::Exhausted) {
                        return false;
                    }
                }
            }
        }

        node.store(NULL_LINK, Ordering::Release);
        false
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Removes `item` from the list.
    ///
    /// Returns `None` both when the element was already removed and when the
    /// commit CAS lost every retry; the caller cannot distinguish the two.
    pub fn remove<'a>(&self, item: &'a T) -> Option<&'a T> {
        let node = item.node();
        let item_link = self.index_of(item);

        for _ in 0..MAX_RETRIES {
            let word = node.load(Ordering::Acquire);
            if word == NULL_LINK {
                return None;
            }
            let links = Links::unpack(word);
            if links.is_deleting() {
                // Another thread owns this removal.
                return None;
            }

            // Commit point: the tombstone keeps the predecessor index so the
            // backward chain stays navigable while we unstitch.
            if node
                .compare_exchange(word, links.tombstone().pack())
                .is_err()
            {
                continue;
            }

            self.size.fetch_sub(1, Ordering::Relaxed);

            let next = links.next;
            self.unlink_forward(item_link, next, node);
            self.unlink_backward(item_link, next, node);

            node.store(NULL_LINK, Ordering::Release);
            return Some(item);
        }

        None
    }

    /// Removes and returns the element at the head.
    ///
    /// Returns `None` if the list is empty or every retry lost a race.
    pub fn pop_front(&self) -> Option<&T> {
        for _ in 0..MAX_RETRIES {
            let head = self.head.load(Ordering::Acquire);
            if head == NULL_PTR {
                return None;
            }
            if let Some(item) = self.remove(self.item(head)) {
                return Some(item);
            }
            // A concurrent remover got there first; reload the anchor.
        }
        None
    }

    /// Removes and returns the element at the tail.
    pub fn pop_back(&self) -> Option<&T> {
        for _ in 0..MAX_RETRIES {
            let tail = self.tail.load(Ordering::Acquire);
            if tail == NULL_PTR {
                return None;
            }
            if let Some(item) = self.remove(self.item(tail)) {
                return Some(item);
            }
        }
        None
    }

    // ========================================================================
    // Search and traversal
    // ========================================================================

    /// Returns the first element satisfying `predicate`, traversing from the
    /// head.
    ///
    /// A node whose removal has committed is treated as absent; when the
    /// chain breaks under the traversal it restarts from the live head, up to
    /// the retry budget.
    pub fn find<P>(&self, predicate: P) -> Option<&T>
    where
        P: Fn(&T) -> bool,
    {
        let mut restarts = 0;
        let mut current = self.head.load(Ordering::Acquire);

        while current != NULL_PTR {
            let item = self.item(current);
            let word = item.node().load(Ordering::Acquire);
            if word == NULL_LINK || Links::unpack(word).is_deleting() {
                restarts += 1;
                if restarts > MAX_RETRIES {
                    return None;
                }
                current = self.head.load(Ordering::Acquire);
                continue;
            }

            let next = Links::unpack(word).next;
            self.prefetch(next);

            if predicate(item) {
                return Some(item);
            }
            current = next;
        }

        None
    }

    /// Returns a forward cursor starting at the head.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(self)
    }

    /// Returns a reverse cursor starting at the tail.
    pub fn iter_rev(&self) -> IterRev<'_, T> {
        IterRev::new(self)
    }

    // ========================================================================
    // Neighbour fix-up and undo
    // ========================================================================

    /// Points `target`'s backward side at `new_prev`, verifying it still
    /// names `expected`.
    fn fix_prev(&self, target: Link, expected: Link, new_prev: Link) -> Fix {
        let node = self.node_at(target);
        for _ in 0..MAX_RETRIES {
            let word = node.load(Ordering::Acquire);
            if word == NULL_LINK {
                return Fix::Lost;
            }
            let links = Links::unpack(word);
            if links.is_deleting() || links.prev != expected {
                return Fix::Lost;
            }
            if node
                .compare_exchange(word, links.with_prev(new_prev).pack())
                .is_ok()
            {
                return Fix::Done;
            }
        }
        Fix::Exhausted
    }

    /// Points `target`'s forward side at `new_next`, verifying it still
    /// names `expected`.
    fn fix_next(&self, target: Link, expected: Link, new_next: Link) -> Fix {
        let node = self.node_at(target);
        for _ in 0..MAX_RETRIES {
            let word = node.load(Ordering::Acquire);
            if word == NULL_LINK {
                return Fix::Lost;
            }
            let links = Links::unpack(word);
            if links.is_deleting() || links.next != expected {
                return Fix::Lost;
            }
            if node
                .compare_exchange(word, links.with_next(new_next).pack())
                .is_ok()
            {
                return Fix::Done;
            }
        }
        Fix::Exhausted
    }

    /// Undoes a half-finished forward publish: points the anchor's next side
    /// back at `old_next` while it still names `unlinked`.
    ///
    /// Returns `true` when the new node is no longer reachable through the
    /// anchor. A `false` return means the anchor's deleter inherited the new
    /// node, or the chain was re-routed through it; either way it must stay.
    fn restore_next(&self, anchor: &Node, unlinked: Link, old_next: Link) -> bool {
        for _ in 0..MAX_RETRIES {
            let word = anchor.load(Ordering::Acquire);
            if word == NULL_LINK {
                return false;
            }
            let links = Links::unpack(word);
            if links.is_deleting() || links.next != unlinked {
                return false;
            }
            if anchor
                .compare_exchange(word, links.with_next(old_next).pack())
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Backward-side counterpart of [`List::restore_next`].
    ///
    /// The prev side of a tombstone is still live protocol data (its deleter
    /// re-reads it), so the restore applies to tombstoned anchors too.
    fn restore_prev(&self, anchor: &Node, unlinked: Link, old_prev: Link) -> bool {
        for _ in 0..MAX_RETRIES {
            let word = anchor.load(Ordering::Acquire);
            if word == NULL_LINK {
                return false;
            }
            let links = Links::unpack(word);
            if links.prev != unlinked {
                return false;
            }
            if anchor
                .compare_exchange(word, links.with_prev(old_prev).pack())
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Invalidates a node that failed to link, but only while nobody else
    /// has built on it. Returns `true` when the node is free again.
    fn retract(&self, node: &Node, expected: u64) -> bool {
        let mut expected = expected;
        for _ in 0..MAX_RETRIES {
            match node.compare_exchange(expected, NULL_LINK) {
                Ok(_) => return true,
                Err(word) => {
                    if word == NULL_LINK || Links::unpack(word).is_deleting() {
                        return false;
                    }
                    // A racing insert through this node will notice its own
                    // far side failing and restore; chase the word.
                    expected = word;
                }
            }
        }
        false
    }

    /// Claims the tail anchor for the first element pushed onto an empty
    /// list.
    ///
    /// The anchor may transiently still name the dying last element of the
    /// previous population; its deleter is about to null it, so wait that
    /// hand-off out instead of giving up. Returns `false` when the hand-off
    /// never arrived within the retry budget; the caller must back out.
    fn claim_tail(&self, item_link: Link) -> bool {
        for _ in 0..MAX_RETRIES {
            match self.tail.compare_exchange(
                NULL_PTR,
                item_link,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => {
                    let word = self.node_at(current).load(Ordering::Acquire);
                    if word != NULL_LINK && !Links::unpack(word).is_deleting() {
                        // A concurrent pusher claimed it legitimately.
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Head counterpart of [`List::claim_tail`].
    fn claim_head(&self, item_link: Link) -> bool {
        for _ in 0..MAX_RETRIES {
            match self.head.compare_exchange(
                NULL_PTR,
                item_link,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => {
                    let word = self.node_at(current).load(Ordering::Acquire);
                    if word != NULL_LINK && !Links::unpack(word).is_deleting() {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Moves the head anchor `from -> to`, tolerating transient publishes by
    /// concurrent pushers (they restore on failure).
    fn swing_head(&self, from: Link, to: Link) -> bool {
        for _ in 0..MAX_RETRIES {
            match self
                .head
                .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(current) if current == to => return true,
                Err(_) => continue,
            }
        }
        false
    }

    /// Tail counterpart of [`List::swing_head`].
    fn swing_tail(&self, from: Link, to: Link) -> bool {
        for _ in 0..MAX_RETRIES {
            match self
                .tail
                .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(current) if current == to => return true,
                Err(_) => continue,
            }
        }
        false
    }

    // ========================================================================
    // Removal fix-up
    // ========================================================================

    /// Makes the forward chain skip a tombstoned node: either advances the
    /// head anchor or re-points the predecessor's next side at `next0`.
    ///
    /// The predecessor is re-read from the tombstone each pass because a
    /// neighbouring deleter hands its own predecessor over by rewriting our
    /// prev field.
    fn unlink_forward(&self, item_link: Link, next0: Link, node: &Node) {
        for _ in 0..MAX_RETRIES {
            let prev = Links::unpack(node.load(Ordering::Acquire)).prev;

            if prev == NULL_PTR {
                match self.head.compare_exchange(
                    item_link,
                    next0,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return,
                    Err(current) if current == next0 => return,
                    // A pusher owns the anchor right now (it restores on
                    // failure), or our predecessor's deleter is still about
                    // to point it at us.
                    Err(_) => continue,
                }
            }

            let pred = self.node_at(prev);
            let word = pred.load(Ordering::Acquire);
            if word == NULL_LINK {
                // Predecessor finalised; its deleter re-points our prev.
                continue;
            }
            let links = Links::unpack(word);
            if links.is_deleting() {
                continue;
            }
            if links.next == next0 {
                return;
            }
            if links.next != item_link {
                // An insert is mid-flight between the predecessor and us; it
                // either completes or restores.
                continue;
            }
            if pred
                .compare_exchange(word, links.with_next(next0).pack())
                .is_ok()
            {
                // Confirm the predecessor we stitched is still the one our
                // tombstone names; an insert restoring its half-published
                // node can swap it underneath us.
                if Links::unpack(node.load(Ordering::Acquire)).prev == prev {
                    return;
                }
            }
        }
    }

    /// Makes the backward chain skip a tombstoned node: either steps the tail
    /// anchor back or re-points the successor's prev side at our (current)
    /// predecessor.
    ///
    /// When the successor is itself a tombstone, rewriting its prev field is
    /// the hand-off: its deleter re-reads it and carries the chain further.
    fn unlink_backward(&self, item_link: Link, next0: Link, node: &Node) {
        // The back-pointer value the chain currently traces us by.
        let mut written = item_link;

        for _ in 0..MAX_RETRIES {
            let prev = Links::unpack(node.load(Ordering::Acquire)).prev;

            if next0 == NULL_PTR {
                let tail = self.tail.load(Ordering::Acquire);
                if tail == prev {
                    if prev == NULL_PTR {
                        return;
                    }
                    let word = self.node_at(prev).load(Ordering::Acquire);
                    if word != NULL_LINK && !Links::unpack(word).is_deleting() {
                        return;
                    }
                    // The node we parked the anchor on is dying; its deleter
                    // rewrites our prev, so go around again.
                    written = prev;
                    continue;
                }
                if tail == written {
                    if self
                        .tail
                        .compare_exchange(written, prev, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        written = prev;
                    }
                    continue;
                }
                // An appender is mid-publish on the old tail (it restores), or
                // the anchor has already moved past us.
                continue;
            }

            let succ = self.node_at(next0);
            let word = succ.load(Ordering::Acquire);
            if word == NULL_LINK {
                return;
            }
            let links = Links::unpack(word);
            if links.prev == prev {
                return;
            }
            if links.prev != written {
                if links.prev == NULL_PTR {
                    return;
                }
                // The successor's back-pointer names someone else. An insert
                // that wove itself in while we were committing still points
                // back at us and will restore; wait that out. Anything else
                // means the chain no longer traces us.
                let interloper = self.node_at(links.prev).load(Ordering::Acquire);
                if interloper == NULL_LINK || Links::unpack(interloper).prev == item_link {
                    continue;
                }
                return;
            }
            if succ
                .compare_exchange(word, links.with_prev(prev).pack())
                .is_ok()
            {
                if links.is_deleting() {
                    // Handed off to the successor's own deleter.
                    return;
                }
                // Go around once more in case our predecessor changed while
                // we were writing.
                written = prev;
            }
        }
    }
}

impl<T: Linked> fmt::Debug for List<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_link = |link: Link| -> String {
            match link {
                NULL_PTR => "null".into(),
                DELETING => "deleting".into(),
                link => link.to_string(),
            }
        };

        f.debug_struct("List")
            .field("head", &fmt_link(self.head.load(Ordering::Relaxed)))
            .field("tail", &fmt_link(self.tail.load(Ordering::Relaxed)))
            .field("size", &self.size.load(Ordering::Relaxed))
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        value: u64,
        node: Node,
    }

    impl Item {
        fn new(value: u64) -> Self {
            Self {
                value,
                node: Node::new(),
            }
        }
    }

    impl Linked for Item {
        fn node(&self) -> &Node {
            &self.node
        }
    }

    fn slots(n: u64) -> Vec<Item> {
        (0..n).map(Item::new).collect()
    }

    fn forward_values(list: &List<'_, Item>) -> Vec<u64> {
        list.iter().map(|item| item.unwrap().value).collect()
    }

    fn reverse_values(list: &List<'_, Item>) -> Vec<u64> {
        list.iter_rev().map(|item| item.unwrap().value).collect()
    }

    #[test]
    fn new_list_is_empty() {
        let buf = slots(4);
        let list = List::new(&buf);

        assert!(list.is_empty());
        assert_eq!(list.size(), 0);
        assert_eq!(list.capacity(), 4);
        assert!(list.iter().next().is_none());
        assert!(list.iter_rev().next().is_none());
    }

    #[test]
    fn push_back_keeps_order() {
        let buf = slots(4);
        let list = List::new(&buf);

        for item in &buf {
            assert!(list.push_back(item));
        }

        assert_eq!(forward_values(&list), vec![0, 1, 2, 3]);
        assert_eq!(reverse_values(&list), vec![3, 2, 1, 0]);
        assert_eq!(list.size(), 4);
    }

    #[test]
    fn push_front_reverses_order() {
        let buf = slots(4);
        let list = List::new(&buf);

        for item in &buf {
            assert!(list.push_front(item));
        }

        assert_eq!(forward_values(&list), vec![3, 2, 1, 0]);
        assert_eq!(reverse_values(&list), vec![0, 1, 2, 3]);
    }

    #[test]
    fn single_element_head_equals_tail() {
        let buf = slots(1);
        let list = List::new(&buf);

        assert!(list.push_front(&buf[0]));

        assert_eq!(list.load_head(), list.load_tail());
        assert_eq!(forward_values(&list), vec![0]);
        assert_eq!(reverse_values(&list), vec![0]);
    }

    #[test]
    fn insert_after_middle() {
        // [1, 2, 4], then 3 goes in after 2.
        let buf = vec![Item::new(1), Item::new(2), Item::new(4), Item::new(3)];
        let list = List::new(&buf);

        for item in buf.iter().take(3) {
            assert!(list.push_back(item));
        }
        assert!(list.insert_after(&buf[1], &buf[3]));

        assert_eq!(forward_values(&list), vec![1, 2, 3, 4]);
        assert_eq!(reverse_values(&list), vec![4, 3, 2, 1]);
    }

    #[test]
    fn insert_before_middle() {
        let buf = vec![Item::new(1), Item::new(2), Item::new(4), Item::new(3)];
        let list = List::new(&buf);

        for item in buf.iter().take(3) {
            assert!(list.push_back(item));
        }
        assert!(list.insert_before(&buf[2], &buf[3]));

        assert_eq!(forward_values(&list), vec![1, 2, 3, 4]);
    }

    #[test]
    fn insert_before_head_moves_head() {
        let buf = slots(3);
        let list = List::new(&buf);

        assert!(list.push_back(&buf[0]));
        assert!(list.insert_before(&buf[0], &buf[1]));
        assert!(list.insert_before(&buf[1], &buf[2]));

        assert_eq!(forward_values(&list), vec![2, 1, 0]);
        assert_eq!(reverse_values(&list), vec![0, 1, 2]);
    }

    #[test]
    fn insert_after_tail_moves_tail() {
        let buf = slots(3);
        let list = List::new(&buf);

        assert!(list.push_back(&buf[0]));
        assert!(list.insert_after(&buf[0], &buf[1]));
        assert!(list.insert_after(&buf[1], &buf[2]));

        assert_eq!(forward_values(&list), vec![0, 1, 2]);
        assert_eq!(list.load_tail(), 2);
    }

    #[test]
    fn remove_middle() {
        let buf = slots(3);
        let list = List::new(&buf);

        for item in &buf {
            assert!(list.push_back(item));
        }

        assert!(list.remove(&buf[1]).is_some());

        assert_eq!(forward_values(&list), vec![0, 2]);
        assert_eq!(reverse_values(&list), vec![2, 0]);
        assert_eq!(list.size(), 2);
        assert!(buf[1].node.is_free());
    }

    #[test]
    fn remove_head_and_tail() {
        let buf = slots(3);
        let list = List::new(&buf);

        for item in &buf {
            assert!(list.push_back(item));
        }

        assert!(list.remove(&buf[0]).is_some());
        assert_eq!(forward_values(&list), vec![1, 2]);

        assert!(list.remove(&buf[2]).is_some());
        assert_eq!(forward_values(&list), vec![1]);
        assert_eq!(list.load_head(), list.load_tail());
    }

    #[test]
    fn remove_sole_element_empties_list() {
        let buf = slots(1);
        let list = List::new(&buf);

        assert!(list.push_back(&buf[0]));
        assert!(list.remove(&buf[0]).is_some());

        assert!(list.is_empty());
        assert_eq!(list.load_head(), NULL_PTR);
        assert_eq!(list.load_tail(), NULL_PTR);
        assert_eq!(list.size(), 0);
    }

    #[test]
    fn remove_twice_returns_none() {
        let buf = slots(2);
        let list = List::new(&buf);

        assert!(list.push_back(&buf[0]));
        assert!(list.push_back(&buf[1]));

        assert!(list.remove(&buf[0]).is_some());
        assert!(list.remove(&buf[0]).is_none());

        assert_eq!(forward_values(&list), vec![1]);
        assert_eq!(list.size(), 1);
    }

    #[test]
    fn insert_on_removed_anchor_fails() {
        let buf = slots(3);
        let list = List::new(&buf);

        assert!(list.push_back(&buf[0]));
        assert!(list.push_back(&buf[1]));
        assert!(list.remove(&buf[1]).is_some());

        assert!(!list.insert_after(&buf[1], &buf[2]));
        assert!(!list.insert_before(&buf[1], &buf[2]));
        assert!(buf[2].node.is_free());
    }

    #[test]
    fn pop_front_drains_in_order() {
        let buf = slots(3);
        let list = List::new(&buf);

        for item in &buf {
            assert!(list.push_back(item));
        }

        assert_eq!(list.pop_front().map(|item| item.value), Some(0));
        assert_eq!(list.pop_front().map(|item| item.value), Some(1));
        assert_eq!(list.pop_front().map(|item| item.value), Some(2));
        assert!(list.pop_front().is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn pop_back_drains_in_reverse() {
        let buf = slots(3);
        let list = List::new(&buf);

        for item in &buf {
            assert!(list.push_back(item));
        }

        assert_eq!(list.pop_back().map(|item| item.value), Some(2));
        assert_eq!(list.pop_back().map(|item| item.value), Some(1));
        assert_eq!(list.pop_back().map(|item| item.value), Some(0));
        assert!(list.pop_back().is_none());
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let buf = slots(1);
        let list = List::new(&buf);

        assert!(list.pop_front().is_none());
        assert!(list.pop_back().is_none());
    }

    #[test]
    fn find_existing_and_missing() {
        let buf = slots(5);
        let list = List::new(&buf);

        for item in &buf {
            assert!(list.push_back(item));
        }

        let found = list.find(|item| item.value == 3).unwrap();
        assert_eq!(found.value, 3);

        assert!(list.find(|item| item.value == 42).is_none());
    }

    #[test]
    fn find_on_empty_returns_none() {
        let buf = slots(1);
        let list = List::new(&buf);

        assert!(list.find(|_| true).is_none());
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let buf = slots(4);
        let list = List::new(&buf);

        for item in buf.iter().take(3) {
            assert!(list.push_back(item));
        }
        let before = forward_values(&list);

        assert!(list.insert_after(&buf[1], &buf[3]));
        assert!(list.remove(&buf[3]).is_some());

        assert_eq!(forward_values(&list), before);
        assert_eq!(list.size(), 3);
    }

    #[test]
    fn slot_reuse_after_remove() {
        let buf = slots(2);
        let list = List::new(&buf);

        assert!(list.push_back(&buf[0]));
        assert!(list.push_back(&buf[1]));

        assert!(list.remove(&buf[0]).is_some());
        assert!(buf[0].node.is_free());

        // The slot can go straight back in, at a new position.
        assert!(list.push_back(&buf[0]));
        assert_eq!(forward_values(&list), vec![1, 0]);
    }

    #[test]
    fn size_tracks_operations() {
        let buf = slots(4);
        let list = List::new(&buf);

        assert!(list.push_back(&buf[0]));
        assert!(list.push_front(&buf[1]));
        assert!(list.insert_after(&buf[0], &buf[2]));
        assert_eq!(list.size(), 3);

        assert!(list.remove(&buf[1]).is_some());
        assert_eq!(list.size(), 2);

        list.pop_front();
        list.pop_back();
        assert_eq!(list.size(), 0);
    }

    #[test]
    #[should_panic(expected = "slot region must not be empty")]
    fn empty_region_panics() {
        let buf: Vec<Item> = Vec::new();
        let _ = List::new(&buf);
    }
}
