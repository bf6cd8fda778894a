//! Resumable cursors over a live list.
//!
//! An iterator is not a snapshot: it carries `(current, remembered
//! neighbour)` and cross-checks the remembered neighbour against the live
//! link word every step. When the relation has gone stale — a removal or
//! insert restructured the chain under the cursor — it enters a bounded
//! repair walk instead of dereferencing through dead links. Repair-budget
//! exhaustion surfaces as [`IterInvalidated`] rather than silently
//! truncating the traversal.
//!
//! Guarantees are *stability*, not consistency: a cursor survives any number
//! of concurrent removals without undefined behaviour or unbounded loops,
//! and it may or may not observe concurrently inserted nodes.

use std::fmt;
use std::sync::atomic::Ordering;

use crate::link::{Links, NULL_LINK, NULL_PTR};
use crate::list::{Linked, List, MAX_RETRIES};

/// The cursor's repair walk exhausted its budget while re-synchronising
/// with the live chain.
///
/// Surfaced as an explicit error because silently ending the traversal
/// would be indistinguishable from a short list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterInvalidated;

impl fmt::Display for IterInvalidated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("iterator invalidated by concurrent structural changes")
    }
}

impl std::error::Error for IterInvalidated {}

/// Forward cursor, head to tail.
pub struct Iter<'a, T: Linked> {
    list: &'a List<'a, T>,
    current: u32,
    /// The node we believe precedes `current`; comparing it against the live
    /// word is how drift is detected.
    prev: u32,
}

impl<'a, T: Linked> Iter<'a, T> {
    pub(crate) fn new(list: &'a List<'a, T>) -> Self {
        Self {
            list,
            current: list.load_head(),
            prev: NULL_PTR,
        }
    }
}

impl<'a, T: Linked> Iterator for Iter<'a, T> {
    type Item = Result<&'a T, IterInvalidated>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut budget = MAX_RETRIES;

        loop {
            let current = self.current;
            if current == NULL_PTR {
                return None;
            }

            let word = self.list.node_at(current).load(Ordering::Acquire);
            if word == NULL_LINK {
                // The node under the cursor was finalised; the chain from
                // here is gone.
                self.current = NULL_PTR;
                return None;
            }
            let links = Links::unpack(word);

            if links.is_deleting() {
                if budget == 0 {
                    self.current = NULL_PTR;
                    return Some(Err(IterInvalidated));
                }
                budget -= 1;

                // A removal committed under the cursor. The tombstone still
                // names its predecessor, so re-anchor through it and take
                // that node's forward link.
                let back = links.prev;
                if back == NULL_PTR {
                    self.prev = NULL_PTR;
                    self.current = self.list.load_head();
                    continue;
                }
                let back_word = self.list.node_at(back).load(Ordering::Acquire);
                if back_word == NULL_LINK {
                    self.prev = NULL_PTR;
                    self.current = self.list.load_head();
                    continue;
                }
                let back_links = Links::unpack(back_word);
                if back_links.is_deleting() {
                    // Walk further back through the tombstoned stretch.
                    self.current = back;
                    continue;
                }
                self.prev = back;
                self.current = back_links.next;
                continue;
            }

            if links.prev != self.prev {
                if budget == 0 {
                    self.current = NULL_PTR;
                    return Some(Err(IterInvalidated));
                }
                budget -= 1;

                // Structural drift: our remembered neighbour is stale. Skip
                // ahead and re-derive the relation from the next node.
                let next = links.next;
                if next == NULL_PTR {
                    self.current = NULL_PTR;
                    return None;
                }
                let next_word = self.list.node_at(next).load(Ordering::Acquire);
                if next_word != NULL_LINK {
                    let next_links = Links::unpack(next_word);
                    if !next_links.is_deleting() {
                        self.prev = next_links.prev;
                    }
                }
                self.current = next;
                continue;
            }

            let item = self.list.item(current);
            self.prev = current;
            self.current = links.next;
            return Some(Ok(item));
        }
    }
}

impl<T: Linked> fmt::Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("current", &self.current)
            .field("prev", &self.prev)
            .finish()
    }
}

/// Reverse cursor, tail to head.
pub struct IterRev<'a, T: Linked> {
    list: &'a List<'a, T>,
    current: u32,
    /// The node we last yielded, on the tail side of `current`.
    ahead: u32,
}

impl<'a, T: Linked> IterRev<'a, T> {
    pub(crate) fn new(list: &'a List<'a, T>) -> Self {
        Self {
            list,
            current: list.load_tail(),
            ahead: NULL_PTR,
        }
    }
}

impl<'a, T: Linked> Iterator for IterRev<'a, T> {
    type Item = Result<&'a T, IterInvalidated>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut budget = MAX_RETRIES;

        loop {
            let current = self.current;
            if current == NULL_PTR {
                return None;
            }

            let word = self.list.node_at(current).load(Ordering::Acquire);
            if word == NULL_LINK {
                self.current = NULL_PTR;
                return None;
            }
            let links = Links::unpack(word);

            if links.is_deleting() {
                if budget == 0 {
                    self.current = NULL_PTR;
                    return Some(Err(IterInvalidated));
                }
                budget -= 1;

                // Step through the tombstone's preserved predecessor. If the
                // walk would revisit ground already covered, stop instead of
                // cycling.
                let back = links.prev;
                if back == NULL_PTR || back == self.ahead {
                    self.current = NULL_PTR;
                    return None;
                }
                self.current = back;
                continue;
            }

            if links.next != self.ahead {
                if budget == 0 {
                    self.current = NULL_PTR;
                    return Some(Err(IterInvalidated));
                }
                budget -= 1;

                // Drift: step backward and re-derive the relation there.
                let back = links.prev;
                if back == NULL_PTR {
                    self.current = NULL_PTR;
                    return None;
                }
                let back_word = self.list.node_at(back).load(Ordering::Acquire);
                if back_word != NULL_LINK {
                    let back_links = Links::unpack(back_word);
                    if !back_links.is_deleting() {
                        self.ahead = back_links.next;
                    }
                }
                self.current = back;
                continue;
            }

            let item = self.list.item(current);
            self.ahead = current;
            self.current = links.prev;
            return Some(Ok(item));
        }
    }
}

impl<T: Linked> fmt::Debug for IterRev<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterRev")
            .field("current", &self.current)
            .field("ahead", &self.ahead)
            .finish()
    }
}
