//! Diagnostic validation of list invariants.
//!
//! [`List::check`] verifies the quiescent-state invariants: both traversal
//! directions visit the same nodes, every adjacent pair is bidirectionally
//! consistent, the edges carry null links, nothing dead is reachable, and the
//! counter agrees with the chain length. It takes plain atomic loads with no
//! synchronisation of its own, so it is only meaningful once every concurrent
//! operation has completed — the natural place to call it is after joining
//! worker threads in a test.

use std::fmt;
use std::sync::atomic::Ordering;

use crate::link::{Links, NULL_LINK, NULL_PTR};
use crate::list::{Linked, List};

/// An invariant violation found by [`List::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
    /// The head node's backward link is not null.
    HeadPrev {
        /// Slot index of the head node.
        head: u32,
        /// The backward link it carries instead of null.
        prev: u32,
    },
    /// The tail node's forward link is not null.
    TailNext {
        /// Slot index of the tail node.
        tail: u32,
        /// The forward link it carries instead of null.
        next: u32,
    },
    /// A reachable node is tombstoned or finalised.
    DeadNode {
        /// Slot index of the dead node.
        at: u32,
    },
    /// A forward neighbour does not point back at the node naming it.
    BrokenPair {
        /// Slot index of the node whose forward link was followed.
        node: u32,
        /// The forward neighbour.
        next: u32,
        /// The backward link the neighbour actually carries.
        back: u32,
    },
    /// Forward and reverse traversals visited different chains.
    TraversalMismatch {
        /// Nodes visited head-to-tail.
        forward: usize,
        /// Nodes visited tail-to-head.
        reverse: usize,
    },
    /// The chain length disagrees with the size counter.
    SizeMismatch {
        /// Nodes visited by traversal.
        traversed: usize,
        /// The counter's value.
        size: usize,
    },
    /// A traversal did not terminate within the slot-region capacity.
    Cycle,
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::HeadPrev { head, prev } => {
                write!(f, "head node {head} carries prev link {prev}")
            }
            Self::TailNext { tail, next } => {
                write!(f, "tail node {tail} carries next link {next}")
            }
            Self::DeadNode { at } => write!(f, "dead node {at} is reachable"),
            Self::BrokenPair { node, next, back } => {
                write!(f, "node {node} names next {next}, which points back at {back}")
            }
            Self::TraversalMismatch { forward, reverse } => {
                write!(f, "forward visits {forward} nodes, reverse visits {reverse}")
            }
            Self::SizeMismatch { traversed, size } => {
                write!(f, "traversal visits {traversed} nodes, size() reports {size}")
            }
            Self::Cycle => f.write_str("traversal exceeded the slot-region capacity"),
        }
    }
}

impl std::error::Error for CheckError {}

impl<T: Linked> List<'_, T> {
    /// Verifies the quiescent-state invariants.
    ///
    /// Only meaningful when no operation is mid-flight; call it after all
    /// mutating threads have been joined.
    pub fn check(&self) -> Result<(), CheckError> {
        let head = self.load_head();
        let tail = self.load_tail();

        if head == NULL_PTR || tail == NULL_PTR {
            if head != tail {
                return Err(CheckError::TraversalMismatch {
                    forward: (head != NULL_PTR) as usize,
                    reverse: (tail != NULL_PTR) as usize,
                });
            }
            if self.size() != 0 {
                return Err(CheckError::SizeMismatch {
                    traversed: 0,
                    size: self.size(),
                });
            }
            return Ok(());
        }

        let head_links = self.live_links(head)?;
        if head_links.prev != NULL_PTR {
            return Err(CheckError::HeadPrev {
                head,
                prev: head_links.prev,
            });
        }

        let tail_links = self.live_links(tail)?;
        if tail_links.next != NULL_PTR {
            return Err(CheckError::TailNext {
                tail,
                next: tail_links.next,
            });
        }

        // Forward walk, verifying each pair both ways.
        let mut forward = Vec::new();
        let mut current = head;
        loop {
            if forward.len() > self.capacity() {
                return Err(CheckError::Cycle);
            }
            forward.push(current);

            let links = self.live_links(current)?;
            let next = links.next;
            if next == NULL_PTR {
                break;
            }

            let back = self.live_links(next)?.prev;
            if back != current {
                return Err(CheckError::BrokenPair {
                    node: current,
                    next,
                    back,
                });
            }
            current = next;
        }

        // Reverse walk.
        let mut reverse = Vec::new();
        let mut current = tail;
        loop {
            if reverse.len() > self.capacity() {
                return Err(CheckError::Cycle);
            }
            reverse.push(current);

            let prev = self.live_links(current)?.prev;
            if prev == NULL_PTR {
                break;
            }
            current = prev;
        }

        reverse.reverse();
        if forward != reverse {
            return Err(CheckError::TraversalMismatch {
                forward: forward.len(),
                reverse: reverse.len(),
            });
        }

        if forward.len() != self.size() {
            return Err(CheckError::SizeMismatch {
                traversed: forward.len(),
                size: self.size(),
            });
        }

        Ok(())
    }

    fn live_links(&self, link: u32) -> Result<Links, CheckError> {
        let word = self.node_at(link).load(Ordering::Acquire);
        if word == NULL_LINK {
            return Err(CheckError::DeadNode { at: link });
        }
        let links = Links::unpack(word);
        if links.is_deleting() {
            return Err(CheckError::DeadNode { at: link });
        }
        Ok(links)
    }
}
