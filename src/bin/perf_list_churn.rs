//! Profiling binary for link/unlink churn.
//!
//! Run with:
//!   cargo build --release --bin perf_list_churn
//!   perf stat -e cycles,instructions,cache-misses,cache-references \
//!       ./target/release/perf_list_churn

use std::hint::black_box;

use slotlist::{Linked, List, Node};

const CYCLES: usize = 10_000_000;

struct Entry {
    value: u64,
    node: Node,
}

impl Linked for Entry {
    fn node(&self) -> &Node {
        &self.node
    }
}

fn main() {
    let buf: Vec<Entry> = (0..1024)
        .map(|value| Entry {
            value,
            node: Node::new(),
        })
        .collect();
    let list = List::new(&buf);

    // Keep a small resident population so removals splice middle nodes.
    for entry in buf.iter().take(8) {
        assert!(list.push_back(entry));
    }

    // Timed section - link then immediately unlink (hot cache).
    let churn = &buf[8];
    for _ in 0..CYCLES {
        black_box(list.push_back(churn));
        black_box(list.pop_back());
    }

    assert_eq!(list.size(), 8);
    black_box(list.find(|entry| entry.value == 7));
}
