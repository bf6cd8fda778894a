//! Walkthrough of the list over a caller-owned slot buffer: forward and
//! reverse iteration, predicate search, anchored insertion, and removal.
//!
//! Run with:
//!   cargo run --bin demo

use slotlist::{Linked, List, Node};

struct User {
    id: u64,
    name: &'static str,
    node: Node,
}

impl User {
    fn new(id: u64, name: &'static str) -> Self {
        Self {
            id,
            name,
            node: Node::new(),
        }
    }
}

impl Linked for User {
    fn node(&self) -> &Node {
        &self.node
    }
}

fn print_forward(list: &List<'_, User>) {
    println!("Forward iteration:");
    for user in list.iter() {
        let user = user.expect("no concurrent mutation in this demo");
        println!("  id: {} name: {}", user.id, user.name);
    }
    println!();
}

fn print_reverse(list: &List<'_, User>) {
    println!("Reverse iteration:");
    for user in list.iter_rev() {
        let user = user.expect("no concurrent mutation in this demo");
        println!("  id: {} name: {}", user.id, user.name);
    }
    println!();
}

fn main() {
    let users = vec![
        User::new(1, "alice"),
        User::new(2, "bob"),
        User::new(3, "carol"),
        User::new(4, "dave"),
    ];

    let list = List::new(&users);
    for user in users.iter().take(3) {
        assert!(list.push_back(user));
    }

    print_forward(&list);
    print_reverse(&list);

    println!("Searching for id 2:");
    match list.find(|user| user.id == 2) {
        Some(user) => println!("  found {}\n", user.name),
        None => println!("  not found\n"),
    }

    println!("Inserting dave after bob:");
    assert!(list.insert_after(&users[1], &users[3]));
    print_forward(&list);

    println!("Removing bob:");
    assert!(list.remove(&users[1]).is_some());
    print_forward(&list);
    print_reverse(&list);

    println!("Popping from the front until empty:");
    while let Some(user) = list.pop_front() {
        println!("  popped {}", user.name);
    }
    println!("size: {}", list.size());
}
