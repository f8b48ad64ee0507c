//! Persistent hash array mapped trie
//!
//! Each branch consumes 5 bits of the contract hash and stores only its
//! occupied children, indexed by popcount over a 32-bit bitmap. Inserting
//! copies the nodes along one path and shares everything else with the
//! previous version. Contracts whose full 64-bit hashes collide end up in
//! a collision node compared by equality.

use super::Entry;
use crate::contract::Contract;
use std::sync::Arc;

const BITS: u32 = 5;
const MASK: u64 = (1 << BITS) - 1;

#[derive(Clone)]
enum Node {
    Branch { bitmap: u32, children: Vec<Child> },
    Collision(Vec<Entry>),
}

#[derive(Clone)]
enum Child {
    Leaf(Entry),
    Node(Arc<Node>),
}

#[inline]
fn bit_for(hash: u64, shift: u32) -> u32 {
    1 << ((hash >> shift) & MASK)
}

#[inline]
fn slot_of(bitmap: u32, bit: u32) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

#[derive(Clone)]
pub(crate) struct HashTrie {
    root: Arc<Node>,
    len: usize,
}

impl Default for HashTrie {
    fn default() -> Self {
        Self {
            root: Arc::new(Node::Branch {
                bitmap: 0,
                children: Vec::new(),
            }),
            len: 0,
        }
    }
}

impl HashTrie {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn get(&self, contract: &Contract) -> Option<&Entry> {
        let hash = contract.hash_code();
        let mut node: &Node = &self.root;
        let mut shift = 0;
        loop {
            match node {
                Node::Collision(entries) => {
                    return entries.iter().find(|e| e.contract() == contract);
                }
                Node::Branch { bitmap, children } => {
                    let bit = bit_for(hash, shift);
                    if bitmap & bit == 0 {
                        return None;
                    }
                    match &children[slot_of(*bitmap, bit)] {
                        Child::Leaf(entry) => {
                            return (entry.contract() == contract).then_some(entry);
                        }
                        Child::Node(child) => {
                            node = child.as_ref();
                            shift += BITS;
                        }
                    }
                }
            }
        }
    }

    /// New trie with `entry` stored; the displaced entry, if any
    pub(crate) fn insert(&self, entry: Entry) -> (HashTrie, Option<Entry>) {
        let hash = entry.contract().hash_code();
        let (root, displaced) = insert_at(&self.root, 0, hash, entry);
        let len = if displaced.is_some() { self.len } else { self.len + 1 };
        (
            HashTrie {
                root: Arc::new(root),
                len,
            },
            displaced,
        )
    }

    pub(crate) fn entries(&self) -> Vec<Entry> {
        let mut out = Vec::with_capacity(self.len);
        collect(&self.root, &mut out);
        out
    }
}

fn insert_at(node: &Node, shift: u32, hash: u64, entry: Entry) -> (Node, Option<Entry>) {
    match node {
        Node::Collision(entries) => {
            let mut entries = entries.clone();
            match entries.iter().position(|e| e.contract() == entry.contract()) {
                Some(index) => {
                    let displaced = std::mem::replace(&mut entries[index], entry);
                    (Node::Collision(entries), Some(displaced))
                }
                None => {
                    entries.push(entry);
                    (Node::Collision(entries), None)
                }
            }
        }
        Node::Branch { bitmap, children } => {
            let bit = bit_for(hash, shift);
            let slot = slot_of(*bitmap, bit);
            let mut children = children.clone();

            if bitmap & bit == 0 {
                children.insert(slot, Child::Leaf(entry));
                return (
                    Node::Branch {
                        bitmap: bitmap | bit,
                        children,
                    },
                    None,
                );
            }

            let displaced = match children[slot].clone() {
                Child::Leaf(existing) if existing.contract() == entry.contract() => {
                    children[slot] = Child::Leaf(entry);
                    Some(existing)
                }
                Child::Leaf(existing) => {
                    children[slot] = Child::Node(Arc::new(merge(existing, entry, shift + BITS)));
                    None
                }
                Child::Node(child) => {
                    let (child, displaced) = insert_at(&child, shift + BITS, hash, entry);
                    children[slot] = Child::Node(Arc::new(child));
                    displaced
                }
            };
            (
                Node::Branch {
                    bitmap: *bitmap,
                    children,
                },
                displaced,
            )
        }
    }
}

/// Subtree holding two entries whose hashes agree on every level above `shift`
fn merge(a: Entry, b: Entry, shift: u32) -> Node {
    if shift >= u64::BITS {
        return Node::Collision(vec![a, b]);
    }
    let bit_a = bit_for(a.contract().hash_code(), shift);
    let bit_b = bit_for(b.contract().hash_code(), shift);
    if bit_a == bit_b {
        return Node::Branch {
            bitmap: bit_a,
            children: vec![Child::Node(Arc::new(merge(a, b, shift + BITS)))],
        };
    }
    let children = if bit_a < bit_b {
        vec![Child::Leaf(a), Child::Leaf(b)]
    } else {
        vec![Child::Leaf(b), Child::Leaf(a)]
    };
    Node::Branch {
        bitmap: bit_a | bit_b,
        children,
    }
}

fn collect(node: &Node, out: &mut Vec<Entry>) {
    match node {
        Node::Collision(entries) => out.extend(entries.iter().cloned()),
        Node::Branch { children, .. } => {
            for child in children {
                match child {
                    Child::Leaf(entry) => out.push(Arc::clone(entry)),
                    Child::Node(node) => collect(node, out),
                }
            }
        }
    }
}
