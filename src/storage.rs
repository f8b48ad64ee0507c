//! Registration storage for one scope
//!
//! Readers never lock: the current table is published as an immutable
//! [`Snapshot`] through `ArcSwap`, so a lookup is one atomic load plus a
//! probe. Writers serialize on a per-scope lock, copy the table (or the
//! affected trie path), and publish the new snapshot with a bumped version.
//!
//! Small scopes use an open-addressed [`FlatTable`]; once a scope outgrows
//! the configured limit its table is promoted to a [`HashTrie`] so that
//! copy-on-write stays proportional to the trie depth, not the table size.

mod flat;
mod trie;

pub(crate) use flat::FlatTable;
pub(crate) use trie::HashTrie;

use crate::contract::Contract;
use crate::registration::RegistrationManager;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// A stored registration
pub(crate) type Entry = Arc<RegistrationManager>;

/// Default number of registrations a scope keeps in a flat table
pub const DEFAULT_FLAT_LIMIT: usize = 32;

#[derive(Clone)]
pub(crate) enum Table {
    Flat(FlatTable),
    Trie(HashTrie),
}

impl Table {
    #[inline]
    pub(crate) fn get(&self, contract: &Contract) -> Option<&Entry> {
        match self {
            Table::Flat(flat) => flat.get(contract),
            Table::Trie(trie) => trie.get(contract),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        match self {
            Table::Flat(flat) => flat.len(),
            Table::Trie(trie) => trie.len(),
        }
    }

    #[inline]
    pub(crate) fn is_trie(&self) -> bool {
        matches!(self, Table::Trie(_))
    }

    /// New table with `entry` stored; the displaced entry, if any
    fn with(&self, entry: Entry, flat_limit: usize) -> (Table, Option<Entry>) {
        match self {
            Table::Flat(flat) if flat.get(entry.contract()).is_none() && flat.len() >= flat_limit => {
                #[cfg(feature = "logging")]
                trace!(
                    target: "injector_runtime",
                    entries = flat.len() + 1,
                    "Promoting scope table to hash trie"
                );

                let mut trie = HashTrie::default();
                for existing in flat.iter() {
                    trie = trie.insert(Arc::clone(existing)).0;
                }
                let (trie, displaced) = trie.insert(entry);
                (Table::Trie(trie), displaced)
            }
            Table::Flat(flat) => {
                let mut next = flat.clone();
                let displaced = next.insert(entry);
                (Table::Flat(next), displaced)
            }
            Table::Trie(trie) => {
                let (next, displaced) = trie.insert(entry);
                (Table::Trie(next), displaced)
            }
        }
    }

    /// Every entry, in registration order
    pub(crate) fn entries(&self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = match self {
            Table::Flat(flat) => flat.iter().cloned().collect(),
            Table::Trie(trie) => trie.entries(),
        };
        entries.sort_by_key(|e| e.id());
        entries
    }
}

/// An immutable, versioned view of a scope's registrations
pub(crate) struct Snapshot {
    pub(crate) version: u64,
    pub(crate) table: Table,
}

/// Versioned registration table of one scope
pub(crate) struct RegistrationStore {
    current: ArcSwap<Snapshot>,
    write: Mutex<()>,
    flat_limit: usize,
}

impl RegistrationStore {
    pub(crate) fn new(flat_limit: usize) -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot {
                version: 0,
                table: Table::Flat(FlatTable::default()),
            }),
            write: Mutex::new(()),
            flat_limit,
        }
    }

    /// Lock-free lookup in this scope only
    #[inline]
    pub(crate) fn get(&self, contract: &Contract) -> Option<Entry> {
        self.current.load().table.get(contract).cloned()
    }

    /// Store `entry`, replacing any registration for the same contract
    pub(crate) fn insert(&self, entry: Entry) -> Option<Entry> {
        let _write = self.write.lock();
        self.publish(entry)
    }

    /// Store `entry` unless the contract already has a registration;
    /// returns whichever registration ends up stored
    pub(crate) fn insert_if_absent(&self, entry: Entry) -> Entry {
        let _write = self.write.lock();
        if let Some(existing) = self.get(entry.contract()) {
            return existing;
        }
        self.publish(Arc::clone(&entry));
        entry
    }

    /// Replace the registration with id `stale` (or fill an empty slot);
    /// returns whichever registration ends up stored
    pub(crate) fn replace_stale(&self, stale: u64, entry: Entry) -> Entry {
        let _write = self.write.lock();
        match self.get(entry.contract()) {
            Some(existing) if existing.id() != stale => existing,
            _ => {
                self.publish(Arc::clone(&entry));
                entry
            }
        }
    }

    /// Must be called with the write lock held
    fn publish(&self, entry: Entry) -> Option<Entry> {
        let current = self.current.load_full();
        let (table, displaced) = current.table.with(entry, self.flat_limit);
        self.current.store(Arc::new(Snapshot {
            version: current.version + 1,
            table,
        }));
        displaced
    }

    #[inline]
    pub(crate) fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    #[inline]
    pub(crate) fn version(&self) -> u64 {
        self.current.load().version
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.current.load().table.len()
    }
}

impl fmt::Debug for RegistrationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.current.load();
        f.debug_struct("RegistrationStore")
            .field("version", &snapshot.version)
            .field("count", &snapshot.table.len())
            .field("trie", &snapshot.table.is_trie())
            .finish()
    }
}
