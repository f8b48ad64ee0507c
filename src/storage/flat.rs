//! Open-addressed table with linear probing
//!
//! Capacity is a power of two and the load factor stays below 3/4, so a
//! probe sequence always reaches an empty slot. Entries are never removed
//! (re-registration replaces in place), so no tombstones are needed.

use super::Entry;
use crate::contract::Contract;

const MIN_CAPACITY: usize = 8;

#[derive(Clone, Default)]
pub(crate) struct FlatTable {
    slots: Vec<Option<Entry>>,
    len: usize,
}

impl FlatTable {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn get(&self, contract: &Contract) -> Option<&Entry> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut index = contract.hash_code() as usize & mask;
        loop {
            match &self.slots[index] {
                None => return None,
                Some(entry) if entry.contract() == contract => return Some(entry),
                Some(_) => index = (index + 1) & mask,
            }
        }
    }

    /// Store `entry`; returns the entry it displaced
    pub(crate) fn insert(&mut self, entry: Entry) -> Option<Entry> {
        if (self.len + 1) * 4 > self.slots.len() * 3 {
            self.grow();
        }
        let mask = self.slots.len() - 1;
        let mut index = entry.contract().hash_code() as usize & mask;
        loop {
            match &self.slots[index] {
                None => {
                    self.slots[index] = Some(entry);
                    self.len += 1;
                    return None;
                }
                Some(existing) if existing.contract() == entry.contract() => {
                    return self.slots[index].replace(entry);
                }
                Some(_) => index = (index + 1) & mask,
            }
        }
    }

    fn grow(&mut self) {
        let capacity = (self.slots.len() * 2).max(MIN_CAPACITY);
        let old = std::mem::replace(&mut self.slots, vec![None; capacity]);
        self.len = 0;
        for entry in old.into_iter().flatten() {
            self.insert(entry);
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::entry;
    use std::sync::Arc;

    #[test]
    fn test_grows_and_finds_everything() {
        let mut table = FlatTable::default();
        let entries: Vec<Entry> = (0..50).map(|i| entry(&format!("f{}", i))).collect();
        for e in &entries {
            assert!(table.insert(Arc::clone(e)).is_none());
        }
        assert_eq!(table.len(), 50);
        for e in &entries {
            assert!(Arc::ptr_eq(table.get(e.contract()).unwrap(), e));
        }
        assert_eq!(table.iter().count(), 50);
    }

    #[test]
    fn test_replace_in_place() {
        let mut table = FlatTable::default();
        let first = entry("x");
        let second = entry("x");
        table.insert(Arc::clone(&first));
        let displaced = table.insert(Arc::clone(&second)).unwrap();

        assert!(Arc::ptr_eq(&displaced, &first));
        assert_eq!(table.len(), 1);
        assert!(Arc::ptr_eq(table.get(second.contract()).unwrap(), &second));
    }

    #[test]
    fn test_empty_table_lookup() {
        let table = FlatTable::default();
        assert!(table.get(entry("missing").contract()).is_none());
    }
}
