//! Open-addressing name index
//!
//! Shared by environment frames and object field tables: a DJB2-hashed,
//! linear-probing index mapping names to positions in a parallel binding
//! vector. Slots hold the binding position or `EMPTY`.
//!
//! The index never stores names itself; collisions are resolved by
//! comparing against the caller's name vector. Deletion rebuilds the whole
//! index (objects delete fields rarely; environments never evict).

use rill_core::Name;

const EMPTY: i32 = -1;

/// Minimum slot count; keeps tiny frames from probing a 1-slot table.
const MIN_SLOTS: usize = 16;

/// DJB2 over the name's bytes.
#[inline]
pub fn djb2(name: &str) -> u64 {
    let mut hash: u64 = 5381;
    for &b in name.as_bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(u64::from(b));
    }
    hash
}

#[derive(Debug, Clone)]
pub struct HashIndex {
    slots: Vec<i32>,
}

impl HashIndex {
    /// Create an index able to hold `bindings` entries at less than half
    /// load.
    pub fn with_capacity(bindings: usize) -> Self {
        let n = (bindings * 2).max(MIN_SLOTS);
        HashIndex {
            slots: vec![EMPTY; n],
        }
    }

    /// Build an index over an existing name vector.
    pub fn build(names: &[Name]) -> Self {
        let mut idx = HashIndex::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            idx.insert_unchecked(name, i);
        }
        idx
    }

    /// True when inserting one more binding would exceed half load; the
    /// caller should rebuild with doubled capacity.
    pub fn needs_grow(&self, bindings: usize) -> bool {
        (bindings + 1) * 2 > self.slots.len()
    }

    /// Insert a binding position. The caller guarantees `name` is not
    /// already present.
    pub fn insert_unchecked(&mut self, name: &str, binding: usize) {
        let mask = self.slots.len();
        let mut pos = (djb2(name) as usize) % mask;
        while self.slots[pos] != EMPTY {
            pos = (pos + 1) % mask;
        }
        self.slots[pos] = binding as i32;
    }

    /// Find the binding position for `name`, probing until an empty slot.
    pub fn lookup(&self, name: &str, names: &[Name]) -> Option<usize> {
        let mask = self.slots.len();
        let mut pos = (djb2(name) as usize) % mask;
        loop {
            let slot = self.slots[pos];
            if slot == EMPTY {
                return None;
            }
            let i = slot as usize;
            if names[i].as_ref() == name {
                return Some(i);
            }
            pos = (pos + 1) % mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn names(list: &[&str]) -> Vec<Name> {
        list.iter().map(|s| Arc::from(*s)).collect()
    }

    #[test]
    fn test_djb2_known_values() {
        // djb2("") is the initial basis
        assert_eq!(djb2(""), 5381);
        assert_ne!(djb2("a"), djb2("b"));
    }

    #[test]
    fn test_lookup_roundtrip() {
        let ns = names(&["alpha", "beta", "gamma"]);
        let idx = HashIndex::build(&ns);
        assert_eq!(idx.lookup("alpha", &ns), Some(0));
        assert_eq!(idx.lookup("beta", &ns), Some(1));
        assert_eq!(idx.lookup("gamma", &ns), Some(2));
        assert_eq!(idx.lookup("delta", &ns), None);
    }

    #[test]
    fn test_grow_threshold() {
        let idx = HashIndex::with_capacity(4);
        // capacity 4 -> 16 slots (MIN_SLOTS); 7 bindings still fit half load
        assert!(!idx.needs_grow(6));
        assert!(idx.needs_grow(8));
    }

    #[test]
    fn test_collisions_probe_linearly() {
        // Many names, small table: forces probe chains through rebuilds.
        let list: Vec<String> = (0..64).map(|i| format!("name_{i}")).collect();
        let ns: Vec<Name> = list.iter().map(|s| Arc::from(s.as_str())).collect();
        let idx = HashIndex::build(&ns);
        for (i, n) in list.iter().enumerate() {
            assert_eq!(idx.lookup(n, &ns), Some(i));
        }
    }
}
