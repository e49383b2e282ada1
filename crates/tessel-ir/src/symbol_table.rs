//! Per-scope symbol table with deterministic name uniquing.
//!
//! A table maps the hash of a name to the value that owns it. Two names are
//! considered equal when their hashes are equal, so a hash collision between
//! different strings is handled exactly like a real name clash: the newcomer
//! is renamed. Renaming appends `<separator><counter>` where the counter is
//! shared by every rename in the scope and only ever grows.
//!
//! Hashing uses `rustc_hash::FxHasher`, which is deterministic within a
//! compilation session. Hashes are never persisted.

use std::collections::hash_map::Entry;
use std::hash::BuildHasher;

use rustc_hash::{FxBuildHasher, FxHashMap};
use tracing::trace;

use crate::refs::ValueRef;

/// Hash a name the way every scope in an `IrContext` does.
pub fn name_hash(name: &str) -> u64 {
    FxBuildHasher.hash_one(name)
}

/// Name-to-value mapping for one naming scope (a function or a module).
pub struct SymbolTable<S = FxBuildHasher> {
    entries: FxHashMap<u64, ValueRef>,
    last_unique: u32,
    separator: String,
    hasher: S,
}

impl SymbolTable {
    pub fn new(separator: impl Into<String>) -> Self {
        Self::with_hasher(separator, FxBuildHasher)
    }
}

impl<S: BuildHasher> SymbolTable<S> {
    pub fn with_hasher(separator: impl Into<String>, hasher: S) -> Self {
        Self {
            entries: FxHashMap::default(),
            last_unique: 0,
            separator: separator.into(),
            hasher,
        }
    }

    pub fn hash_name(&self, name: &str) -> u64 {
        self.hasher.hash_one(name)
    }

    /// Register `value` under `proposed`, returning the name actually used.
    ///
    /// The proposed name is returned unchanged when its hash is free in this
    /// scope; otherwise a suffixed variant is derived.
    pub fn create_name(&mut self, proposed: &str, value: ValueRef) -> String {
        let hash = self.hash_name(proposed);
        if let Entry::Vacant(slot) = self.entries.entry(hash) {
            slot.insert(value);
            return proposed.to_owned();
        }
        self.make_unique(proposed, value).0
    }

    /// Register `value` under the name it already carries, renaming it in
    /// place on collision. Returns the hash of the final name.
    pub fn reinsert(&mut self, name: &mut String, value: ValueRef) -> u64 {
        let hash = self.hash_name(name);
        if let Entry::Vacant(slot) = self.entries.entry(hash) {
            slot.insert(value);
            return hash;
        }
        let (unique, hash) = self.make_unique(name, value);
        *name = unique;
        hash
    }

    /// Erase the entry for `hash`, returning the value it belonged to.
    pub fn remove(&mut self, hash: u64) -> Option<ValueRef> {
        self.entries.remove(&hash)
    }

    pub fn lookup(&self, name: &str) -> Option<ValueRef> {
        self.lookup_hash(self.hash_name(name))
    }

    pub fn lookup_hash(&self, hash: u64) -> Option<ValueRef> {
        self.entries.get(&hash).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest counter handed out so far.
    pub fn last_unique(&self) -> u32 {
        self.last_unique
    }

    /// `(hash, value)` entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, ValueRef)> + '_ {
        self.entries.iter().map(|(&hash, &value)| (hash, value))
    }

    /// Registered values, sorted by id.
    pub fn values(&self) -> Vec<ValueRef> {
        let mut values: Vec<ValueRef> = self.entries.values().copied().collect();
        values.sort_unstable();
        values
    }

    fn make_unique(&mut self, base: &str, value: ValueRef) -> (String, u64) {
        let mut candidate = String::with_capacity(base.len() + self.separator.len() + 4);
        loop {
            self.last_unique += 1;
            candidate.clear();
            candidate.push_str(base);
            candidate.push_str(&self.separator);
            candidate.push_str(&self.last_unique.to_string());

            let hash = self.hash_name(&candidate);
            if let Entry::Vacant(slot) = self.entries.entry(hash) {
                slot.insert(value);
                trace!(base, unique = %candidate, "uniqued colliding symbol");
                return (candidate, hash);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, hash: u64, value: ValueRef) {
        self.entries.insert(hash, value);
    }
}

#[cfg(test)]
mod tests {
    use std::hash::Hasher;

    use cranelift_entity::EntityRef;

    use super::*;

    /// Hashes a string to its byte length, so equal-length names collide.
    #[derive(Clone, Copy, Default)]
    struct LengthHasher(u64);

    impl Hasher for LengthHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            self.0 += bytes.len() as u64;
        }
    }

    #[derive(Clone, Copy, Default)]
    struct LengthBuildHasher;

    impl BuildHasher for LengthBuildHasher {
        type Hasher = LengthHasher;

        fn build_hasher(&self) -> LengthHasher {
            LengthHasher::default()
        }
    }

    fn v(n: usize) -> ValueRef {
        ValueRef::new(n)
    }

    #[test]
    fn free_name_is_kept() {
        let mut table = SymbolTable::new(".");
        assert_eq!(table.create_name("x", v(0)), "x");
        assert_eq!(table.lookup("x"), Some(v(0)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn collisions_get_distinct_suffixes() {
        let mut table = SymbolTable::new(".");
        let first = table.create_name("x", v(0));
        let second = table.create_name("x", v(1));
        let third = table.create_name("x", v(2));
        assert_eq!(first, "x");
        assert_eq!(second, "x.1");
        assert_eq!(third, "x.2");
        assert_eq!(table.lookup("x.1"), Some(v(1)));
        assert_eq!(table.lookup("x.2"), Some(v(2)));
    }

    #[test]
    fn counter_is_shared_across_names_and_never_reused() {
        let mut table = SymbolTable::new(".");
        table.create_name("a", v(0));
        table.create_name("b", v(1));
        assert_eq!(table.create_name("a", v(2)), "a.1");
        assert_eq!(table.create_name("b", v(3)), "b.2");

        // Freeing `a.1` does not rewind the counter.
        table.remove(table.hash_name("a.1"));
        assert_eq!(table.create_name("a", v(4)), "a.3");
        assert_eq!(table.last_unique(), 3);
    }

    #[test]
    fn suffix_skips_names_already_taken() {
        let mut table = SymbolTable::new(".");
        table.create_name("x", v(0));
        table.create_name("x.1", v(1));
        assert_eq!(table.create_name("x", v(2)), "x.2");
    }

    #[test]
    fn reinsert_renames_in_place() {
        let mut table = SymbolTable::new(".");
        table.create_name("tmp", v(0));

        let mut name = "tmp".to_owned();
        let hash = table.reinsert(&mut name, v(1));
        assert_eq!(name, "tmp.1");
        assert_eq!(hash, table.hash_name("tmp.1"));
        assert_eq!(table.lookup_hash(hash), Some(v(1)));
    }

    #[test]
    fn remove_by_hash() {
        let mut table = SymbolTable::new(".");
        table.create_name("x", v(7));
        let hash = table.hash_name("x");
        assert_eq!(table.remove(hash), Some(v(7)));
        assert_eq!(table.remove(hash), None);
        assert!(table.is_empty());
    }

    #[test]
    fn hash_collision_between_different_names_renames() {
        let mut table = SymbolTable::with_hasher(".", LengthBuildHasher);
        assert_eq!(table.create_name("ab", v(0)), "ab");
        // "cd" hashes like "ab", so it is treated as taken.
        assert_eq!(table.create_name("cd", v(1)), "cd.1");
        assert_eq!(table.lookup("ab"), Some(v(0)));
        assert_eq!(table.lookup("cd.1"), Some(v(1)));
    }

    #[test]
    fn custom_separator() {
        let mut table = SymbolTable::new("_");
        table.create_name("x", v(0));
        assert_eq!(table.create_name("x", v(1)), "x_1");
    }
}
