//! The hybrid array/hash table that backs every Lua table value.
//!
//! Positive integer keys starting at 1 live in a dense `Vec` (the "array
//! part"); everything else — floats, strings, booleans, other tables, holes
//! past the array's dense prefix — lives in a hash map (the "hash part").
//! This mirrors how real Lua tables get O(1) `ipairs`/`#t` behavior for the
//! common sequence case while still supporting arbitrary keys.

use ahash::AHashMap;

use crate::gc::TableId;
use crate::value::LuaValue;

#[derive(Default)]
pub struct LuaTable {
    array: Vec<LuaValue>,
    hash: AHashMap<LuaValue, LuaValue>,
    pub metatable: Option<TableId>,
    /// `__mode` on the metatable: weak keys, weak values, both, or neither.
    /// The collector consults this during the atomic phase; the table itself
    /// never drops entries on its own.
    pub weak_keys: bool,
    pub weak_values: bool,
}

impl LuaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(array_hint: usize, hash_hint: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(array_hint),
            hash: AHashMap::with_capacity(hash_hint),
            metatable: None,
            weak_keys: false,
            weak_values: false,
        }
    }

    fn array_index(key: &LuaValue) -> Option<usize> {
        key.as_integer().and_then(|i| {
            if i >= 1 { usize::try_from(i - 1).ok() } else { None }
        })
    }

    pub fn get(&self, key: &LuaValue) -> LuaValue {
        if key.is_nil() {
            return LuaValue::nil();
        }
        if let Some(idx) = Self::array_index(key) {
            if let Some(v) = self.array.get(idx) {
                return *v;
            }
        }
        self.hash.get(key).copied().unwrap_or(LuaValue::nil())
    }

    /// Raw set, no metamethods. Setting a key to `nil` removes it; assigning
    /// at exactly `array.len()` (the "next" index) grows the array part and
    /// then migrates any now-contiguous hash entries into it.
    pub fn set(&mut self, key: LuaValue, value: LuaValue) {
        if let Some(idx) = Self::array_index(&key) {
            if idx < self.array.len() {
                self.array[idx] = value;
                if value.is_nil() && idx == self.array.len() - 1 {
                    self.shrink_array_tail();
                }
                return;
            }
            if idx == self.array.len() && !value.is_nil() {
                self.array.push(value);
                self.migrate_from_hash();
                return;
            }
        }
        if value.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, value);
        }
    }

    /// After an append grows the array part, pull in any hash entries whose
    /// integer key is now the array's next contiguous index.
    fn migrate_from_hash(&mut self) {
        loop {
            let next_key = LuaValue::integer(self.array.len() as i64 + 1);
            match self.hash.remove(&next_key) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    fn shrink_array_tail(&mut self) {
        while matches!(self.array.last(), Some(v) if v.is_nil()) {
            self.array.pop();
        }
    }

    /// Lua's `#t`: any "border" is a valid answer when the table has holes,
    /// so for a dense array part with no trailing hole this is just its
    /// length; ties are broken in favor of the array part per spec.
    pub fn length(&self) -> i64 {
        self.array.len() as i64
    }

    /// Iteration order for `next`: array part first (in index order), then
    /// hash part (in map-internal order, stable only while the table is not
    /// mutated — matching Lua's "undefined order, but `next` still works"
    /// contract as long as no unvisited key is removed mid-traversal).
    pub fn next_key(&self, key: &LuaValue) -> Option<(LuaValue, LuaValue)> {
        if key.is_nil() {
            return self.first_entry();
        }
        if let Some(idx) = Self::array_index(key) {
            if idx < self.array.len() {
                return self.entry_after_array_index(idx);
            }
        }
        let mut keys = self.hash.keys();
        for k in keys.by_ref() {
            if k == key {
                break;
            }
        }
        keys.next().map(|k| (*k, self.hash[k]))
    }

    fn first_entry(&self) -> Option<(LuaValue, LuaValue)> {
        self.entry_after_array_index(usize::MAX).or_else(|| {
            self.hash.iter().next().map(|(k, v)| (*k, *v))
        })
    }

    fn entry_after_array_index(&self, idx: usize) -> Option<(LuaValue, LuaValue)> {
        let start = idx.wrapping_add(1);
        if start == 0 {
            // idx was usize::MAX: "before the beginning"
            return self.array.iter().enumerate().find(|(_, v)| !v.is_nil()).map(|(i, v)| {
                (LuaValue::integer(i as i64 + 1), *v)
            }).or_else(|| self.hash.iter().next().map(|(k, v)| (*k, *v)));
        }
        for i in start..self.array.len() {
            if !self.array[i].is_nil() {
                return Some((LuaValue::integer(i as i64 + 1), self.array[i]));
            }
        }
        self.hash.iter().next().map(|(k, v)| (*k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.array.iter().all(|v| v.is_nil()) && self.hash.is_empty()
    }

    pub fn array_part(&self) -> &[LuaValue] {
        &self.array
    }

    pub fn hash_part(&self) -> &AHashMap<LuaValue, LuaValue> {
        &self.hash
    }

    /// Drop entries whose weakly-held side (key, value, or both per
    /// `weak_keys`/`weak_values`) has gone white-and-unreachable. Called from
    /// the collector's sweep phase, once per weak table, with `is_dead`
    /// answering "is this GC object white" for the current sweep generation.
    pub fn remove_weak_entries(&mut self, weak_keys: bool, weak_values: bool, is_dead: impl Fn(&LuaValue) -> bool) {
        if !weak_keys && !weak_values {
            return;
        }
        if weak_values {
            for v in self.array.iter_mut() {
                if !v.is_nil() && is_dead(v) {
                    *v = LuaValue::nil();
                }
            }
            self.shrink_array_tail();
        }
        self.hash.retain(|k, v| {
            if weak_keys && is_dead(k) {
                return false;
            }
            if weak_values && is_dead(v) {
                return false;
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_append_and_length() {
        let mut t = LuaTable::new();
        t.set(LuaValue::integer(1), LuaValue::integer(10));
        t.set(LuaValue::integer(2), LuaValue::integer(20));
        assert_eq!(t.length(), 2);
        assert_eq!(t.get(&LuaValue::integer(1)).as_integer(), Some(10));
    }

    #[test]
    fn hash_part_for_non_sequence_keys() {
        let mut t = LuaTable::new();
        t.set(LuaValue::integer(5), LuaValue::integer(50));
        assert_eq!(t.length(), 0, "key 5 with no 1..4 stays in the hash part");
        assert_eq!(t.get(&LuaValue::integer(5)).as_integer(), Some(50));
    }

    #[test]
    fn hash_entries_migrate_into_array_on_contiguous_append() {
        let mut t = LuaTable::new();
        t.set(LuaValue::integer(2), LuaValue::integer(20));
        t.set(LuaValue::integer(1), LuaValue::integer(10));
        assert_eq!(t.length(), 2);
    }

    #[test]
    fn nil_assignment_removes_key() {
        let mut t = LuaTable::new();
        t.set(LuaValue::integer(1), LuaValue::integer(10));
        t.set(LuaValue::integer(1), LuaValue::nil());
        assert!(t.get(&LuaValue::integer(1)).is_nil());
        assert!(t.is_empty());
    }

    #[test]
    fn next_visits_every_entry_exactly_once() {
        let mut t = LuaTable::new();
        t.set(LuaValue::integer(1), LuaValue::integer(1));
        t.set(LuaValue::integer(2), LuaValue::integer(2));
        t.set(LuaValue::integer(100), LuaValue::integer(100));

        let mut seen = std::collections::HashSet::new();
        let mut key = LuaValue::nil();
        while let Some((k, _v)) = t.next_key(&key) {
            assert!(seen.insert(k.as_integer()), "next repeated a key");
            key = k;
        }
        assert_eq!(seen.len(), 3);
    }
}
