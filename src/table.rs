// File: src/table.rs
//
// Table — an open-addressed hash map from interned strings to `Value`,
// with linear probing and tombstone deletes (§4.4). Used for globals,
// class method tables, instance field tables, and (through `StringInterner`)
// the VM's string-interning set.
//
// This is hand-rolled rather than `std::collections::HashMap` because the
// probing discipline — in particular `find_string`, which compares by
// `(hash, length, bytes)` instead of by key identity — is what lets the VM
// canonicalize string literals during interning. A library hashmap keyed on
// `ObjRef` identity can't locate "the String with these bytes" before one
// exists.

use crate::gc::{Heap, ObjRef};
use crate::value::Value;

const MAX_LOAD_FACTOR: f64 = 0.75;
const MIN_CAPACITY: usize = 8;

#[derive(Clone)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(ObjRef, Value),
}

/// Open-addressed hash table keyed by interned-string handles.
pub struct Table {
    entries: Vec<Slot>,
    count: usize, // occupied + tombstones, used for the load-factor check
    live_count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Table {
            entries: Vec::new(),
            count: 0,
            live_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Probes from `hash mod capacity`, returning the index of either the
    /// matching live entry, or the first open slot for a new insert (a
    /// tombstone if one was seen en route, otherwise the terminating empty
    /// slot) — per §4.4's `findEntry`.
    fn find_entry(&self, key: ObjRef, hash: u32, heap: &Heap) -> usize {
        let capacity = self.capacity();
        let mut index = (hash as usize) % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            match &self.entries[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) => {
                    if *k == key || strings_equal(*k, key, heap) {
                        return index;
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    fn adjust_capacity(&mut self, new_capacity: usize, heap: &Heap) {
        let mut new_entries: Vec<Slot> = (0..new_capacity).map(|_| Slot::Empty).collect();
        let mut live_count = 0;
        for slot in self.entries.drain(..) {
            if let Slot::Occupied(key, value) = slot {
                let hash = heap
                    .get(key)
                    .as_string()
                    .expect("table keys are always interned strings")
                    .hash;
                let mut index = (hash as usize) % new_capacity;
                loop {
                    if matches!(new_entries[index], Slot::Empty) {
                        new_entries[index] = Slot::Occupied(key, value);
                        break;
                    }
                    index = (index + 1) % new_capacity;
                }
                live_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = live_count;
        self.live_count = live_count;
    }

    fn ensure_capacity(&mut self, heap: &Heap) {
        if self.entries.is_empty() {
            self.adjust_capacity(MIN_CAPACITY, heap);
            return;
        }
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.adjust_capacity(self.capacity() * 2, heap);
        }
    }

    /// Inserts or overwrites `key -> value`. Returns `true` iff `key` was
    /// not already present (§4.4).
    pub fn set(&mut self, key: ObjRef, value: Value, heap: &Heap) -> bool {
        self.ensure_capacity(heap);
        let hash = heap.get(key).as_string().expect("interned string key").hash;
        let index = self.find_entry(key, hash, heap);
        let is_new = !matches!(self.entries[index], Slot::Occupied(..));
        if is_new && matches!(self.entries[index], Slot::Empty) {
            self.count += 1;
        }
        if is_new {
            self.live_count += 1;
        }
        self.entries[index] = Slot::Occupied(key, value);
        is_new
    }

    pub fn get(&self, key: ObjRef, heap: &Heap) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let hash = heap.get(key).as_string().expect("interned string key").hash;
        match &self.entries[self.find_entry(key, hash, heap)] {
            Slot::Occupied(_, value) => Some(*value),
            _ => None,
        }
    }

    /// Writes a tombstone (`key = none, value = Bool(true)`) over `key`'s
    /// slot so later probes keep walking past it (§4.4).
    pub fn delete(&mut self, key: ObjRef, heap: &Heap) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let hash = heap.get(key).as_string().expect("interned string key").hash;
        let index = self.find_entry(key, hash, heap);
        if matches!(self.entries[index], Slot::Occupied(..)) {
            self.entries[index] = Slot::Tombstone;
            self.live_count -= 1;
            true
        } else {
            false
        }
    }

    /// Separate probe used only during interning: locates an existing
    /// canonical string by `(hash, length, bytes)` rather than by handle
    /// identity, since at this point no handle for `text` exists yet
    /// (§4.4's `tableFindString`).
    pub fn find_string(&self, text: &str, hash: u32, heap: &Heap) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        let mut index = (hash as usize) % capacity;
        loop {
            match &self.entries[index] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied(key, _) => {
                    let s = heap.get(*key).as_string().expect("interned string key");
                    if s.hash == hash && s.value == text {
                        return Some(*key);
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// Iterates all live `(key, value)` pairs — used by the GC to mark a
    /// globals/methods/fields table's contents, and by the VM to prune
    /// white interned strings after a collection.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries.iter().filter_map(|slot| match slot {
            Slot::Occupied(key, value) => Some((*key, *value)),
            _ => None,
        })
    }

    /// Removes every entry whose key is in `dead`, used to prune white
    /// strings from the intern table before their memory is reclaimed
    /// (§4.6's "remove white interned strings" step — correctness requires
    /// this to run strictly before `Heap::sweep` frees the slot).
    pub fn remove_keys(&mut self, dead: &[ObjRef]) {
        for slot in self.entries.iter_mut() {
            if let Slot::Occupied(key, _) = slot {
                if dead.contains(key) {
                    *slot = Slot::Tombstone;
                    self.live_count -= 1;
                }
            }
        }
    }
}

fn strings_equal(a: ObjRef, b: ObjRef, heap: &Heap) -> bool {
    let sa = heap.get(a).as_string();
    let sb = heap.get(b).as_string();
    match (sa, sb) {
        (Some(sa), Some(sb)) => sa.hash == sb.hash && sa.value == sb.value,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Obj, ObjString};

    #[test]
    fn set_get_delete_round_trip() {
        let mut heap = Heap::new();
        let key = heap.allocate(Obj::String(ObjString::new("x".into())));
        let mut table = Table::new();
        assert!(table.set(key, Value::Number(1.0), &heap));
        assert!(!table.set(key, Value::Number(2.0), &heap));
        assert_eq!(table.get(key, &heap).unwrap().as_number(), Some(2.0));
        assert!(table.delete(key, &heap));
        assert!(table.get(key, &heap).is_none());
        assert!(!table.delete(key, &heap));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let mut keys = Vec::new();
        for i in 0..64 {
            let k = heap.allocate(Obj::String(ObjString::new(format!("k{i}"))));
            keys.push(k);
            table.set(k, Value::Number(i as f64), &heap);
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(table.get(*k, &heap).unwrap().as_number(), Some(i as f64));
        }
    }
}
