//! Open-addressed hash table keyed by interned strings.
//!
//! One implementation backs the VM's globals, the string-intern set, every
//! class's method table, and every instance's field table. Linear probing
//! with tombstones, grown at a 3/4 load factor.
//!
//! The one subtlety worth a comment: a tombstone is `key: None, value:
//! Bool(true)`; a truly empty slot is `key: None, value: Nil`. Both have a
//! `None` key, so "empty" must be decided by inspecting the value, never by
//! treating `None` alone as fully-empty -- that's what `find_entry` and
//! `delete` below guard against.

use crate::common::object::{hash_string, StringObj};
use crate::common::value::Value;

const MAX_LOAD: f64 = 0.75;

#[derive(Clone)]
struct Entry {
    key: Option<*mut StringObj>,
    value: Value,
}

pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Self {
            count: 0,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, key: *mut StringObj) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self.find_entry_index(key);
        let entry = &self.entries[idx];
        entry.key.map(|_| entry.value)
    }

    /// Returns `true` if this inserted a new key (didn't overwrite one).
    pub fn set(&mut self, key: *mut StringObj, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            self.grow();
        }
        let idx = self.find_entry_index(key);
        let entry = &mut self.entries[idx];
        let is_new_key = entry.key.is_none();
        // Only a brand-new empty slot (value still Nil, not a tombstone)
        // grows the live-entry count -- reusing a tombstone must not.
        if is_new_key && matches!(entry.value, Value::Nil) {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    pub fn delete(&mut self, key: *mut StringObj) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = self.find_entry_index(key);
        let entry = &mut self.entries[idx];
        if entry.key.is_none() {
            return false;
        }
        // Tombstone: key None, value Bool(true) -- distinguishes "empty"
        // from "was here, keep probing past me".
        entry.key = None;
        entry.value = Value::Bool(true);
        true
    }

    pub fn add_all(&mut self, from: &Table) {
        for entry in &from.entries {
            if let Some(key) = entry.key {
                self.set(key, entry.value);
            }
        }
    }

    /// Used only by the intern table: looks a string up by its *content*
    /// (chars + hash) rather than by pointer identity, since the whole
    /// point is deciding whether such a pointer already exists.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<*mut StringObj> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    // Stop only on a true empty slot, not a tombstone.
                    if matches!(entry.value, Value::Nil) {
                        return None;
                    }
                }
                Some(key_ptr) => {
                    let key = unsafe { &(*key_ptr).data };
                    if key.hash == hash && key.chars == chars {
                        return Some(key_ptr);
                    }
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Removes every entry whose key string is unmarked. Called by the GC
    /// sweep right before it frees unreachable strings, since the intern
    /// table is a weak root over its keys.
    pub fn remove_white(&mut self) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                let marked = unsafe { (*key).mark };
                if !marked {
                    entry.key = None;
                    entry.value = Value::Bool(true);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut StringObj, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    fn find_entry_index(&self, key: *mut StringObj) -> usize {
        let capacity = self.entries.len();
        let hash = unsafe { (*key).data.hash };
        let mut index = (hash as usize) & (capacity - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if matches!(entry.value, Value::Nil) {
                        // Truly empty: reuse an earlier tombstone if we
                        // passed one, otherwise this slot.
                        return first_tombstone.unwrap_or(index);
                    } else if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Some(k) if std::ptr::eq(k, key) => return index,
                Some(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() {
            8
        } else {
            self.entries.len() * 2
        };
        let old_entries = std::mem::replace(
            &mut self.entries,
            vec![
                Entry {
                    key: None,
                    value: Value::Nil,
                };
                new_capacity
            ],
        );
        self.count = 0;
        for entry in old_entries {
            if let Some(key) = entry.key {
                self.set(key, entry.value);
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience used by the compiler/heap when hashing a `&str` it hasn't
/// interned yet (e.g. checking the intern table before allocating).
pub fn hash_of(s: &str) -> u32 {
    hash_string(s)
}
