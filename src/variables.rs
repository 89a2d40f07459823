//! Variable storage.
//!
//! The interpreter addresses variables only as `(storage, slot)`; naming and
//! persistence belong to whoever provides the storage.

use log::warn;
use std::fmt;

pub trait VariableStorage: fmt::Debug {
    /// Current value of a slot; unset slots read as `None`
    fn get(&self, slot: u32) -> Option<&str>;

    /// Replace the value of a slot. False when the slot does not exist.
    fn set(&mut self, slot: u32, value: &str) -> bool;

    /// Append to the value of a slot. False when the slot does not exist.
    fn append(&mut self, slot: u32, value: &str) -> bool;
}

/// Fixed-size in-memory storage. Values longer than the size limit are
/// truncated at a character boundary.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    slots: Vec<Option<String>>,
    max_size: usize,
}

impl MemoryStorage {
    pub fn new(max_variables: u32, max_size: usize) -> Self {
        MemoryStorage {
            slots: vec![None; max_variables as usize],
            max_size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn truncate(&self, slot: u32, value: &mut String) {
        if value.len() <= self.max_size {
            return;
        }
        let mut end = self.max_size;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        warn!(
            "Value of variable slot {} truncated to {} bytes",
            slot, end
        );
        value.truncate(end);
    }
}

impl VariableStorage for MemoryStorage {
    fn get(&self, slot: u32) -> Option<&str> {
        self.slots.get(slot as usize)?.as_deref()
    }

    fn set(&mut self, slot: u32, value: &str) -> bool {
        let mut value = value.to_string();
        self.truncate(slot, &mut value);
        match self.slots.get_mut(slot as usize) {
            Some(entry) => {
                *entry = Some(value);
                true
            }
            None => false,
        }
    }

    fn append(&mut self, slot: u32, value: &str) -> bool {
        let mut joined = match self.slots.get(slot as usize) {
            Some(current) => current.clone().unwrap_or_default(),
            None => return false,
        };
        joined.push_str(value);
        self.set(slot, &joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_set_get_append() {
        let mut storage = MemoryStorage::new(4, 64);
        assert_eq!(storage.get(0), None);
        assert!(storage.set(0, "\\Seen"));
        assert!(storage.append(0, " \\Flagged"));
        assert_eq!(storage.get(0), Some("\\Seen \\Flagged"));
        assert!(storage.append(1, "x"));
        assert_eq!(storage.get(1), Some("x"));
    }

    #[test]
    fn test_out_of_range_slot() {
        let mut storage = MemoryStorage::new(2, 64);
        assert!(!storage.set(2, "a"));
        assert!(!storage.append(7, "a"));
        assert_eq!(storage.get(2), None);
    }

    #[test]
    fn test_values_are_truncated() {
        let mut storage = MemoryStorage::new(1, 5);
        assert!(storage.set(0, "abcdefgh"));
        assert_eq!(storage.get(0), Some("abcde"));
        // 'é' is two bytes and must not be split
        assert!(storage.set(0, "abcdé"));
        assert_eq!(storage.get(0), Some("abcd"));
    }
}
