//! IMAP flag sets.
//!
//! A flag list is a space-separated string such as `\Seen $Work`. Flags are
//! compared case-insensitively but keep the spelling they were first added
//! with.

use indexmap::IndexMap;
use std::fmt;

const SYSTEM_FLAGS: [&str; 5] = ["\\answered", "\\flagged", "\\deleted", "\\seen", "\\draft"];

fn is_atom_special(c: char) -> bool {
    matches!(c, '(' | ')' | '{' | ' ' | '%' | '*' | '"' | '\\' | ']') || c.is_control()
}

/// System flags must be one of the five defined by IMAP; keywords must be
/// atoms
pub fn is_valid_flag(flag: &str) -> bool {
    if flag.is_empty() {
        return false;
    }
    if flag.starts_with('\\') {
        let lower = flag.to_ascii_lowercase();
        return SYSTEM_FLAGS.contains(&lower.as_str());
    }
    !flag.chars().any(is_atom_special)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagSet {
    // lowercase flag -> original spelling
    flags: IndexMap<String, String>,
}

impl FlagSet {
    pub fn new() -> Self {
        FlagSet::default()
    }

    /// Parse a stored flag string. Invalid flags are dropped.
    pub fn parse(value: &str) -> Self {
        let mut set = FlagSet::new();
        set.insert_item(value);
        set
    }

    /// Add a flag. False if it was already present.
    pub fn insert(&mut self, flag: &str) -> bool {
        let key = flag.to_lowercase();
        if self.flags.contains_key(&key) {
            return false;
        }
        self.flags.insert(key, flag.to_string());
        true
    }

    pub fn remove(&mut self, flag: &str) -> bool {
        self.flags.shift_remove(&flag.to_lowercase()).is_some()
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.flags.contains_key(&flag.to_lowercase())
    }

    /// Add every flag of a space-separated item. Returns the flags that were
    /// rejected as invalid.
    pub fn insert_item<'s>(&mut self, item: &'s str) -> Vec<&'s str> {
        let mut rejected = Vec::new();
        for flag in item.split_whitespace() {
            if is_valid_flag(flag) {
                self.insert(flag);
            } else {
                rejected.push(flag);
            }
        }
        rejected
    }

    /// Remove every flag of a space-separated item
    pub fn remove_item(&mut self, item: &str) {
        for flag in item.split_whitespace() {
            self.remove(flag);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.flags.values().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, flag) in self.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", flag)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_valid_flags() {
        assert!(is_valid_flag("\\Seen"));
        assert!(is_valid_flag("\\DRAFT"));
        assert!(is_valid_flag("$Work"));
        assert!(is_valid_flag("Junk"));
        assert!(!is_valid_flag("\\Important"));
        assert!(!is_valid_flag(""));
        assert!(!is_valid_flag("a(b"));
        assert!(!is_valid_flag("wild*"));
        assert!(!is_valid_flag("tab\tbed"));
    }

    #[test]
    fn test_case_insensitive_set() {
        let mut set = FlagSet::new();
        assert!(set.insert("\\Seen"));
        assert!(!set.insert("\\SEEN"));
        assert!(set.contains("\\seen"));
        assert_eq!(set.to_string(), "\\Seen");

        assert!(set.remove("\\sEEn"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_items_hold_several_flags() {
        let mut set = FlagSet::new();
        let rejected = set.insert_item("\\Seen  $Work \\Bogus (x");
        assert_eq!(rejected, vec!["\\Bogus", "(x"]);
        assert_eq!(set.to_string(), "\\Seen $Work");

        set.insert_item("\\Flagged");
        set.remove_item("$work \\seen");
        assert_eq!(set.to_string(), "\\Flagged");
    }

    #[test]
    fn test_order_is_kept_after_removal() {
        let mut set = FlagSet::parse("a b c d");
        set.remove("b");
        set.insert("e");
        let flags: Vec<&str> = set.iter().collect();
        assert_eq!(flags, vec!["a", "c", "d", "e"]);
        assert_eq!(set.len(), 4);
    }
}
