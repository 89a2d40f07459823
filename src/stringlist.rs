//! Lazy decoding of string-list operands.
//!
//! A coded list is a window `[start, end)` of the binary that holds `count`
//! string operands back to back. Items are decoded one at a time; the
//! iterator never looks past `end`, and a corrupt item is reported as an
//! error at the position it was found, distinct from ordinary exhaustion.

use crate::binary::CorruptBytecode;
use crate::operand::read_string_item;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodedStringList<'a> {
    code: &'a [u8],
    start: usize,
    end: usize,
    count: u32,
}

impl<'a> CodedStringList<'a> {
    pub fn new(code: &'a [u8], start: usize, end: usize, count: u32) -> Self {
        CodedStringList {
            code,
            start,
            end,
            count,
        }
    }

    /// Declared number of items
    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn address(&self) -> usize {
        self.start
    }

    /// A fresh forward-only iterator over the items
    pub fn iter(&self) -> StringListIter<'a> {
        StringListIter {
            code: self.code,
            address: self.start,
            end: self.end,
            remaining: self.count,
            index: 0,
            done: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StringListIter<'a> {
    code: &'a [u8],
    address: usize,
    end: usize,
    remaining: u32,
    index: u32,
    done: bool,
}

impl<'a> StringListIter<'a> {
    /// Decode the next item. `Ok(None)` is exhaustion; after an error the
    /// iterator stays exhausted.
    pub fn next_item(&mut self) -> Result<Option<String>, CorruptBytecode> {
        if self.done {
            return Ok(None);
        }

        if self.remaining == 0 {
            self.done = true;
            if self.address != self.end {
                return Err(CorruptBytecode::new(
                    self.address,
                    format!(
                        "string list has {} trailing bytes after its last item",
                        self.end - self.address
                    ),
                ));
            }
            return Ok(None);
        }

        if self.address >= self.end {
            self.done = true;
            return Err(CorruptBytecode::new(
                self.address,
                format!(
                    "string list ends after {} items but declares {}",
                    self.index,
                    self.index + self.remaining
                ),
            ));
        }

        match read_string_item(self.code, &mut self.address, self.end) {
            Ok(item) => {
                self.remaining -= 1;
                self.index += 1;
                Ok(Some(item))
            }
            Err(err) => {
                debug!("String list item {} is corrupt: {}", self.index + 1, err);
                self.done = true;
                Err(err)
            }
        }
    }

    /// Number of items handed out so far
    pub fn position(&self) -> u32 {
        self.index
    }
}

impl<'a> Iterator for StringListIter<'a> {
    type Item = Result<String, CorruptBytecode>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}

impl<'a> std::iter::FusedIterator for StringListIter<'a> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::Binary;
    use crate::operand::{emit_string, emit_stringlist, OPERAND_STRING_LIST};
    use test_log::test;

    /// Skip the string-list operand header
    fn list_of(binary: &Binary, count: u32) -> CodedStringList<'_> {
        CodedStringList::new(binary.code(), 9, binary.len(), count)
    }

    #[test]
    fn test_yields_items_then_exhaustion() {
        let mut binary = Binary::new();
        emit_stringlist(&mut binary, &["\\Seen", "\\Flagged", "$Work"]);

        let list = list_of(&binary, 3);
        let mut iter = list.iter();
        assert_eq!(iter.next_item().unwrap().as_deref(), Some("\\Seen"));
        assert_eq!(iter.next_item().unwrap().as_deref(), Some("\\Flagged"));
        assert_eq!(iter.next_item().unwrap().as_deref(), Some("$Work"));
        assert_eq!(iter.next_item().unwrap(), None);
        assert_eq!(iter.next_item().unwrap(), None);
        assert_eq!(iter.position(), 3);

        // Each call to iter() starts over
        assert_eq!(list.iter().count(), 3);
    }

    #[test]
    fn test_short_list_errors_after_present_items() {
        // Declares three items but the region only holds two
        let mut binary = Binary::new();
        binary.emit_byte(OPERAND_STRING_LIST);
        binary.emit_u32(3);
        binary.emit_u32(5 + 4 + 5 + 7);
        emit_string(&mut binary, "Seen");
        emit_string(&mut binary, "Flagged");

        let list = list_of(&binary, 3);
        let items: Vec<_> = list.iter().collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_deref(), Ok("Seen"));
        assert_eq!(items[1].as_deref(), Ok("Flagged"));
        let err = items[2].as_ref().unwrap_err();
        assert_eq!(err.address, binary.len());
        assert!(err.reason.contains("declares 3"));
    }

    #[test]
    fn test_item_crossing_region_end_is_corrupt() {
        let mut binary = Binary::new();
        emit_stringlist(&mut binary, &["one", "two"]);
        // Shrink the region so the second item is cut in half
        let list = CodedStringList::new(binary.code(), 9, binary.len() - 2, 2);

        let mut iter = list.iter();
        assert_eq!(iter.next_item().unwrap().as_deref(), Some("one"));
        assert!(iter.next_item().is_err());
        assert_eq!(iter.next_item().unwrap(), None);
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let mut binary = Binary::new();
        emit_stringlist(&mut binary, &["one", "two"]);
        let list = list_of(&binary, 1);

        let mut iter = list.iter();
        assert_eq!(iter.next_item().unwrap().as_deref(), Some("one"));
        assert!(iter.next_item().is_err());
    }

    #[test]
    fn test_wrong_item_tag_is_corrupt() {
        let mut binary = Binary::new();
        binary.emit_byte(OPERAND_STRING_LIST);
        binary.emit_u32(1);
        binary.emit_u32(5);
        binary.emit_byte(0x01);
        binary.emit_u32(7);

        let list = list_of(&binary, 1);
        let err = list.iter().next().unwrap().unwrap_err();
        assert_eq!(err.address, 9);
    }
}
