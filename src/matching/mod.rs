//! Match engine shared by all conditional tests.
//!
//! A test opens a `MatchContext` with its comparator, match type, key list
//! and optional index, feeds it candidate values one by one and closes it
//! with `end`. Evaluation stops at the first match unless the match type
//! needs to see every candidate (`:count`), in which case the decision is
//! made in `end`.

pub mod comparator;
pub mod match_type;

use crate::binary::CorruptBytecode;
use crate::operand::{CodeView, OPT_COMPARATOR, OPT_END, OPT_MATCH_TYPE};
use crate::stringlist::{CodedStringList, StringListIter};
use log::debug;
use std::fmt;

pub use comparator::Comparator;
pub use match_type::{MatchType, Relation};

#[derive(Debug, Clone, PartialEq)]
pub enum MatchError {
    /// The key list could not be decoded
    Corrupt(CorruptBytecode),
    /// The comparator cannot perform the requested match type
    Unsupported {
        comparator: Comparator,
        match_type: MatchType,
    },
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MatchError::Corrupt(err) => write!(f, "invalid key list item: {}", err),
            MatchError::Unsupported {
                comparator,
                match_type,
            } => write!(
                f,
                "comparator {} does not support match type {}",
                comparator.name(),
                match_type.name()
            ),
        }
    }
}

impl std::error::Error for MatchError {}

impl From<CorruptBytecode> for MatchError {
    fn from(err: CorruptBytecode) -> Self {
        MatchError::Corrupt(err)
    }
}

/// Where the keys of a test come from
#[derive(Debug, Clone, Copy)]
pub enum KeyList<'a> {
    Coded(CodedStringList<'a>),
    Values(&'a [String]),
}

impl<'a> KeyList<'a> {
    pub fn iter(&self) -> KeyIter<'a> {
        match self {
            KeyList::Coded(list) => KeyIter::Coded(list.iter()),
            KeyList::Values(values) => KeyIter::Values(values.iter()),
        }
    }
}

pub enum KeyIter<'a> {
    Coded(StringListIter<'a>),
    Values(std::slice::Iter<'a, String>),
}

impl<'a> Iterator for KeyIter<'a> {
    type Item = Result<String, CorruptBytecode>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            KeyIter::Coded(iter) => iter.next(),
            KeyIter::Values(iter) => iter.next().map(|v| Ok(v.clone())),
        }
    }
}

/// Comparator, match type and index as read from a test's optional operands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub comparator: Comparator,
    pub match_type: MatchType,
    /// 1-based ordinal of the only candidate considered; 0 = all
    pub index: u32,
}

impl MatchOptions {
    pub fn with_comparator(comparator: Comparator) -> Self {
        MatchOptions {
            comparator,
            match_type: MatchType::Is,
            index: 0,
        }
    }
}

impl Default for MatchOptions {
    fn default() -> Self {
        MatchOptions::with_comparator(Comparator::Octet)
    }
}

/// Read the optional operand block of a test. Markers other than comparator
/// and match type are handed to `custom`, which returns false for markers it
/// does not know.
pub fn read_match_optional<F>(
    view: &CodeView<'_>,
    address: &mut usize,
    mut options: MatchOptions,
    mut custom: F,
) -> Result<MatchOptions, CorruptBytecode>
where
    F: FnMut(u8, &mut usize, &mut MatchOptions) -> Result<bool, CorruptBytecode>,
{
    loop {
        let marker_address = *address;
        let marker = view.read_byte(address)?;
        match marker {
            OPT_END => return Ok(options),
            OPT_COMPARATOR => options.comparator = view.read_comparator(address)?,
            OPT_MATCH_TYPE => options.match_type = view.read_match_type(address)?,
            other => {
                if !custom(other, address, &mut options)? {
                    return Err(CorruptBytecode::new(
                        marker_address,
                        format!("unknown optional operand {}", other),
                    ));
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct MatchContext<'a> {
    comparator: Comparator,
    match_type: MatchType,
    keys: KeyList<'a>,
    index: u32,
    ordinal: u32,
    matched: bool,
    count: u32,
}

impl<'a> MatchContext<'a> {
    pub fn begin(options: MatchOptions, keys: KeyList<'a>) -> Self {
        debug!(
            "Begin match: comparator {}, match type {}, index {}",
            options.comparator.name(),
            options.match_type.name(),
            options.index
        );
        MatchContext {
            comparator: options.comparator,
            match_type: options.match_type,
            keys,
            index: options.index,
            ordinal: 0,
            matched: false,
            count: 0,
        }
    }

    /// Ordinal of the candidate evaluated last
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Feed one candidate value. Returns true once a match is confirmed;
    /// callers stop feeding values at that point.
    pub fn evaluate(&mut self, value: &str) -> Result<bool, MatchError> {
        self.ordinal += 1;
        if self.index != 0 && self.ordinal != self.index {
            return Ok(false);
        }

        if self.match_type.needs_all_candidates() {
            self.count += 1;
            return Ok(false);
        }

        for key in self.keys.iter() {
            let key = key?;
            if self.match_type.match_key(self.comparator, value, &key)? {
                debug!(
                    "Candidate {} '{}' matched key '{}'",
                    self.ordinal, value, key
                );
                self.matched = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Finish matching. For `:count` this is where the collected number is
    /// compared against the keys.
    pub fn end(self) -> Result<bool, MatchError> {
        if self.match_type.needs_all_candidates() {
            let count = self.count.to_string();
            for key in self.keys.iter() {
                let key = key?;
                if self.match_type.match_key(self.comparator, &count, &key)? {
                    debug!("Count {} matched key '{}'", count, key);
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        Ok(self.matched)
    }

    /// Run a whole candidate sequence through the context
    pub fn match_values<I, S>(mut self, values: I) -> Result<bool, MatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in values {
            if self.evaluate(value.as_ref())? {
                break;
            }
        }
        self.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::Binary;
    use crate::extension::Registry;
    use crate::operand::{emit_comparator, emit_match_type, emit_number, emit_stringlist};
    use test_log::test;

    fn keys(values: &[String]) -> KeyList<'_> {
        KeyList::Values(values)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_contains_stops_at_first_match() {
        let k = strings(&["fail"]);
        let options = MatchOptions {
            match_type: MatchType::Contains,
            ..MatchOptions::default()
        };
        let mut ctx = MatchContext::begin(options, keys(&k));

        let candidates = ["ok", "this will fail here", "fail again"];
        let mut fed = 0;
        for candidate in candidates {
            fed += 1;
            if ctx.evaluate(candidate).unwrap() {
                break;
            }
        }
        assert_eq!(fed, 2);
        assert_eq!(ctx.ordinal(), 2);
        assert!(ctx.end().unwrap());
    }

    #[test]
    fn test_index_selects_single_candidate() {
        let k = strings(&["b"]);
        let candidates = ["a", "b", "c"];

        for (index, expected) in [(0, true), (1, false), (2, true), (3, false), (4, false)] {
            let options = MatchOptions {
                index,
                ..MatchOptions::default()
            };
            let ctx = MatchContext::begin(options, keys(&k));
            assert_eq!(
                ctx.match_values(candidates).unwrap(),
                expected,
                "index {}",
                index
            );
        }
    }

    #[test]
    fn test_count_decided_at_end() {
        let k = strings(&["2"]);
        let options = MatchOptions {
            comparator: Comparator::AsciiNumeric,
            match_type: MatchType::Count(Relation::Ge),
            index: 0,
        };
        let mut ctx = MatchContext::begin(options, keys(&k));
        assert!(!ctx.evaluate("\\Seen").unwrap());
        assert!(!ctx.evaluate("\\Flagged").unwrap());
        assert!(ctx.end().unwrap());

        let ctx = MatchContext::begin(options, keys(&k));
        assert!(!ctx.match_values(["\\Seen"]).unwrap());
    }

    #[test]
    fn test_unsupported_pair_is_an_error() {
        let k = strings(&["1"]);
        let options = MatchOptions {
            comparator: Comparator::AsciiNumeric,
            match_type: MatchType::Contains,
            index: 0,
        };
        let ctx = MatchContext::begin(options, keys(&k));
        assert!(matches!(
            ctx.match_values(["12"]),
            Err(MatchError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_corrupt_key_list_is_an_error() {
        let mut binary = Binary::new();
        emit_stringlist(&mut binary, &["a", "b"]);
        // Declare one more key than is present
        let list = CodedStringList::new(binary.code(), 9, binary.len(), 3);
        let ctx = MatchContext::begin(MatchOptions::default(), KeyList::Coded(list));
        assert!(matches!(
            ctx.match_values(["c"]),
            Err(MatchError::Corrupt(_))
        ));
    }

    #[test]
    fn test_read_match_optional() {
        let registry = Registry::new();
        let mut binary = Binary::new();
        binary.emit_byte(OPT_COMPARATOR);
        emit_comparator(&mut binary, Comparator::AsciiNumeric);
        binary.emit_byte(OPT_MATCH_TYPE);
        emit_match_type(&mut binary, MatchType::Value(Relation::Lt));
        binary.emit_byte(0x04);
        emit_number(&mut binary, 3);
        binary.emit_byte(OPT_END);
        let view = CodeView::link(&binary, &registry).unwrap();

        let mut address = 0;
        let options = read_match_optional(
            &view,
            &mut address,
            MatchOptions::default(),
            |marker, address, options| {
                if marker != 0x04 {
                    return Ok(false);
                }
                options.index = view.read_number(address)?;
                Ok(true)
            },
        )
        .unwrap();
        assert_eq!(address, binary.len());
        assert_eq!(options.comparator, Comparator::AsciiNumeric);
        assert_eq!(options.match_type, MatchType::Value(Relation::Lt));
        assert_eq!(options.index, 3);

        // Without a handler the custom marker is rejected
        let mut address = 0;
        let err = read_match_optional(&view, &mut address, MatchOptions::default(), |_, _, _| {
            Ok(false)
        })
        .unwrap_err();
        assert!(err.reason.contains("unknown optional operand 4"));
    }
}
