//! Comparators decide equality and ordering between a candidate value and a key.

use serde::Deserialize;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::convert::TryFrom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Comparator {
    /// i;octet - exact byte comparison
    #[default]
    Octet,
    /// i;ascii-casemap - ASCII letters compared case-insensitively
    AsciiCasemap,
    /// i;ascii-numeric - leading decimal digits compared as numbers
    AsciiNumeric,
}

lazy_static! {
    static ref COMPARATOR_NAMES: HashMap<&'static str, Comparator> = {
        let mut m = HashMap::new();
        m.insert("i;octet", Comparator::Octet);
        m.insert("i;ascii-casemap", Comparator::AsciiCasemap);
        m.insert("i;ascii-numeric", Comparator::AsciiNumeric);
        m
    };
}

impl Comparator {
    pub fn code(self) -> u8 {
        match self {
            Comparator::Octet => 0x00,
            Comparator::AsciiCasemap => 0x01,
            Comparator::AsciiNumeric => 0x02,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Comparator::Octet),
            0x01 => Some(Comparator::AsciiCasemap),
            0x02 => Some(Comparator::AsciiNumeric),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Comparator::Octet => "i;octet",
            Comparator::AsciiCasemap => "i;ascii-casemap",
            Comparator::AsciiNumeric => "i;ascii-numeric",
        }
    }

    /// Look up a comparator by its registered name (names are case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        COMPARATOR_NAMES
            .get(name.to_ascii_lowercase().as_str())
            .copied()
    }

    /// Whether :contains and :matches make sense for this comparator
    pub fn supports_substring(self) -> bool {
        !matches!(self, Comparator::AsciiNumeric)
    }

    pub fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            Comparator::Octet => a.as_bytes().cmp(b.as_bytes()),
            Comparator::AsciiCasemap => {
                let a = a.bytes().map(|c| c.to_ascii_lowercase());
                let b = b.bytes().map(|c| c.to_ascii_lowercase());
                a.cmp(b)
            }
            Comparator::AsciiNumeric => compare_numeric(a, b),
        }
    }

    pub fn equals(self, a: &str, b: &str) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    pub fn char_eq(self, a: char, b: char) -> bool {
        match self {
            Comparator::AsciiCasemap => a.eq_ignore_ascii_case(&b),
            _ => a == b,
        }
    }

    /// Canonical form used for substring search
    pub fn fold<'s>(self, value: &'s str) -> Cow<'s, str> {
        match self {
            Comparator::AsciiCasemap if value.bytes().any(|c| c.is_ascii_uppercase()) => {
                Cow::Owned(value.to_ascii_lowercase())
            }
            _ => Cow::Borrowed(value),
        }
    }
}

impl TryFrom<String> for Comparator {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Comparator::from_name(&name).ok_or_else(|| format!("unknown comparator '{}'", name))
    }
}

/// Digits at the start of the string with leading zeros removed.
/// `None` when the string does not start with a digit (positive infinity).
fn numeric_prefix(value: &str) -> Option<&str> {
    let digits = value.bytes().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    Some(value[..digits].trim_start_matches('0'))
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    match (numeric_prefix(a), numeric_prefix(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_names_round_trip() {
        for cmp in [
            Comparator::Octet,
            Comparator::AsciiCasemap,
            Comparator::AsciiNumeric,
        ] {
            assert_eq!(Comparator::from_name(cmp.name()), Some(cmp));
            assert_eq!(Comparator::from_code(cmp.code()), Some(cmp));
        }
        assert_eq!(
            Comparator::from_name("I;ASCII-CASEMAP"),
            Some(Comparator::AsciiCasemap)
        );
        assert_eq!(Comparator::from_name("i;unicode-casemap"), None);
    }

    #[test]
    fn test_casemap_ordering() {
        assert!(Comparator::AsciiCasemap.equals("\\Seen", "\\SEEN"));
        assert!(!Comparator::Octet.equals("\\Seen", "\\SEEN"));
        assert_eq!(Comparator::AsciiCasemap.fold("FlAgGeD"), "flagged");
    }

    #[test]
    fn test_numeric_ordering() {
        let cmp = Comparator::AsciiNumeric;
        assert_eq!(cmp.compare("10", "9"), Ordering::Greater);
        assert_eq!(cmp.compare("007", "7"), Ordering::Equal);
        assert_eq!(cmp.compare("12abc", "12"), Ordering::Equal);
        assert_eq!(cmp.compare("abc", "999999"), Ordering::Greater);
        assert_eq!(cmp.compare("abc", "xyz"), Ordering::Equal);
        assert!(!cmp.supports_substring());
    }
}
