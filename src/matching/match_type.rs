//! Match types: how a single key is tested against a single candidate value.

use crate::matching::comparator::Comparator;
use crate::matching::MatchError;
use serde::Deserialize;
use std::cmp::Ordering;

/// Relational operator used by :value and :count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Relation {
    pub fn code(self) -> u8 {
        match self {
            Relation::Gt => 0,
            Relation::Ge => 1,
            Relation::Lt => 2,
            Relation::Le => 3,
            Relation::Eq => 4,
            Relation::Ne => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Relation::Gt),
            1 => Some(Relation::Ge),
            2 => Some(Relation::Lt),
            3 => Some(Relation::Le),
            4 => Some(Relation::Eq),
            5 => Some(Relation::Ne),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Relation::Gt => "gt",
            Relation::Ge => "ge",
            Relation::Lt => "lt",
            Relation::Le => "le",
            Relation::Eq => "eq",
            Relation::Ne => "ne",
        }
    }

    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Relation::Gt => ordering == Ordering::Greater,
            Relation::Ge => ordering != Ordering::Less,
            Relation::Lt => ordering == Ordering::Less,
            Relation::Le => ordering != Ordering::Greater,
            Relation::Eq => ordering == Ordering::Equal,
            Relation::Ne => ordering != Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Is,
    Contains,
    Matches,
    Value(Relation),
    Count(Relation),
}

impl MatchType {
    pub fn code(self) -> u8 {
        match self {
            MatchType::Is => 0x00,
            MatchType::Contains => 0x01,
            MatchType::Matches => 0x02,
            MatchType::Value(_) => 0x03,
            MatchType::Count(_) => 0x04,
        }
    }

    /// Relation byte that follows the code on the wire, if any
    pub fn relation(self) -> Option<Relation> {
        match self {
            MatchType::Value(rel) | MatchType::Count(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn has_relation(code: u8) -> bool {
        code == 0x03 || code == 0x04
    }

    pub fn from_code(code: u8, relation: Option<Relation>) -> Option<Self> {
        match (code, relation) {
            (0x00, None) => Some(MatchType::Is),
            (0x01, None) => Some(MatchType::Contains),
            (0x02, None) => Some(MatchType::Matches),
            (0x03, Some(rel)) => Some(MatchType::Value(rel)),
            (0x04, Some(rel)) => Some(MatchType::Count(rel)),
            _ => None,
        }
    }

    pub fn name(self) -> String {
        match self {
            MatchType::Is => ":is".to_string(),
            MatchType::Contains => ":contains".to_string(),
            MatchType::Matches => ":matches".to_string(),
            MatchType::Value(rel) => format!(":value \"{}\"", rel.name()),
            MatchType::Count(rel) => format!(":count \"{}\"", rel.name()),
        }
    }

    /// Match types whose outcome depends on the whole candidate set
    pub fn needs_all_candidates(self) -> bool {
        matches!(self, MatchType::Count(_))
    }

    /// Test one key against one value
    pub fn match_key(self, cmp: Comparator, value: &str, key: &str) -> Result<bool, MatchError> {
        match self {
            MatchType::Is => Ok(cmp.equals(value, key)),
            MatchType::Contains => {
                self.require_substring(cmp)?;
                Ok(cmp.fold(value).contains(cmp.fold(key).as_ref()))
            }
            MatchType::Matches => {
                self.require_substring(cmp)?;
                Ok(glob_match(cmp, value, key))
            }
            MatchType::Value(rel) | MatchType::Count(rel) => Ok(rel.holds(cmp.compare(value, key))),
        }
    }

    fn require_substring(self, cmp: Comparator) -> Result<(), MatchError> {
        if cmp.supports_substring() {
            Ok(())
        } else {
            Err(MatchError::Unsupported {
                comparator: cmp,
                match_type: self,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum GlobToken {
    AnySequence,
    AnyChar,
    Literal(char),
}

fn tokenize(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => tokens.push(GlobToken::AnySequence),
            '?' => tokens.push(GlobToken::AnyChar),
            '\\' => match chars.next() {
                Some(escaped) => tokens.push(GlobToken::Literal(escaped)),
                None => tokens.push(GlobToken::Literal('\\')),
            },
            other => tokens.push(GlobToken::Literal(other)),
        }
    }
    tokens
}

/// Wildcard match: `*` is any sequence, `?` any single character, `\` escapes
fn glob_match(cmp: Comparator, value: &str, pattern: &str) -> bool {
    let tokens = tokenize(pattern);
    let chars: Vec<char> = value.chars().collect();

    let (mut v, mut p) = (0, 0);
    // Position of the last `*` and the value index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while v < chars.len() {
        let advanced = match tokens.get(p) {
            Some(GlobToken::AnySequence) => {
                backtrack = Some((p, v));
                p += 1;
                continue;
            }
            Some(GlobToken::AnyChar) => true,
            Some(GlobToken::Literal(c)) => cmp.char_eq(*c, chars[v]),
            None => false,
        };

        if advanced {
            v += 1;
            p += 1;
        } else if let Some((star, absorbed)) = backtrack {
            p = star + 1;
            v = absorbed + 1;
            backtrack = Some((star, absorbed + 1));
        } else {
            return false;
        }
    }

    tokens[p..].iter().all(|t| *t == GlobToken::AnySequence)
}
