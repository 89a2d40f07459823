//! Command tree consumed by the code generator.
//!
//! The tree arrives already parsed and validated; arguments are classified
//! (number, string, string list, variable, comparator, match type or tag).
//! Trees are read from TOML:
//!
//! ```toml
//! [[command]]
//! identifier = "if"
//! line = 3
//! test = { identifier = "hasflag", arguments = [{ string_list = ["\\Seen"] }] }
//!
//! [[command.block]]
//! identifier = "addflag"
//! arguments = [{ string = "\\Flagged" }]
//! ```

use crate::compiler::error::CompilerError;
use crate::matching::{Comparator, MatchType};
use crate::operand::VariableRef;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Script {
    #[serde(default, rename = "command")]
    pub commands: Vec<Command>,
}

impl Script {
    pub fn from_toml_str(source: &str) -> Result<Self, CompilerError> {
        toml::from_str(source).map_err(|e| CompilerError::ParseError(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CompilerError> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Command {
    pub identifier: String,
    #[serde(default)]
    pub arguments: Vec<Argument>,
    /// Condition of `if`
    #[serde(default)]
    pub test: Option<Box<Command>>,
    #[serde(default)]
    pub block: Vec<Command>,
    #[serde(default, rename = "else")]
    pub else_block: Vec<Command>,
    #[serde(default)]
    pub line: u32,
}

impl Command {
    pub fn new(identifier: &str, arguments: Vec<Argument>) -> Self {
        Command {
            identifier: identifier.to_string(),
            arguments,
            test: None,
            block: Vec::new(),
            else_block: Vec::new(),
            line: 0,
        }
    }

    /// Arguments that are not optional (tagged, comparator, match type)
    pub fn positional(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().filter(|a| a.is_positional())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    Number(u32),
    String(String),
    StringList(Vec<String>),
    Variable(VariableRef),
    Comparator(Comparator),
    MatchType(MatchType),
    /// Command-specific tag such as `:index 2` or `:flags [...]`
    Tag {
        name: String,
        #[serde(default)]
        value: Option<Box<Argument>>,
    },
}

impl Argument {
    pub fn is_positional(&self) -> bool {
        matches!(
            self,
            Argument::Number(_)
                | Argument::String(_)
                | Argument::StringList(_)
                | Argument::Variable(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Argument::Number(_) => "number",
            Argument::String(_) => "string",
            Argument::StringList(_) => "string list",
            Argument::Variable(_) => "variable",
            Argument::Comparator(_) => "comparator",
            Argument::MatchType(_) => "match type",
            Argument::Tag { .. } => "tag",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::Relation;
    use test_log::test;

    #[test]
    fn test_parse_command_tree() {
        let script = Script::from_toml_str(
            r#"
            [[command]]
            identifier = "setflag"
            line = 1
            arguments = [{ variable = { slot = 2 } }, { string_list = ["\\Seen", "\\Flagged"] }]

            [[command]]
            identifier = "if"
            line = 2
            test = { identifier = "test_error", arguments = [
                { match_type = { count = "eq" } },
                { comparator = "i;ascii-numeric" },
                { tag = { name = "index", value = { number = 2 } } },
                { string = "1" },
            ] }

            [[command.block]]
            identifier = "stop"
            "#,
        )
        .unwrap();

        assert_eq!(script.commands.len(), 2);
        let setflag = &script.commands[0];
        assert_eq!(
            setflag.arguments[0],
            Argument::Variable(VariableRef { storage: 0, slot: 2 })
        );
        assert_eq!(setflag.positional().count(), 2);

        let test = script.commands[1].test.as_ref().unwrap();
        assert_eq!(test.arguments[0], Argument::MatchType(MatchType::Count(Relation::Eq)));
        assert_eq!(test.arguments[1], Argument::Comparator(Comparator::AsciiNumeric));
        assert_eq!(
            test.arguments[2],
            Argument::Tag {
                name: "index".to_string(),
                value: Some(Box::new(Argument::Number(2)))
            }
        );
        assert_eq!(test.positional().count(), 1);
        assert_eq!(script.commands[1].block[0].identifier, "stop");
    }

    #[test]
    fn test_unknown_comparator_is_rejected() {
        let err = Script::from_toml_str(
            r#"
            [[command]]
            identifier = "hasflag"
            arguments = [{ comparator = "i;klingon" }, { string = "x" }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CompilerError::ParseError(_)));
    }
}
