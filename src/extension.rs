//! Extension registry.
//!
//! Extensions contribute operations, operands and commands. All of them are
//! registered once at start-up; afterwards the registry is only read, by the
//! code generator (commands) and by the interpreter and disassembler
//! (operations and operands). Lookups are plain table lookups keyed by
//! `(extension, code)`; there is no fallback descriptor.

use crate::actions::SideEffect;
use crate::binary::CorruptBytecode;
use crate::compiler::CommandDef;
use crate::disassembler::DumpEnv;
use crate::operand::CodeView;
use crate::operation::OperationDef;
use crate::{actions, control, plugins};
use indexmap::IndexMap;
use log::debug;
use std::collections::HashMap;
use std::fmt;

/// Registry-assigned handle of an extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionId(pub usize);

/// Extension-defined operand. Every extension operand the core knows how to
/// consume is a side effect attached to an action.
pub struct OperandDef {
    pub name: &'static str,
    pub extension: &'static str,
    pub code: u8,
    /// Tag naming the operand in the command tree, e.g. `flags`
    pub tag: &'static str,
    /// Decode the payload that follows the operand header
    pub read: fn(&CodeView<'_>, &mut usize) -> Result<SideEffect, CorruptBytecode>,
    pub dump: fn(&mut DumpEnv<'_>, &mut usize) -> bool,
}

impl fmt::Debug for OperandDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OperandDef")
            .field("name", &self.name)
            .field("extension", &self.extension)
            .field("code", &self.code)
            .finish()
    }
}

#[derive(Debug)]
pub struct ExtensionDef {
    pub name: &'static str,
    pub operations: &'static [&'static OperationDef],
    pub operands: &'static [&'static OperandDef],
    pub commands: &'static [&'static CommandDef],
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    DuplicateExtension(String),
    DuplicateOperation { extension: String, code: u8 },
    DuplicateOperand { extension: String, code: u8 },
    DuplicateCommand(String),
    /// An extension tried to register an item owned by another extension
    ForeignItem { extension: String, item: String },
    UnknownOperation { extension: String, code: u8 },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistryError::DuplicateExtension(name) => {
                write!(f, "extension '{}' is already registered", name)
            }
            RegistryError::DuplicateOperation { extension, code } => write!(
                f,
                "operation {} of extension '{}' is already registered",
                code, extension
            ),
            RegistryError::DuplicateOperand { extension, code } => write!(
                f,
                "operand {} of extension '{}' is already registered",
                code, extension
            ),
            RegistryError::DuplicateCommand(identifier) => {
                write!(f, "command '{}' is already registered", identifier)
            }
            RegistryError::ForeignItem { extension, item } => write!(
                f,
                "extension '{}' cannot register '{}', which it does not own",
                extension, item
            ),
            RegistryError::UnknownOperation { extension, code } => {
                write!(f, "unknown operation {} in extension '{}'", code, extension)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

const CORE_NAME: &str = "core";

#[derive(Debug)]
pub struct Registry {
    extensions: IndexMap<&'static str, &'static ExtensionDef>,
    operations: HashMap<(Option<ExtensionId>, u8), &'static OperationDef>,
    operands: HashMap<(ExtensionId, u8), &'static OperandDef>,
    side_effects: HashMap<&'static str, (ExtensionId, &'static OperandDef)>,
    commands: IndexMap<&'static str, (Option<ExtensionId>, &'static CommandDef)>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    /// A registry holding only the core operations and commands
    pub fn new() -> Self {
        let mut registry = Registry {
            extensions: IndexMap::new(),
            operations: HashMap::new(),
            operands: HashMap::new(),
            side_effects: HashMap::new(),
            commands: IndexMap::new(),
        };
        for def in control::OPERATIONS.iter().chain(actions::OPERATIONS.iter()) {
            registry.operations.insert((None, def.code), *def);
        }
        for def in control::COMMANDS.iter().chain(actions::COMMANDS.iter()) {
            registry.commands.insert(def.identifier, (None, *def));
        }
        registry
    }

    /// Core plus every extension shipped with the crate
    pub fn standard() -> Result<Self, RegistryError> {
        let mut registry = Registry::new();
        for ext in plugins::EXTENSIONS {
            registry.register_extension(ext)?;
        }
        Ok(registry)
    }

    pub fn register_extension(
        &mut self,
        def: &'static ExtensionDef,
    ) -> Result<ExtensionId, RegistryError> {
        if self.extensions.contains_key(def.name) {
            return Err(RegistryError::DuplicateExtension(def.name.to_string()));
        }
        let (index, _) = self.extensions.insert_full(def.name, def);
        let id = ExtensionId(index);
        debug!("Registered extension '{}' as {:?}", def.name, id);

        for op in def.operations {
            self.register_operation(Some(id), *op)?;
        }
        for operand in def.operands {
            self.register_operand(id, *operand)?;
        }
        for command in def.commands {
            self.register_command(Some(id), *command)?;
        }
        Ok(id)
    }

    fn check_owner(
        &self,
        extension: Option<ExtensionId>,
        owner: Option<&str>,
        item: &str,
    ) -> Result<(), RegistryError> {
        let expected = extension.map(|id| self.extension_name(id));
        if expected != owner {
            return Err(RegistryError::ForeignItem {
                extension: expected.unwrap_or(CORE_NAME).to_string(),
                item: item.to_string(),
            });
        }
        Ok(())
    }

    pub fn register_operation(
        &mut self,
        extension: Option<ExtensionId>,
        def: &'static OperationDef,
    ) -> Result<(), RegistryError> {
        self.check_owner(extension, def.extension, def.mnemonic)?;
        if self.operations.contains_key(&(extension, def.code)) {
            return Err(RegistryError::DuplicateOperation {
                extension: self.display_name(extension).to_string(),
                code: def.code,
            });
        }
        self.operations.insert((extension, def.code), def);
        Ok(())
    }

    pub fn register_operand(
        &mut self,
        extension: ExtensionId,
        def: &'static OperandDef,
    ) -> Result<(), RegistryError> {
        self.check_owner(Some(extension), Some(def.extension), def.name)?;
        if self.operands.contains_key(&(extension, def.code))
            || self.side_effects.contains_key(def.tag)
        {
            return Err(RegistryError::DuplicateOperand {
                extension: def.extension.to_string(),
                code: def.code,
            });
        }
        self.operands.insert((extension, def.code), def);
        self.side_effects.insert(def.tag, (extension, def));
        Ok(())
    }

    pub fn register_command(
        &mut self,
        extension: Option<ExtensionId>,
        def: &'static CommandDef,
    ) -> Result<(), RegistryError> {
        if self.commands.contains_key(def.identifier) {
            return Err(RegistryError::DuplicateCommand(def.identifier.to_string()));
        }
        self.commands.insert(def.identifier, (extension, def));
        Ok(())
    }

    /// Find the descriptor for an operation. `None` is the core.
    pub fn resolve(
        &self,
        extension: Option<ExtensionId>,
        code: u8,
    ) -> Result<&'static OperationDef, RegistryError> {
        self.operations
            .get(&(extension, code))
            .copied()
            .ok_or_else(|| RegistryError::UnknownOperation {
                extension: self.display_name(extension).to_string(),
                code,
            })
    }

    pub fn operand(&self, extension: ExtensionId, code: u8) -> Option<&'static OperandDef> {
        self.operands.get(&(extension, code)).copied()
    }

    /// Side-effect operand registered under a command-tree tag
    pub fn side_effect(&self, tag: &str) -> Option<&'static OperandDef> {
        self.side_effects.get(tag).map(|(_, def)| *def)
    }

    pub fn command(&self, identifier: &str) -> Option<&'static CommandDef> {
        self.commands.get(identifier).map(|(_, def)| *def)
    }

    /// Identifiers of all known commands, in registration order
    pub fn command_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }

    pub fn find_extension(&self, name: &str) -> Option<ExtensionId> {
        self.extensions.get_index_of(name).map(ExtensionId)
    }

    pub fn extension_name(&self, id: ExtensionId) -> &'static str {
        self.extensions
            .get_index(id.0)
            .map(|(name, _)| *name)
            .unwrap_or("<unregistered>")
    }

    fn display_name(&self, extension: Option<ExtensionId>) -> &'static str {
        match extension {
            Some(id) => self.extension_name(id),
            None => CORE_NAME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{JMPFALSE, STOP};
    use crate::plugins::imap4flags::{self, ADDFLAG, SETFLAG};
    use crate::plugins::testsuite;
    use test_log::test;

    #[test]
    fn test_standard_links_shipped_extensions() {
        let registry = Registry::standard().unwrap();
        for (index, ext) in crate::plugins::EXTENSIONS.iter().enumerate() {
            let id = registry.find_extension(ext.name).unwrap();
            assert_eq!(id, ExtensionId(index));
            assert_eq!(registry.extension_name(id), ext.name);
        }
    }

    #[test]
    fn test_resolve_returns_registered_descriptor() {
        let registry = Registry::standard().unwrap();
        let flags = registry.find_extension("imap4flags").unwrap();

        assert!(std::ptr::eq(registry.resolve(None, 3).unwrap(), &STOP));
        assert!(std::ptr::eq(registry.resolve(None, 2).unwrap(), &JMPFALSE));
        assert!(std::ptr::eq(registry.resolve(Some(flags), 0).unwrap(), &SETFLAG));
        assert!(std::ptr::eq(registry.resolve(Some(flags), 1).unwrap(), &ADDFLAG));
    }

    #[test]
    fn test_unregistered_pair_is_unknown() {
        let registry = Registry::standard().unwrap();
        let suite = registry.find_extension("testsuite").unwrap();
        assert_eq!(
            registry.resolve(Some(suite), 9).unwrap_err(),
            RegistryError::UnknownOperation {
                extension: "testsuite".to_string(),
                code: 9
            }
        );
        assert!(matches!(
            registry.resolve(None, 0x30),
            Err(RegistryError::UnknownOperation { .. })
        ));

        // Core alone does not know extension operations
        let core = Registry::new();
        assert_eq!(core.find_extension("imap4flags"), None);
    }

    #[test]
    fn test_collisions_are_rejected() {
        let mut registry = Registry::standard().unwrap();
        assert_eq!(
            registry.register_extension(&imap4flags::EXTENSION),
            Err(RegistryError::DuplicateExtension("imap4flags".to_string()))
        );

        let flags = registry.find_extension("imap4flags").unwrap();
        assert!(matches!(
            registry.register_operation(Some(flags), &ADDFLAG),
            Err(RegistryError::DuplicateOperation { code: 1, .. })
        ));

        let suite = registry.find_extension("testsuite").unwrap();
        assert!(matches!(
            registry.register_operation(Some(suite), &ADDFLAG),
            Err(RegistryError::ForeignItem { .. })
        ));
        assert!(matches!(
            registry.register_command(None, testsuite::EXTENSION.commands[0]),
            Err(RegistryError::DuplicateCommand(_))
        ));
    }

    #[test]
    fn test_commands_and_side_effects() {
        let registry = Registry::standard().unwrap();
        let names: Vec<_> = registry.command_names().collect();
        for expected in [
            "if",
            "stop",
            "keep",
            "setflag",
            "addflag",
            "removeflag",
            "hasflag",
            "test_error",
        ] {
            assert!(names.contains(&expected), "missing command {}", expected);
        }

        let flags = registry.side_effect("flags").unwrap();
        assert_eq!(flags.extension, "imap4flags");
        assert!(registry.side_effect("copy").is_none());
        assert!(Registry::new().side_effect("flags").is_none());
    }
}
