//! Code generation: lowers a command tree into a binary.
//!
//! Each command identifier maps to a generation hook registered by the core
//! or by an extension. Hooks emit their operation header and then their
//! arguments in grammar order through the helpers below. The block is only
//! ever appended to; nested blocks are generated into a detached buffer so
//! that jumps over them can be emitted with their final offsets.

use crate::binary::Binary;
use crate::compiler::ast::{Argument, Command, Script};
use crate::compiler::error::CompilerError;
use crate::control::{JMP, JMPFALSE};
use crate::error_handler::ErrorHandler;
use crate::extension::Registry;
use crate::operand::{
    emit_comparator, emit_extension_operand, emit_match_type, emit_number, emit_string,
    emit_stringlist, emit_variable, OPT_COMPARATOR, OPT_END, OPT_MATCH_TYPE, OPT_SIDE_EFFECT,
};
use crate::operation::{emit_operation, OperationDef};
use log::{debug, info};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Command,
    Test,
}

pub type GenerateFn = fn(&mut CodeGenerator<'_>, &Command) -> Result<(), CompilerError>;

pub struct CommandDef {
    pub identifier: &'static str,
    pub kind: CommandKind,
    pub generate: GenerateFn,
}

impl fmt::Debug for CommandDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CommandDef")
            .field("identifier", &self.identifier)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Size of a JMP record: opcode plus 32-bit offset
const JUMP_SIZE: usize = 5;

pub struct CodeGenerator<'a> {
    registry: &'a Registry,
    binary: Binary,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        CodeGenerator {
            registry,
            binary: Binary::new(),
        }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn binary(&self) -> &Binary {
        &self.binary
    }

    pub fn binary_mut(&mut self) -> &mut Binary {
        &mut self.binary
    }

    pub fn into_binary(self) -> Binary {
        self.binary
    }

    pub fn emit_operation(&mut self, def: &OperationDef) -> Result<usize, CompilerError> {
        let address = emit_operation(&mut self.binary, def)?;
        debug!("{:08x}: emit {}", address, def.mnemonic);
        Ok(address)
    }

    /// Emit a positional argument as the matching operand
    pub fn emit_argument(&mut self, cmd: &Command, arg: &Argument) -> Result<(), CompilerError> {
        match arg {
            Argument::Number(n) => {
                emit_number(&mut self.binary, *n);
            }
            Argument::String(s) => {
                emit_string(&mut self.binary, s);
            }
            Argument::StringList(items) => {
                emit_stringlist(&mut self.binary, items);
            }
            Argument::Variable(var) => {
                emit_variable(&mut self.binary, *var);
            }
            other => return Err(invalid_argument(cmd, format!("unexpected {}", other.kind()))),
        }
        Ok(())
    }

    pub fn emit_positional_arguments(&mut self, cmd: &Command) -> Result<(), CompilerError> {
        for arg in cmd.positional() {
            self.emit_argument(cmd, arg)?;
        }
        Ok(())
    }

    /// Emit the optional operand block of a command: comparator, match type
    /// and any tags, terminated by `OPT_END`. Tags are handed to `tag`, which
    /// returns false for tags the command does not accept.
    pub fn emit_optional_arguments<F>(
        &mut self,
        cmd: &Command,
        mut tag: F,
    ) -> Result<(), CompilerError>
    where
        F: FnMut(&mut CodeGenerator<'a>, &str, Option<&Argument>) -> Result<bool, CompilerError>,
    {
        for arg in cmd.arguments.iter().filter(|a| !a.is_positional()) {
            match arg {
                Argument::Comparator(cmp) => {
                    self.binary.emit_byte(OPT_COMPARATOR);
                    emit_comparator(&mut self.binary, *cmp);
                }
                Argument::MatchType(mcht) => {
                    self.binary.emit_byte(OPT_MATCH_TYPE);
                    emit_match_type(&mut self.binary, *mcht);
                }
                Argument::Tag { name, value } => {
                    if !tag(self, name, value.as_deref())? {
                        return Err(invalid_argument(cmd, format!("unknown tag :{}", name)));
                    }
                }
                _ => {}
            }
        }
        self.binary.emit_byte(OPT_END);
        Ok(())
    }

    /// Emit a side effect registered by an extension under `name`. False
    /// when no extension provides it.
    pub fn emit_side_effect(
        &mut self,
        cmd: &Command,
        name: &str,
        value: Option<&Argument>,
    ) -> Result<bool, CompilerError> {
        let def = match self.registry.side_effect(name) {
            Some(def) => def,
            None => return Ok(false),
        };
        let value =
            value.ok_or_else(|| invalid_argument(cmd, format!(":{} needs a value", name)))?;

        self.binary.emit_byte(OPT_SIDE_EFFECT);
        emit_extension_operand(&mut self.binary, def.extension, def.code)?;
        self.emit_argument(cmd, value)?;
        Ok(true)
    }

    pub fn generate_command(&mut self, cmd: &Command) -> Result<(), CompilerError> {
        self.generate_as(cmd, CommandKind::Command)
    }

    pub fn generate_test(&mut self, test: &Command) -> Result<(), CompilerError> {
        self.generate_as(test, CommandKind::Test)
    }

    fn generate_as(&mut self, cmd: &Command, kind: CommandKind) -> Result<(), CompilerError> {
        let def = self
            .registry
            .command(&cmd.identifier)
            .ok_or_else(|| CompilerError::UnknownCommand(cmd.identifier.clone(), cmd.line))?;
        if def.kind != kind {
            return Err(CompilerError::WrongCommandKind(
                cmd.identifier.clone(),
                kind,
                cmd.line,
            ));
        }
        (def.generate)(self, cmd)
    }

    pub fn generate_block(&mut self, commands: &[Command]) -> Result<(), CompilerError> {
        for cmd in commands {
            self.generate_command(cmd)?;
        }
        Ok(())
    }

    /// Generate a block on its own and return its code
    pub fn generate_detached(&mut self, commands: &[Command]) -> Result<Vec<u8>, CompilerError> {
        let saved = self.binary.detach_code();
        let result = self.generate_block(commands);
        let code = self.binary.reattach_code(saved);
        result.map(|_| code)
    }

    /// Emit a jump whose offset is already known
    pub fn emit_jump(&mut self, def: &OperationDef, offset: usize) -> Result<(), CompilerError> {
        let offset = i32::try_from(offset).map_err(|_| {
            CompilerError::InvalidArgument(
                def.mnemonic.to_string(),
                "block too large to jump over".to_string(),
                0,
            )
        })?;
        self.emit_operation(def)?;
        self.binary.emit_i32(offset);
        Ok(())
    }

    /// `if` lowering:
    ///
    /// ```text
    ///     <test>
    ///     JMPFALSE else
    ///     <block>
    ///     JMP end          (only with an else block)
    /// else:
    ///     <else block>
    /// end:
    /// ```
    pub fn generate_if(&mut self, cmd: &Command) -> Result<(), CompilerError> {
        let test = cmd
            .test
            .as_deref()
            .ok_or_else(|| invalid_argument(cmd, "missing test".to_string()))?;
        self.generate_test(test)?;

        let body = self.generate_detached(&cmd.block)?;
        let alternative = self.generate_detached(&cmd.else_block)?;

        let skip = if alternative.is_empty() {
            body.len()
        } else {
            body.len() + JUMP_SIZE
        };
        self.emit_jump(&JMPFALSE, skip)?;
        self.binary.emit_bytes(&body);
        if !alternative.is_empty() {
            self.emit_jump(&JMP, alternative.len())?;
            self.binary.emit_bytes(&alternative);
        }
        Ok(())
    }

    pub fn compile(mut self, script: &Script) -> Result<Binary, CompilerError> {
        self.generate_block(&script.commands)?;
        info!(
            "Generated {} bytes of code using {} extensions",
            self.binary.len(),
            self.binary.extensions().len()
        );
        Ok(self.binary)
    }
}

pub(crate) fn invalid_argument(cmd: &Command, reason: String) -> CompilerError {
    CompilerError::InvalidArgument(cmd.identifier.clone(), reason, cmd.line)
}

/// Compile a command tree, reporting failure to the error handler as well
pub fn compile(
    script: &Script,
    registry: &Registry,
    ehandler: &mut ErrorHandler,
) -> Result<Binary, CompilerError> {
    CodeGenerator::new(registry).compile(script).map_err(|err| {
        let location = match err.line() {
            Some(line) if line > 0 => format!("line {}", line),
            _ => "script".to_string(),
        };
        ehandler.record_error(&location, format_args!("{}", err));
        err
    })
}
