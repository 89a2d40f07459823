//! Actions and the script result.
//!
//! Action operations do not touch the message; they add to the
//! `ScriptResult`, which is handed to the host's `ActionHandler` once the
//! script has finished. A run that performs no action keeps the message
//! implicitly.

use crate::binary::CorruptBytecode;
use crate::compiler::{CodeGenerator, Command, CommandDef, CommandKind, CompilerError};
use crate::config::TraceLevel;
use crate::disassembler::DumpEnv;
use crate::error_handler::ErrorHandler;
use crate::interpreter::ExecStatus;
use crate::operand::{CodeView, OperandKind, OPT_END, OPT_SIDE_EFFECT};
use crate::operation::OperationDef;
use crate::runtime::RuntimeEnv;
use log::{debug, info};
use std::fmt;

pub const OPCODE_KEEP: u8 = 0x04;

pub static KEEP: OperationDef = OperationDef {
    mnemonic: "KEEP",
    extension: None,
    code: OPCODE_KEEP,
    dump: dump_keep,
    execute: execute_keep,
};

pub static OPERATIONS: [&OperationDef; 1] = [&KEEP];

pub static KEEP_COMMAND: CommandDef = CommandDef {
    identifier: "keep",
    kind: CommandKind::Command,
    generate: generate_keep,
};

pub static COMMANDS: [&CommandDef; 1] = [&KEEP_COMMAND];

/// Extension-provided modification of an action, e.g. the flags a kept
/// message is stored with
#[derive(Debug, Clone, PartialEq)]
pub struct SideEffect {
    pub extension: &'static str,
    pub name: &'static str,
    pub values: Vec<String>,
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, ":{} \"{}\"", self.name, self.values.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Keep { side_effects: Vec<SideEffect> },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Action::Keep { side_effects } => {
                write!(f, "keep")?;
                for side_effect in side_effects {
                    write!(f, " {}", side_effect)?;
                }
                Ok(())
            }
        }
    }
}

/// Performs the actions of a finished script
pub trait ActionHandler {
    /// Store the message in its default mailbox
    fn keep(&mut self, side_effects: &[SideEffect]) -> Result<(), String>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptResult {
    actions: Vec<Action>,
}

impl ScriptResult {
    pub fn new() -> Self {
        ScriptResult::default()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Add a keep. Repeated keeps merge into one, collecting side effects.
    pub fn add_keep(&mut self, side_effects: Vec<SideEffect>) {
        if let Some(Action::Keep {
            side_effects: existing,
        }) = self.actions.first_mut()
        {
            for side_effect in side_effects {
                if !existing.contains(&side_effect) {
                    existing.push(side_effect);
                }
            }
            return;
        }
        self.actions.push(Action::Keep { side_effects });
    }

    /// Hand every action to `handler`. Without explicit actions the message
    /// is kept implicitly.
    pub fn commit(
        &self,
        handler: &mut dyn ActionHandler,
        ehandler: &mut ErrorHandler,
    ) -> ExecStatus {
        if self.actions.is_empty() {
            info!("No actions; performing implicit keep");
            return Self::keep(handler, ehandler, &[], "implicit keep");
        }

        let mut status = ExecStatus::Ok;
        for action in &self.actions {
            info!("Committing {}", action);
            let Action::Keep { side_effects } = action;
            status = status.combine(Self::keep(handler, ehandler, side_effects, "keep"));
        }
        status
    }

    fn keep(
        handler: &mut dyn ActionHandler,
        ehandler: &mut ErrorHandler,
        side_effects: &[SideEffect],
        what: &str,
    ) -> ExecStatus {
        match handler.keep(side_effects) {
            Ok(()) => ExecStatus::Ok,
            Err(reason) => {
                ehandler.record_error(
                    "result",
                    format_args!("{} failed to store message: {}", what, reason),
                );
                ExecStatus::KeepFailed
            }
        }
    }
}

/// Read the side-effect block of an action
pub fn read_side_effects(
    view: &CodeView<'_>,
    address: &mut usize,
) -> Result<Vec<SideEffect>, CorruptBytecode> {
    let mut side_effects = Vec::new();
    loop {
        let marker_address = *address;
        match view.read_byte(address)? {
            OPT_END => return Ok(side_effects),
            OPT_SIDE_EFFECT => {
                let operand = view.read_operand(address)?;
                match operand.kind {
                    OperandKind::Extension { def, .. } => {
                        side_effects.push((def.read)(view, address)?)
                    }
                    _ => {
                        return Err(CorruptBytecode::new(
                            operand.address,
                            format!("expected side effect but found {}", operand.kind.name()),
                        ))
                    }
                }
            }
            other => {
                return Err(CorruptBytecode::new(
                    marker_address,
                    format!("unknown optional operand {}", other),
                ))
            }
        }
    }
}

fn generate_keep(gen: &mut CodeGenerator<'_>, cmd: &Command) -> Result<(), CompilerError> {
    gen.emit_operation(&KEEP)?;
    gen.emit_optional_arguments(cmd, |gen, name, value| {
        gen.emit_side_effect(cmd, name, value)
    })
}

fn dump_keep(denv: &mut DumpEnv<'_>, address: &mut usize) -> bool {
    denv.dump_optional_operands(address, |_, _, _| false)
}

fn execute_keep(env: &mut RuntimeEnv<'_>, address: &mut usize) -> ExecStatus {
    let side_effects = match read_side_effects(&env.view, address) {
        Ok(side_effects) => side_effects,
        Err(err) => return env.corrupt(err),
    };

    if env.trace_enabled(TraceLevel::Actions) {
        let action = Action::Keep {
            side_effects: side_effects.clone(),
        };
        env.trace(TraceLevel::Actions, format_args!("{}", action));
    }
    debug!("Keep with {} side effects", side_effects.len());
    env.result.add_keep(side_effects);
    ExecStatus::Ok
}
