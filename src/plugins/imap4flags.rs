//! The imap4flags extension: `setflag`, `addflag`, `removeflag`, the
//! `hasflag` test and the `:flags` side effect of `keep`.
//!
//! Commands act on the internal flag variable unless a variable is named
//! first, in which case that variable's value is treated as a flag list.

use crate::actions::SideEffect;
use crate::binary::CorruptBytecode;
use crate::compiler::codegen::invalid_argument;
use crate::compiler::{Argument, CodeGenerator, Command, CommandDef, CommandKind, CompilerError};
use crate::config::TraceLevel;
use crate::disassembler::DumpEnv;
use crate::extension::{ExtensionDef, OperandDef};
use crate::interpreter::ExecStatus;
use crate::matching::{read_match_optional, Comparator, KeyList, MatchContext, MatchOptions};
use crate::operand::{CodeView, VariableRef};
use crate::operation::OperationDef;
use crate::plugins::flags::FlagSet;
use crate::runtime::RuntimeEnv;
use crate::stringlist::CodedStringList;
use log::debug;

pub const NAME: &str = "imap4flags";

pub const OPCODE_SETFLAG: u8 = 0x00;
pub const OPCODE_ADDFLAG: u8 = 0x01;
pub const OPCODE_REMOVEFLAG: u8 = 0x02;
pub const OPCODE_HASFLAG: u8 = 0x03;

pub const OPERAND_FLAGS: u8 = 0x00;

pub static SETFLAG: OperationDef = OperationDef {
    mnemonic: "SETFLAG",
    extension: Some(NAME),
    code: OPCODE_SETFLAG,
    dump: dump_flag_command,
    execute: execute_setflag,
};

pub static ADDFLAG: OperationDef = OperationDef {
    mnemonic: "ADDFLAG",
    extension: Some(NAME),
    code: OPCODE_ADDFLAG,
    dump: dump_flag_command,
    execute: execute_addflag,
};

pub static REMOVEFLAG: OperationDef = OperationDef {
    mnemonic: "REMOVEFLAG",
    extension: Some(NAME),
    code: OPCODE_REMOVEFLAG,
    dump: dump_flag_command,
    execute: execute_removeflag,
};

pub static HASFLAG: OperationDef = OperationDef {
    mnemonic: "HASFLAG",
    extension: Some(NAME),
    code: OPCODE_HASFLAG,
    dump: dump_hasflag,
    execute: execute_hasflag,
};

pub static FLAGS_OPERAND: OperandDef = OperandDef {
    name: "flags",
    extension: NAME,
    code: OPERAND_FLAGS,
    tag: "flags",
    read: read_flags_side_effect,
    dump: dump_flags_side_effect,
};

pub static SETFLAG_COMMAND: CommandDef = CommandDef {
    identifier: "setflag",
    kind: CommandKind::Command,
    generate: generate_flag_command,
};

pub static ADDFLAG_COMMAND: CommandDef = CommandDef {
    identifier: "addflag",
    kind: CommandKind::Command,
    generate: generate_flag_command,
};

pub static REMOVEFLAG_COMMAND: CommandDef = CommandDef {
    identifier: "removeflag",
    kind: CommandKind::Command,
    generate: generate_flag_command,
};

pub static HASFLAG_COMMAND: CommandDef = CommandDef {
    identifier: "hasflag",
    kind: CommandKind::Test,
    generate: generate_hasflag,
};

pub static EXTENSION: ExtensionDef = ExtensionDef {
    name: NAME,
    operations: &[&SETFLAG, &ADDFLAG, &REMOVEFLAG, &HASFLAG],
    operands: &[&FLAGS_OPERAND],
    commands: &[
        &SETFLAG_COMMAND,
        &ADDFLAG_COMMAND,
        &REMOVEFLAG_COMMAND,
        &HASFLAG_COMMAND,
    ],
};

/// Per-run state: the internal flag variable
#[derive(Debug, Clone, Default)]
pub struct FlagContext {
    pub flags: FlagSet,
}

/// Current value of the internal flag variable
pub fn current_flags(env: &RuntimeEnv<'_>) -> FlagSet {
    env.existing_context::<FlagContext>()
        .map(|ctx| ctx.flags.clone())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagOp {
    Set,
    Add,
    Remove,
}

impl FlagOp {
    fn command(self) -> &'static str {
        match self {
            FlagOp::Set => "setflag",
            FlagOp::Add => "addflag",
            FlagOp::Remove => "removeflag",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FlagTarget {
    Internal,
    Variable(VariableRef),
}

// ---- code generation ----

/// Check `[<variable>] <list>` and emit it
fn emit_target_and_list(gen: &mut CodeGenerator<'_>, cmd: &Command) -> Result<(), CompilerError> {
    let positional: Vec<&Argument> = cmd.positional().collect();
    match positional.as_slice() {
        [Argument::String(_) | Argument::StringList(_)] => {}
        [Argument::Variable(_), Argument::String(_) | Argument::StringList(_)] => {}
        [] => return Err(invalid_argument(cmd, "missing flag list".to_string())),
        _ => {
            return Err(invalid_argument(
                cmd,
                "expected an optional variable followed by a string list".to_string(),
            ))
        }
    }
    gen.emit_positional_arguments(cmd)
}

fn generate_flag_command(gen: &mut CodeGenerator<'_>, cmd: &Command) -> Result<(), CompilerError> {
    let def = match cmd.identifier.as_str() {
        "setflag" => &SETFLAG,
        "addflag" => &ADDFLAG,
        _ => &REMOVEFLAG,
    };
    if cmd.arguments.iter().any(|a| !a.is_positional()) {
        return Err(invalid_argument(cmd, "takes no tagged arguments".to_string()));
    }
    gen.emit_operation(def)?;
    emit_target_and_list(gen, cmd)
}

fn generate_hasflag(gen: &mut CodeGenerator<'_>, cmd: &Command) -> Result<(), CompilerError> {
    gen.emit_operation(&HASFLAG)?;
    gen.emit_optional_arguments(cmd, |_, _, _| Ok(false))?;
    emit_target_and_list(gen, cmd)
}

// ---- side effect ----

fn read_flags_side_effect(
    view: &CodeView<'_>,
    address: &mut usize,
) -> Result<SideEffect, CorruptBytecode> {
    let list = view.read_stringlist(address)?;
    let mut flags = FlagSet::new();
    for item in list.iter() {
        for rejected in flags.insert_item(&item?) {
            debug!("Ignoring invalid flag '{}' in :flags", rejected);
        }
    }
    Ok(SideEffect {
        extension: NAME,
        name: "flags",
        values: flags.iter().map(|s| s.to_string()).collect(),
    })
}

fn dump_flags_side_effect(denv: &mut DumpEnv<'_>, address: &mut usize) -> bool {
    denv.dump_stringlist(address, "flags")
}

// ---- dump ----

/// Dump `[<variable>] <list>`
fn dump_target_and_list(denv: &mut DumpEnv<'_>, address: &mut usize, list_label: &str) -> bool {
    let mut peek = *address;
    let is_variable = match denv.view.read_operand(&mut peek) {
        Ok(operand) => operand.is_variable(),
        Err(_) => return false,
    };
    if is_variable && !denv.dump_operand(address, Some("variable")) {
        return false;
    }
    denv.dump_stringlist(address, list_label)
}

fn dump_flag_command(denv: &mut DumpEnv<'_>, address: &mut usize) -> bool {
    dump_target_and_list(denv, address, "list of flags")
}

fn dump_hasflag(denv: &mut DumpEnv<'_>, address: &mut usize) -> bool {
    denv.dump_optional_operands(address, |_, _, _| false)
        && dump_target_and_list(denv, address, "list of keys")
}

// ---- execution ----

/// Read `[<variable>] <list>`. A bare list targets the internal variable.
fn read_target_and_list<'a>(
    view: &CodeView<'a>,
    address: &mut usize,
    what: &str,
) -> Result<(FlagTarget, CodedStringList<'a>), CorruptBytecode> {
    let operand = view.read_operand(address)?;
    if operand.is_variable() {
        let var = view.read_variable_data(&operand, address)?;
        let list = view.read_stringlist(address)?;
        Ok((FlagTarget::Variable(var), list))
    } else if operand.is_stringlist() {
        let list = view.read_stringlist_data(&operand, address)?;
        Ok((FlagTarget::Internal, list))
    } else {
        Err(CorruptBytecode::new(
            operand.address,
            format!(
                "expected variable or string-list ({}) operand but found {}",
                what,
                operand.kind.name()
            ),
        ))
    }
}

/// Raw value of a flag variable; `None` when the storage does not exist
fn variable_value(env: &RuntimeEnv<'_>, var: VariableRef) -> Option<String> {
    env.storage(var.storage)
        .map(|storage| storage.get(var.slot).unwrap_or_default().to_string())
}

fn execute_setflag(env: &mut RuntimeEnv<'_>, address: &mut usize) -> ExecStatus {
    execute_flag_command(env, address, FlagOp::Set)
}

fn execute_addflag(env: &mut RuntimeEnv<'_>, address: &mut usize) -> ExecStatus {
    execute_flag_command(env, address, FlagOp::Add)
}

fn execute_removeflag(env: &mut RuntimeEnv<'_>, address: &mut usize) -> ExecStatus {
    execute_flag_command(env, address, FlagOp::Remove)
}

fn execute_flag_command(env: &mut RuntimeEnv<'_>, address: &mut usize, op: FlagOp) -> ExecStatus {
    let (target, list) = match read_target_and_list(&env.view, address, "flag-list") {
        Ok(read) => read,
        Err(err) => return env.corrupt(err),
    };
    env.trace(TraceLevel::Commands, format_args!("{} command", op.command()));

    let (current, raw) = match target {
        FlagTarget::Internal => (current_flags(env), None),
        FlagTarget::Variable(var) => match variable_value(env, var) {
            Some(value) => (FlagSet::parse(&value), Some(value)),
            None => {
                return env.corrupt(CorruptBytecode::new(
                    env.operation_address(),
                    format!("unknown variable storage {}", var.storage),
                ))
            }
        },
    };

    // Stage every change; nothing is committed unless the whole list decodes
    let mut staged = match op {
        FlagOp::Set => FlagSet::new(),
        FlagOp::Add | FlagOp::Remove => current.clone(),
    };
    let mut rejected = Vec::new();
    for item in list.iter() {
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                env.trace_error(format_args!("invalid flag-list item: {}", err));
                return ExecStatus::BinCorrupt;
            }
        };
        match op {
            FlagOp::Set | FlagOp::Add => {
                rejected.extend(staged.insert_item(&item).into_iter().map(str::to_string))
            }
            FlagOp::Remove => staged.remove_item(&item),
        }
    }
    for flag in rejected {
        env.trace_warning(format_args!("{}: ignoring invalid flag '{}'", op.command(), flag));
    }

    env.trace_debug(TraceLevel::Commands, format_args!("flags are now \"{}\"", staged));
    match target {
        FlagTarget::Internal => {
            env.extension_context::<FlagContext>().flags = staged;
            ExecStatus::Ok
        }
        FlagTarget::Variable(var) => {
            let raw = raw.unwrap_or_default();
            commit_variable(env, var, op, &current, &raw, &staged)
        }
    }
}

fn commit_variable(
    env: &mut RuntimeEnv<'_>,
    var: VariableRef,
    op: FlagOp,
    current: &FlagSet,
    raw: &str,
    staged: &FlagSet,
) -> ExecStatus {
    let stored = match (op, env.storage_mut(var.storage)) {
        (_, None) => false,
        (FlagOp::Add, Some(storage)) => {
            let added: Vec<&str> = staged.iter().filter(|f| !current.contains(f)).collect();
            if added.is_empty() {
                true
            } else if raw.is_empty() {
                storage.append(var.slot, &added.join(" "))
            } else {
                storage.append(var.slot, &format!(" {}", added.join(" ")))
            }
        }
        (_, Some(storage)) => storage.set(var.slot, &staged.to_string()),
    };
    if !stored {
        env.trace_error(format_args!(
            "{}: cannot store flags in variable {}:{}",
            op.command(),
            var.storage,
            var.slot
        ));
        return ExecStatus::Failure;
    }
    ExecStatus::Ok
}

fn execute_hasflag(env: &mut RuntimeEnv<'_>, address: &mut usize) -> ExecStatus {
    let options = match read_match_optional(
        &env.view,
        address,
        MatchOptions::with_comparator(Comparator::AsciiCasemap),
        |_, _, _| Ok(false),
    ) {
        Ok(options) => options,
        Err(err) => return env.corrupt(err),
    };
    let (target, keys) = match read_target_and_list(&env.view, address, "key-list") {
        Ok(read) => read,
        Err(err) => return env.corrupt(err),
    };
    env.trace(TraceLevel::Tests, format_args!("hasflag test"));

    let flags = match target {
        FlagTarget::Internal => current_flags(env),
        FlagTarget::Variable(var) => match variable_value(env, var) {
            Some(value) => FlagSet::parse(&value),
            None => {
                return env.corrupt(CorruptBytecode::new(
                    env.operation_address(),
                    format!("unknown variable storage {}", var.storage),
                ))
            }
        },
    };

    let matched = MatchContext::begin(options, KeyList::Coded(keys)).match_values(flags.iter());
    match matched {
        Ok(matched) => {
            env.trace(
                TraceLevel::Matching,
                format_args!("flags \"{}\" {}", flags, if matched { "matched" } else { "did not match" }),
            );
            env.test_result = matched;
            ExecStatus::Ok
        }
        Err(err) => {
            env.trace_error(format_args!("invalid string-list item: {}", err));
            ExecStatus::BinCorrupt
        }
    }
}
