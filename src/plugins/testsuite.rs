//! Testsuite support: the `test_error` test matches against the errors
//! recorded so far during the run.

use crate::compiler::codegen::invalid_argument;
use crate::compiler::{Argument, CodeGenerator, Command, CommandDef, CommandKind, CompilerError};
use crate::config::TraceLevel;
use crate::disassembler::DumpEnv;
use crate::extension::ExtensionDef;
use crate::interpreter::ExecStatus;
use crate::matching::{read_match_optional, Comparator, KeyList, MatchContext, MatchOptions};
use crate::operand::{emit_number, OPT_FIRST_FREE};
use crate::operation::OperationDef;
use crate::runtime::RuntimeEnv;

pub const NAME: &str = "testsuite";

pub const OPCODE_TEST_ERROR: u8 = 0x00;

/// Optional operand carrying `:index`
pub const OPT_INDEX: u8 = OPT_FIRST_FREE;

pub static TEST_ERROR: OperationDef = OperationDef {
    mnemonic: "TEST_ERROR",
    extension: Some(NAME),
    code: OPCODE_TEST_ERROR,
    dump: dump_test_error,
    execute: execute_test_error,
};

pub static TEST_ERROR_COMMAND: CommandDef = CommandDef {
    identifier: "test_error",
    kind: CommandKind::Test,
    generate: generate_test_error,
};

pub static EXTENSION: ExtensionDef = ExtensionDef {
    name: NAME,
    operations: &[&TEST_ERROR],
    operands: &[],
    commands: &[&TEST_ERROR_COMMAND],
};

fn generate_test_error(gen: &mut CodeGenerator<'_>, cmd: &Command) -> Result<(), CompilerError> {
    gen.emit_operation(&TEST_ERROR)?;
    gen.emit_optional_arguments(cmd, |gen, name, value| {
        if name != "index" {
            return Ok(false);
        }
        match value {
            Some(Argument::Number(index)) => {
                gen.binary_mut().emit_byte(OPT_INDEX);
                emit_number(gen.binary_mut(), *index);
                Ok(true)
            }
            _ => Err(invalid_argument(cmd, ":index needs a number".to_string())),
        }
    })?;

    let positional: Vec<&Argument> = cmd.positional().collect();
    match positional.as_slice() {
        [Argument::String(_) | Argument::StringList(_)] => gen.emit_positional_arguments(cmd),
        _ => Err(invalid_argument(cmd, "expected a key list".to_string())),
    }
}

fn dump_test_error(denv: &mut DumpEnv<'_>, address: &mut usize) -> bool {
    denv.dump_optional_operands(address, |denv, marker, address| {
        marker == OPT_INDEX && denv.dump_number(address, "index")
    }) && denv.dump_stringlist(address, "key list")
}

fn execute_test_error(env: &mut RuntimeEnv<'_>, address: &mut usize) -> ExecStatus {
    let view = &env.view;
    let options = read_match_optional(
        view,
        address,
        MatchOptions::with_comparator(Comparator::Octet),
        |marker, address, options| {
            if marker != OPT_INDEX {
                return Ok(false);
            }
            options.index = view.read_number(address)?;
            Ok(true)
        },
    );
    let keys = options.and_then(|options| Ok((options, view.read_stringlist(address)?)));
    let (options, keys) = match keys {
        Ok(read) => read,
        Err(err) => return env.corrupt(err),
    };
    env.trace(
        TraceLevel::Tests,
        format_args!("TEST_ERROR test (index: {})", options.index),
    );

    let errors: Vec<String> = env
        .ehandler()
        .error_messages()
        .map(|s| s.to_string())
        .collect();
    match MatchContext::begin(options, KeyList::Coded(keys)).match_values(&errors) {
        Ok(matched) => {
            env.test_result = matched;
            ExecStatus::Ok
        }
        Err(err) => {
            env.trace_error(format_args!("invalid string-list item: {}", err));
            ExecStatus::BinCorrupt
        }
    }
}
