//! Core control flow: jumps, `if` and `stop`.

use crate::binary::read_i32;
use crate::compiler::{CodeGenerator, Command, CommandDef, CommandKind, CompilerError};
use crate::config::TraceLevel;
use crate::disassembler::DumpEnv;
use crate::interpreter::ExecStatus;
use crate::operation::OperationDef;
use crate::runtime::RuntimeEnv;

pub const OPCODE_JMP: u8 = 0x00;
pub const OPCODE_JMPTRUE: u8 = 0x01;
pub const OPCODE_JMPFALSE: u8 = 0x02;
pub const OPCODE_STOP: u8 = 0x03;

pub static JMP: OperationDef = OperationDef {
    mnemonic: "JMP",
    extension: None,
    code: OPCODE_JMP,
    dump: dump_jump,
    execute: execute_jmp,
};

pub static JMPTRUE: OperationDef = OperationDef {
    mnemonic: "JMPTRUE",
    extension: None,
    code: OPCODE_JMPTRUE,
    dump: dump_jump,
    execute: execute_jmptrue,
};

pub static JMPFALSE: OperationDef = OperationDef {
    mnemonic: "JMPFALSE",
    extension: None,
    code: OPCODE_JMPFALSE,
    dump: dump_jump,
    execute: execute_jmpfalse,
};

pub static STOP: OperationDef = OperationDef {
    mnemonic: "STOP",
    extension: None,
    code: OPCODE_STOP,
    dump: dump_none,
    execute: execute_stop,
};

pub static OPERATIONS: [&OperationDef; 4] = [&JMP, &JMPTRUE, &JMPFALSE, &STOP];

pub static IF_COMMAND: CommandDef = CommandDef {
    identifier: "if",
    kind: CommandKind::Command,
    generate: generate_if,
};

pub static STOP_COMMAND: CommandDef = CommandDef {
    identifier: "stop",
    kind: CommandKind::Command,
    generate: generate_stop,
};

pub static COMMANDS: [&CommandDef; 2] = [&IF_COMMAND, &STOP_COMMAND];

fn generate_if(gen: &mut CodeGenerator<'_>, cmd: &Command) -> Result<(), CompilerError> {
    gen.generate_if(cmd)
}

fn generate_stop(gen: &mut CodeGenerator<'_>, _cmd: &Command) -> Result<(), CompilerError> {
    gen.emit_operation(&STOP)?;
    Ok(())
}

fn dump_jump(denv: &mut DumpEnv<'_>, address: &mut usize) -> bool {
    denv.dump_offset(address)
}

fn dump_none(_denv: &mut DumpEnv<'_>, _address: &mut usize) -> bool {
    true
}

/// Shared by all jumps: `when` is the test result required to take the jump,
/// `None` for an unconditional jump. The offset is validated either way.
fn execute_jump(env: &mut RuntimeEnv<'_>, address: &mut usize, when: Option<bool>) -> ExecStatus {
    let offset = match read_i32(env.view.code(), address, env.view.len()) {
        Ok(offset) => offset,
        Err(err) => return env.corrupt(err),
    };
    let target = match env.jump_target(*address, offset) {
        Ok(target) => target,
        Err(err) => return env.corrupt(err),
    };

    let taken = when.map_or(true, |expected| env.test_result == expected);
    if taken {
        env.trace_debug(
            TraceLevel::Commands,
            format_args!("jump to {:08x}", target),
        );
        *address = target;
    } else {
        env.trace_debug(TraceLevel::Commands, format_args!("not jumping"));
    }
    ExecStatus::Ok
}

fn execute_jmp(env: &mut RuntimeEnv<'_>, address: &mut usize) -> ExecStatus {
    execute_jump(env, address, None)
}

fn execute_jmptrue(env: &mut RuntimeEnv<'_>, address: &mut usize) -> ExecStatus {
    execute_jump(env, address, Some(true))
}

fn execute_jmpfalse(env: &mut RuntimeEnv<'_>, address: &mut usize) -> ExecStatus {
    execute_jump(env, address, Some(false))
}

fn execute_stop(env: &mut RuntimeEnv<'_>, _address: &mut usize) -> ExecStatus {
    env.trace(TraceLevel::Actions, format_args!("stop command; end all processing"));
    env.interrupted = true;
    ExecStatus::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::Binary;
    use crate::config::SieveConfig;
    use crate::error_handler::ErrorHandler;
    use crate::extension::Registry;
    use crate::interpreter::Interpreter;
    use test_log::test;

    fn run(code: Vec<u8>) -> (ExecStatus, bool, u32) {
        let registry = Registry::new();
        let binary = Binary::from_parts(code, Vec::new());
        let config = SieveConfig::default();
        let mut ehandler = ErrorHandler::new();
        let mut interp = Interpreter::new(&binary, &registry, &mut ehandler, &config).unwrap();
        let status = interp.run();
        let kept = !interp.result().is_empty();
        drop(interp);
        (status, kept, ehandler.error_count())
    }

    fn jump(opcode: u8, offset: i32) -> Vec<u8> {
        let mut code = vec![opcode];
        code.extend_from_slice(&offset.to_be_bytes());
        code
    }

    #[test]
    fn test_jmp_skips_code() {
        // JMP over a KEEP
        let mut code = jump(OPCODE_JMP, 2);
        code.extend_from_slice(&[0x04, 0x00]);
        assert_eq!(run(code), (ExecStatus::Ok, false, 0));
    }

    #[test]
    fn test_conditional_jumps_follow_test_result() {
        // The test-result register starts out false
        let mut code = jump(OPCODE_JMPFALSE, 2);
        code.extend_from_slice(&[0x04, 0x00]);
        assert_eq!(run(code), (ExecStatus::Ok, false, 0));

        let mut code = jump(OPCODE_JMPTRUE, 2);
        code.extend_from_slice(&[0x04, 0x00]);
        assert_eq!(run(code), (ExecStatus::Ok, true, 0));
    }

    #[test]
    fn test_jump_outside_code_is_corrupt() {
        assert_eq!(run(jump(OPCODE_JMP, 1)).0, ExecStatus::BinCorrupt);
        assert_eq!(run(jump(OPCODE_JMP, -6)).0, ExecStatus::BinCorrupt);
        // Even when the jump would not be taken
        let (status, _, errors) = run(jump(OPCODE_JMPTRUE, 100));
        assert_eq!(status, ExecStatus::BinCorrupt);
        assert_eq!(errors, 1);
        // Truncated offset
        assert_eq!(run(vec![OPCODE_JMP, 0x00]).0, ExecStatus::BinCorrupt);
    }

    #[test]
    fn test_stop_ends_run() {
        let code = vec![OPCODE_STOP, 0x04, 0x00];
        assert_eq!(run(code), (ExecStatus::Ok, false, 0));
    }
}
