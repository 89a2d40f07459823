use crate::actions::{ActionHandler, ScriptResult};
use crate::binary::{Binary, BinaryError};
use crate::config::{SieveConfig, TraceLevel};
use crate::error_handler::ErrorHandler;
use crate::extension::Registry;
use crate::operand::CodeView;
use crate::operation::read_operation;
use crate::runtime::RuntimeEnv;
use crate::variables::{MemoryStorage, VariableStorage};
use log::{debug, info};
use std::fmt;

/// Outcome of executing an operation or a whole script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Continue execution normally
    Ok,
    /// Runtime failure; the script could not complete
    Failure,
    /// The binary is inconsistent and must be recompiled
    BinCorrupt,
    /// The script ran but storing the message failed
    KeepFailed,
}

impl ExecStatus {
    pub fn code(self) -> i32 {
        match self {
            ExecStatus::Ok => 1,
            ExecStatus::Failure => 0,
            ExecStatus::BinCorrupt => -1,
            ExecStatus::KeepFailed => -2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ExecStatus::Ok),
            0 => Some(ExecStatus::Failure),
            -1 => Some(ExecStatus::BinCorrupt),
            -2 => Some(ExecStatus::KeepFailed),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ExecStatus::Ok
    }

    /// Merge two outcomes: corruption wins, then the first failure
    pub fn combine(self, other: ExecStatus) -> ExecStatus {
        if self == ExecStatus::BinCorrupt || other == ExecStatus::BinCorrupt {
            ExecStatus::BinCorrupt
        } else if self != ExecStatus::Ok {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ExecStatus::Ok => "ok",
            ExecStatus::Failure => "failure",
            ExecStatus::BinCorrupt => "binary corrupt",
            ExecStatus::KeepFailed => "keep failed",
        };
        write!(f, "{}", name)
    }
}

/// Executes a binary from its first operation until the code runs out, a
/// `stop` is executed or an operation returns something other than `Ok`
pub struct Interpreter<'a> {
    env: RuntimeEnv<'a>,
    pc: usize,
    max_operations: Option<u64>,
}

impl<'a> Interpreter<'a> {
    /// Link `binary` against `registry` and prepare a run. Storage 0 is an
    /// in-memory storage sized from the configured limits.
    pub fn new(
        binary: &'a Binary,
        registry: &'a Registry,
        ehandler: &'a mut ErrorHandler,
        config: &SieveConfig,
    ) -> Result<Self, BinaryError> {
        let view = CodeView::link(binary, registry)?;
        let mut env = RuntimeEnv::new(view, ehandler, config.trace.clone());
        env.add_storage(Box::new(MemoryStorage::new(
            config.limits.max_variables,
            config.limits.max_variable_size,
        )));

        Ok(Interpreter {
            env,
            pc: 0,
            max_operations: config.limits.max_operations,
        })
    }

    /// Attach another variable storage and return its handle
    pub fn add_storage(&mut self, storage: Box<dyn VariableStorage>) -> Option<u8> {
        self.env.add_storage(storage)
    }

    pub fn storage(&self, handle: u8) -> Option<&dyn VariableStorage> {
        self.env.storage(handle)
    }

    pub fn storage_mut(&mut self, handle: u8) -> Option<&mut (dyn VariableStorage + 'static)> {
        self.env.storage_mut(handle)
    }

    pub fn env(&self) -> &RuntimeEnv<'a> {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut RuntimeEnv<'a> {
        &mut self.env
    }

    pub fn ehandler(&self) -> &ErrorHandler {
        self.env.ehandler()
    }

    pub fn test_result(&self) -> bool {
        self.env.test_result
    }

    pub fn result(&self) -> &ScriptResult {
        &self.env.result
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn run(&mut self) -> ExecStatus {
        let code_len = self.env.view.len();
        info!("Running binary of {} bytes", code_len);
        self.pc = 0;
        self.env.interrupted = false;
        let mut executed: u64 = 0;

        while self.pc < code_len {
            if let Some(limit) = self.max_operations {
                if executed >= limit {
                    self.env.enter(self.pc);
                    self.env
                        .trace_error(format_args!("execution aborted after {} operations", limit));
                    return ExecStatus::Failure;
                }
            }
            executed += 1;

            self.env.enter(self.pc);
            let op = match read_operation(&self.env.view, &mut self.pc) {
                Ok(op) => op,
                Err(err) => return self.env.corrupt(err),
            };
            self.env.begin_operation(op);
            debug!("{:08x}: {}", op.address, op.def.mnemonic);
            self.env
                .trace(TraceLevel::Commands, format_args!("{}", op.def.mnemonic));

            let status = (op.def.execute)(&mut self.env, &mut self.pc);
            if status != ExecStatus::Ok {
                debug!("{} at {:08x} returned {}", op.def.mnemonic, op.address, status);
                return status;
            }
            if self.env.interrupted {
                debug!("Execution stopped at {:08x}", op.address);
                break;
            }
        }

        info!("Run finished after {} operations", executed);
        ExecStatus::Ok
    }

    /// Run the script and commit its result through `handler`
    pub fn execute(&mut self, handler: &mut dyn ActionHandler) -> ExecStatus {
        let status = self.run();
        if status != ExecStatus::Ok {
            return status;
        }
        let result = self.env.result.clone();
        result.commit(handler, self.env.ehandler_mut())
    }
}
