//! Execution environment handed to every operation.
//!
//! Holds the linked code, the diagnostics sink, variable storages, the
//! script result, the test-result register and any per-run state that
//! extensions attach (looked up by type).

use crate::actions::ScriptResult;
use crate::binary::CorruptBytecode;
use crate::config::{TraceConfig, TraceLevel};
use crate::error_handler::ErrorHandler;
use crate::interpreter::ExecStatus;
use crate::operand::CodeView;
use crate::operation::ResolvedOperation;
use crate::variables::VariableStorage;
use log::info;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

pub const TRACE_TARGET: &str = "sieve::trace";

pub struct RuntimeEnv<'a> {
    pub view: CodeView<'a>,
    ehandler: &'a mut ErrorHandler,
    trace: TraceConfig,
    storages: Vec<Box<dyn VariableStorage>>,
    contexts: HashMap<TypeId, Box<dyn Any>>,
    pub result: ScriptResult,
    /// Outcome of the most recent test
    pub test_result: bool,
    /// Set by `stop`; the run ends after the current operation
    pub interrupted: bool,
    address: usize,
    operation: Option<ResolvedOperation>,
}

impl<'a> fmt::Debug for RuntimeEnv<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RuntimeEnv")
            .field("address", &self.address)
            .field("operation", &self.operation)
            .field("test_result", &self.test_result)
            .field("interrupted", &self.interrupted)
            .field("storages", &self.storages)
            .finish()
    }
}

impl<'a> RuntimeEnv<'a> {
    pub fn new(view: CodeView<'a>, ehandler: &'a mut ErrorHandler, trace: TraceConfig) -> Self {
        RuntimeEnv {
            view,
            ehandler,
            trace,
            storages: Vec::new(),
            contexts: HashMap::new(),
            result: ScriptResult::new(),
            test_result: false,
            interrupted: false,
            address: 0,
            operation: None,
        }
    }

    pub fn ehandler(&self) -> &ErrorHandler {
        &*self.ehandler
    }

    pub(crate) fn ehandler_mut(&mut self) -> &mut ErrorHandler {
        &mut *self.ehandler
    }

    /// Start decoding a new operation at `address`
    pub(crate) fn enter(&mut self, address: usize) {
        self.address = address;
        self.operation = None;
    }

    pub(crate) fn begin_operation(&mut self, op: ResolvedOperation) {
        self.address = op.address;
        self.operation = Some(op);
    }

    /// Address of the operation being executed
    pub fn operation_address(&self) -> usize {
        self.address
    }

    pub fn mnemonic(&self) -> &'static str {
        self.operation.map(|op| op.def.mnemonic).unwrap_or("<none>")
    }

    fn location(&self) -> String {
        format!("binary+{:08x}", self.operation_address())
    }

    pub fn trace_enabled(&self, level: TraceLevel) -> bool {
        level != TraceLevel::None && self.trace.level >= level
    }

    pub fn trace(&self, level: TraceLevel, args: fmt::Arguments<'_>) {
        if !self.trace_enabled(level) {
            return;
        }
        if self.trace.addresses {
            info!(target: TRACE_TARGET, "{:08x}: {}", self.operation_address(), args);
        } else {
            info!(target: TRACE_TARGET, "{}", args);
        }
    }

    /// Trace output that is only wanted while debugging scripts
    pub fn trace_debug(&self, level: TraceLevel, args: fmt::Arguments<'_>) {
        if self.trace.debug {
            self.trace(level, args);
        }
    }

    /// Record a runtime error against the current operation
    pub fn trace_error(&mut self, args: fmt::Arguments<'_>) {
        let location = self.location();
        self.ehandler.record_error(&location, args);
    }

    pub fn trace_warning(&mut self, args: fmt::Arguments<'_>) {
        let location = self.location();
        self.ehandler.record_warning(&location, args);
    }

    /// Report corrupt code found while executing the current operation
    pub fn corrupt(&mut self, err: CorruptBytecode) -> ExecStatus {
        let mnemonic = self.mnemonic();
        self.trace_error(format_args!("{}: {}", mnemonic, err));
        ExecStatus::BinCorrupt
    }

    /// Resolve a jump offset relative to `base`, the address right after the
    /// offset field. The end of the code is a valid target and ends the run.
    pub fn jump_target(&self, base: usize, offset: i32) -> Result<usize, CorruptBytecode> {
        let target = base as i64 + offset as i64;
        if target < 0 || target > self.view.len() as i64 {
            return Err(CorruptBytecode::new(
                self.operation_address(),
                format!("jump offset {} leads outside the code to {}", offset, target),
            ));
        }
        Ok(target as usize)
    }

    /// Attach a storage and return its handle. None once every handle a
    /// variable operand can name is taken.
    pub fn add_storage(&mut self, storage: Box<dyn VariableStorage>) -> Option<u8> {
        let handle = u8::try_from(self.storages.len()).ok()?;
        self.storages.push(storage);
        Some(handle)
    }

    pub fn storage(&self, handle: u8) -> Option<&dyn VariableStorage> {
        self.storages.get(handle as usize).map(|s| &**s)
    }

    pub fn storage_mut(&mut self, handle: u8) -> Option<&mut (dyn VariableStorage + 'static)> {
        self.storages.get_mut(handle as usize).map(|s| &mut **s)
    }

    /// Per-run state of an extension, created on first use
    pub fn extension_context<T: Any + Default>(&mut self) -> &mut T {
        let entry = self
            .contexts
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
        match entry.downcast_mut::<T>() {
            Some(context) => context,
            None => unreachable!("extension context stored under a foreign type id"),
        }
    }

    /// Per-run state of an extension, if it was ever created
    pub fn existing_context<T: Any>(&self) -> Option<&T> {
        self.contexts
            .get(&TypeId::of::<T>())
            .and_then(|c| c.downcast_ref::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::Binary;
    use crate::extension::Registry;
    use crate::variables::MemoryStorage;
    use test_log::test;

    #[derive(Debug, Default, PartialEq)]
    struct Counter(u32);

    #[test]
    fn test_extension_context_persists() {
        let registry = Registry::new();
        let binary = Binary::new();
        let mut ehandler = ErrorHandler::new();
        let view = CodeView::link(&binary, &registry).unwrap();
        let mut env = RuntimeEnv::new(view, &mut ehandler, TraceConfig::default());

        assert!(env.existing_context::<Counter>().is_none());
        env.extension_context::<Counter>().0 += 2;
        env.extension_context::<Counter>().0 += 1;
        assert_eq!(env.existing_context::<Counter>(), Some(&Counter(3)));
    }

    #[test]
    fn test_jump_bounds() {
        let registry = Registry::new();
        let binary = Binary::from_parts(vec![0; 10], Vec::new());
        let mut ehandler = ErrorHandler::new();
        let view = CodeView::link(&binary, &registry).unwrap();
        let env = RuntimeEnv::new(view, &mut ehandler, TraceConfig::default());

        assert_eq!(env.jump_target(5, 5), Ok(10));
        assert_eq!(env.jump_target(5, -5), Ok(0));
        assert!(env.jump_target(5, 6).is_err());
        assert!(env.jump_target(5, -6).is_err());
    }

    #[test]
    fn test_storage_handles_run_out() {
        let registry = Registry::new();
        let binary = Binary::new();
        let mut ehandler = ErrorHandler::new();
        let view = CodeView::link(&binary, &registry).unwrap();
        let mut env = RuntimeEnv::new(view, &mut ehandler, TraceConfig::default());
        for handle in 0..=255u8 {
            assert_eq!(env.add_storage(Box::new(MemoryStorage::new(1, 16))), Some(handle));
        }
        assert_eq!(env.add_storage(Box::new(MemoryStorage::new(1, 16))), None);

        // Handle 0 still names the first storage
        env.storage_mut(0).unwrap().set(0, "first");
        assert_eq!(env.storage(255).unwrap().get(0), None);
        assert_eq!(env.storage(0).unwrap().get(0), Some("first"));
    }

    #[test]
    fn test_corrupt_records_one_error() {
        let registry = Registry::new();
        let binary = Binary::new();
        let mut ehandler = ErrorHandler::new();
        {
            let view = CodeView::link(&binary, &registry).unwrap();
            let mut env = RuntimeEnv::new(view, &mut ehandler, TraceConfig::default());
            let slot = env.add_storage(Box::new(MemoryStorage::new(1, 16)));
            assert_eq!(slot, Some(0));
            assert!(env.storage(1).is_none());

            let status = env.corrupt(CorruptBytecode::new(4, "bad"));
            assert_eq!(status, ExecStatus::BinCorrupt);
        }
        assert_eq!(ehandler.error_count(), 1);
        assert_eq!(
            ehandler.diagnostics()[0].to_string(),
            "binary+00000000: error: <none>: corrupt bytecode at 00000004: bad"
        );
    }
}
