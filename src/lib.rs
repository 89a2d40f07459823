#![crate_name = "sieve"]

//! Bytecode core of a Sieve mail-filtering engine: code generation from a
//! validated command tree, the binary format, the interpreter and the
//! disassembler, plus the imap4flags and testsuite extensions.

#[macro_use]
extern crate lazy_static;

pub mod actions;
pub mod binary;
pub mod compiler;
pub mod config;
pub mod control;
pub mod disassembler;
pub mod error_handler;
pub mod extension;
pub mod interpreter;
pub mod matching;
pub mod operand;
pub mod operation;
pub mod plugins;
pub mod runtime;
pub mod stringlist;
pub mod variables;

pub use binary::{Binary, BinaryError, CorruptBytecode};
pub use config::SieveConfig;
pub use error_handler::ErrorHandler;
pub use extension::Registry;
pub use interpreter::{ExecStatus, Interpreter};
