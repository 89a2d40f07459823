// Code generator for command trees

pub mod ast;
pub mod codegen;
pub mod error;

pub use ast::{Argument, Command, Script};
pub use codegen::{compile, CodeGenerator, CommandDef, CommandKind, GenerateFn};
pub use error::CompilerError;
