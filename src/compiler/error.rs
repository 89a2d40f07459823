// Compiler Error Handling

use crate::binary::BinaryError;
use crate::compiler::CommandKind;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CompilerError {
    // Command tree errors
    ParseError(String),
    UnknownCommand(String, u32), // identifier, line
    WrongCommandKind(String, CommandKind, u32), // identifier, expected kind, line
    InvalidArgument(String, String, u32), // command, reason, line

    // Code generation errors
    BinaryError(BinaryError),

    // IO errors
    IOError(String),
}

impl CompilerError {
    /// Source line the error refers to, when there is one
    pub fn line(&self) -> Option<u32> {
        match self {
            CompilerError::UnknownCommand(_, line)
            | CompilerError::WrongCommandKind(_, _, line)
            | CompilerError::InvalidArgument(_, _, line) => Some(*line),
            _ => None,
        }
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompilerError::ParseError(msg) => write!(f, "invalid command tree: {}", msg),
            CompilerError::UnknownCommand(identifier, _) => {
                write!(f, "unknown command '{}'", identifier)
            }
            CompilerError::WrongCommandKind(identifier, expected, _) => match expected {
                CommandKind::Test => write!(f, "'{}' cannot be used as a test", identifier),
                CommandKind::Command => write!(f, "test '{}' cannot be used as a command", identifier),
            },
            CompilerError::InvalidArgument(command, reason, _) => {
                write!(f, "invalid argument for '{}': {}", command, reason)
            }
            CompilerError::BinaryError(err) => write!(f, "code generation failed: {}", err),
            CompilerError::IOError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for CompilerError {}

impl From<BinaryError> for CompilerError {
    fn from(err: BinaryError) -> Self {
        CompilerError::BinaryError(err)
    }
}

impl From<std::io::Error> for CompilerError {
    fn from(err: std::io::Error) -> Self {
        CompilerError::IOError(err.to_string())
    }
}
