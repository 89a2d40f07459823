//! Operation descriptors and the operation header codec.
//!
//! An operation record starts with a one-byte header. Values below
//! `OPERATION_CUSTOM` are core opcodes; `OPERATION_CUSTOM + i` names the
//! extension linked at binary-local index `i` and is followed by that
//! extension's own opcode byte.

use crate::binary::{Binary, BinaryError, CorruptBytecode};
use crate::disassembler::DumpEnv;
use crate::extension::{ExtensionId, RegistryError};
use crate::interpreter::ExecStatus;
use crate::operand::CodeView;
use crate::runtime::RuntimeEnv;
use std::fmt;

pub const OPERATION_CUSTOM: u8 = 0x40;

/// Render the operands of an operation; false when they cannot be decoded
pub type DumpFn = fn(&mut DumpEnv<'_>, &mut usize) -> bool;

/// Decode the operands of an operation and carry it out
pub type ExecuteFn = fn(&mut RuntimeEnv<'_>, &mut usize) -> ExecStatus;

pub struct OperationDef {
    pub mnemonic: &'static str,
    /// Owning extension, `None` for core operations
    pub extension: Option<&'static str>,
    pub code: u8,
    pub dump: DumpFn,
    pub execute: ExecuteFn,
}

impl fmt::Debug for OperationDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OperationDef")
            .field("mnemonic", &self.mnemonic)
            .field("extension", &self.extension)
            .field("code", &self.code)
            .finish()
    }
}

/// An operation header decoded against a registry
#[derive(Debug, Clone, Copy)]
pub struct ResolvedOperation {
    pub address: usize,
    pub extension: Option<ExtensionId>,
    pub def: &'static OperationDef,
}

/// Emit the header of `def`, linking its extension into the binary if needed
pub fn emit_operation(binary: &mut Binary, def: &OperationDef) -> Result<usize, BinaryError> {
    match def.extension {
        None => Ok(binary.emit_byte(def.code)),
        Some(name) => {
            let index = binary.link_extension(name)?;
            let address = binary.emit_byte(OPERATION_CUSTOM + index);
            binary.emit_byte(def.code);
            Ok(address)
        }
    }
}

/// Read and resolve an operation header
pub fn read_operation(
    view: &CodeView<'_>,
    address: &mut usize,
) -> Result<ResolvedOperation, CorruptBytecode> {
    let start = *address;
    let header = view.read_byte(address)?;

    let (extension, code) = if header < OPERATION_CUSTOM {
        (None, header)
    } else {
        let extension = view.linked_extension(header - OPERATION_CUSTOM, start)?;
        (Some(extension), view.read_byte(address)?)
    };

    let def = view
        .registry
        .resolve(extension, code)
        .map_err(|err: RegistryError| CorruptBytecode::new(start, err.to_string()))?;

    Ok(ResolvedOperation {
        address: start,
        extension,
        def,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::STOP;
    use crate::extension::Registry;
    use crate::plugins::imap4flags::HASFLAG;
    use test_log::test;

    #[test]
    fn test_core_and_extension_headers() {
        let registry = Registry::standard().unwrap();
        let mut binary = Binary::new();
        assert_eq!(emit_operation(&mut binary, &STOP).unwrap(), 0);
        assert_eq!(emit_operation(&mut binary, &HASFLAG).unwrap(), 1);
        assert_eq!(binary.code(), &[0x03, 0x40, 0x03]);
        assert_eq!(binary.extensions(), &["imap4flags".to_string()]);

        let view = CodeView::link(&binary, &registry).unwrap();
        let mut address = 0;
        let op = read_operation(&view, &mut address).unwrap();
        assert!(std::ptr::eq(op.def, &STOP));
        assert_eq!(op.extension, None);

        let op = read_operation(&view, &mut address).unwrap();
        assert!(std::ptr::eq(op.def, &HASFLAG));
        assert_eq!(op.address, 1);
        assert_eq!(address, 3);
    }

    #[test]
    fn test_unknown_opcode_is_corrupt() {
        let registry = Registry::standard().unwrap();
        let binary = Binary::from_parts(vec![0x3F], Vec::new());
        let view = CodeView::link(&binary, &registry).unwrap();
        let mut address = 0;
        let err = read_operation(&view, &mut address).unwrap_err();
        assert_eq!(err.address, 0);
        assert!(err.reason.contains("unknown operation"));

        // Unknown opcode within a known extension
        let binary = Binary::from_parts(vec![0x40, 0x77], vec!["imap4flags".to_string()]);
        let view = CodeView::link(&binary, &registry).unwrap();
        let mut address = 0;
        assert!(read_operation(&view, &mut address).is_err());

        // Truncated extension header
        let binary = Binary::from_parts(vec![0x40], vec!["imap4flags".to_string()]);
        let view = CodeView::link(&binary, &registry).unwrap();
        let mut address = 0;
        assert!(read_operation(&view, &mut address).is_err());
    }
}
