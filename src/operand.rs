//! Operand codec.
//!
//! Every operand starts with a one-byte type tag. Tags below `OPERAND_CUSTOM`
//! belong to the core; a tag of `OPERAND_CUSTOM + i` hands decoding to the
//! extension linked at binary-local index `i`, whose operand code byte follows.
//!
//! ```text
//! NUMBER       01 <u32>
//! STRING       02 <u32 len> <utf-8 bytes>
//! STRING_LIST  03 <u32 count> <u32 region len> STRING*
//! COMPARATOR   04 <code>
//! MATCH_TYPE   05 <code> [<relation>]
//! VARIABLE     06 <storage> <u32 slot>
//! extension    10+i <operand code> ...
//! ```

use crate::binary::{read_bytes, read_u32, read_u8, Binary, BinaryError, CorruptBytecode};
use crate::extension::{ExtensionId, OperandDef, Registry};
use crate::matching::comparator::Comparator;
use crate::matching::match_type::{MatchType, Relation};
use crate::stringlist::CodedStringList;
use log::debug;
use serde::Deserialize;

pub const OPERAND_NUMBER: u8 = 0x01;
pub const OPERAND_STRING: u8 = 0x02;
pub const OPERAND_STRING_LIST: u8 = 0x03;
pub const OPERAND_COMPARATOR: u8 = 0x04;
pub const OPERAND_MATCH_TYPE: u8 = 0x05;
pub const OPERAND_VARIABLE: u8 = 0x06;
pub const OPERAND_CUSTOM: u8 = 0x10;

// Optional operand markers. A command with optional operands emits any number
// of (marker, operand) pairs terminated by OPT_END.
pub const OPT_END: u8 = 0x00;
pub const OPT_COMPARATOR: u8 = 0x01;
pub const OPT_MATCH_TYPE: u8 = 0x02;
pub const OPT_SIDE_EFFECT: u8 = 0x03;
/// First marker value free for command-specific options
pub const OPT_FIRST_FREE: u8 = 0x04;

/// Size of the tag + length header of a string operand
const STRING_HEADER_SIZE: usize = 5;

/// Variable storage handle plus slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct VariableRef {
    #[serde(default)]
    pub storage: u8,
    pub slot: u32,
}

/// Decoded operand header
#[derive(Debug, Clone, Copy)]
pub enum OperandKind {
    Number,
    String,
    StringList,
    Comparator,
    MatchType,
    Variable,
    Extension {
        extension: ExtensionId,
        def: &'static OperandDef,
    },
}

impl OperandKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperandKind::Number => "number",
            OperandKind::String => "string",
            OperandKind::StringList => "string-list",
            OperandKind::Comparator => "comparator",
            OperandKind::MatchType => "match-type",
            OperandKind::Variable => "variable",
            OperandKind::Extension { def, .. } => def.name,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Operand {
    /// Address of the type tag
    pub address: usize,
    pub kind: OperandKind,
}

impl Operand {
    pub fn is_variable(&self) -> bool {
        matches!(self.kind, OperandKind::Variable)
    }

    /// A plain string is accepted wherever a list is expected
    pub fn is_stringlist(&self) -> bool {
        matches!(self.kind, OperandKind::StringList | OperandKind::String)
    }
}

/// Fully decoded operand value, used for round trips and tooling
#[derive(Debug, Clone, PartialEq)]
pub enum OperandValue {
    Number(u32),
    String(String),
    StringList(Vec<String>),
    Comparator(Comparator),
    MatchType(MatchType),
    Variable(VariableRef),
}

// ---- encoding ----

pub fn emit_number(binary: &mut Binary, number: u32) -> usize {
    let address = binary.emit_byte(OPERAND_NUMBER);
    binary.emit_u32(number);
    address
}

pub fn emit_string(binary: &mut Binary, value: &str) -> usize {
    let address = binary.emit_byte(OPERAND_STRING);
    binary.emit_u32(value.len() as u32);
    binary.emit_bytes(value.as_bytes());
    address
}

pub fn emit_stringlist<S: AsRef<str>>(binary: &mut Binary, items: &[S]) -> usize {
    let region: usize = items
        .iter()
        .map(|s| STRING_HEADER_SIZE + s.as_ref().len())
        .sum();

    let address = binary.emit_byte(OPERAND_STRING_LIST);
    binary.emit_u32(items.len() as u32);
    binary.emit_u32(region as u32);
    for item in items {
        emit_string(binary, item.as_ref());
    }
    address
}

pub fn emit_comparator(binary: &mut Binary, cmp: Comparator) -> usize {
    let address = binary.emit_byte(OPERAND_COMPARATOR);
    binary.emit_byte(cmp.code());
    address
}

pub fn emit_match_type(binary: &mut Binary, mcht: MatchType) -> usize {
    let address = binary.emit_byte(OPERAND_MATCH_TYPE);
    binary.emit_byte(mcht.code());
    if let Some(rel) = mcht.relation() {
        binary.emit_byte(rel.code());
    }
    address
}

pub fn emit_variable(binary: &mut Binary, var: VariableRef) -> usize {
    let address = binary.emit_byte(OPERAND_VARIABLE);
    binary.emit_byte(var.storage);
    binary.emit_u32(var.slot);
    address
}

/// Emit the header of an extension-defined operand; the extension writes its
/// payload afterwards
pub fn emit_extension_operand(
    binary: &mut Binary,
    extension: &str,
    code: u8,
) -> Result<usize, BinaryError> {
    let index = binary.link_extension(extension)?;
    let address = binary.emit_byte(OPERAND_CUSTOM + index);
    binary.emit_byte(code);
    Ok(address)
}

pub fn emit_value(binary: &mut Binary, value: &OperandValue) -> usize {
    match value {
        OperandValue::Number(n) => emit_number(binary, *n),
        OperandValue::String(s) => emit_string(binary, s),
        OperandValue::StringList(items) => emit_stringlist(binary, items),
        OperandValue::Comparator(cmp) => emit_comparator(binary, *cmp),
        OperandValue::MatchType(mcht) => emit_match_type(binary, *mcht),
        OperandValue::Variable(var) => emit_variable(binary, *var),
    }
}

/// Read one string operand (tag, length, bytes) without crossing `limit`
pub(crate) fn read_string_item(
    code: &[u8],
    address: &mut usize,
    limit: usize,
) -> Result<String, CorruptBytecode> {
    let start = *address;
    let tag = read_u8(code, address, limit)?;
    if tag != OPERAND_STRING {
        return Err(CorruptBytecode::new(
            start,
            format!("expected string operand but found tag {:02x}", tag),
        ));
    }
    let len = read_u32(code, address, limit)? as usize;
    let bytes = read_bytes(code, address, len, limit)?;
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| CorruptBytecode::new(start, "string operand is not valid UTF-8"))
}

// ---- decoding ----

/// A binary linked against a registry: binary-local extension indexes have
/// been resolved to registered extensions
#[derive(Debug, Clone)]
pub struct CodeView<'a> {
    pub binary: &'a Binary,
    pub registry: &'a Registry,
    links: Vec<ExtensionId>,
}

impl<'a> CodeView<'a> {
    pub fn link(binary: &'a Binary, registry: &'a Registry) -> Result<Self, BinaryError> {
        let mut links = Vec::with_capacity(binary.extensions().len());
        for name in binary.extensions() {
            let id = registry
                .find_extension(name)
                .ok_or_else(|| BinaryError::UnknownExtension(name.clone()))?;
            debug!("Linked binary extension '{}' to {:?}", name, id);
            links.push(id);
        }
        Ok(CodeView {
            binary,
            registry,
            links,
        })
    }

    pub fn code(&self) -> &'a [u8] {
        self.binary.code()
    }

    pub fn len(&self) -> usize {
        self.binary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binary.is_empty()
    }

    /// Resolve a binary-local extension index found at `address`
    pub fn linked_extension(&self, index: u8, address: usize) -> Result<ExtensionId, CorruptBytecode> {
        self.links.get(index as usize).copied().ok_or_else(|| {
            CorruptBytecode::new(
                address,
                format!("reference to unlinked extension index {}", index),
            )
        })
    }

    pub fn read_byte(&self, address: &mut usize) -> Result<u8, CorruptBytecode> {
        read_u8(self.code(), address, self.len())
    }

    /// Read an operand header and classify it
    pub fn read_operand(&self, address: &mut usize) -> Result<Operand, CorruptBytecode> {
        let start = *address;
        let tag = self.read_byte(address)?;
        let kind = match tag {
            OPERAND_NUMBER => OperandKind::Number,
            OPERAND_STRING => OperandKind::String,
            OPERAND_STRING_LIST => OperandKind::StringList,
            OPERAND_COMPARATOR => OperandKind::Comparator,
            OPERAND_MATCH_TYPE => OperandKind::MatchType,
            OPERAND_VARIABLE => OperandKind::Variable,
            t if t >= OPERAND_CUSTOM => {
                let extension = self.linked_extension(t - OPERAND_CUSTOM, start)?;
                let code = self.read_byte(address)?;
                let def = self.registry.operand(extension, code).ok_or_else(|| {
                    CorruptBytecode::new(
                        start,
                        format!(
                            "unknown operand code {} for extension '{}'",
                            code,
                            self.registry.extension_name(extension)
                        ),
                    )
                })?;
                OperandKind::Extension { extension, def }
            }
            t => {
                return Err(CorruptBytecode::new(
                    start,
                    format!("invalid operand tag {:02x}", t),
                ))
            }
        };
        Ok(Operand {
            address: start,
            kind,
        })
    }

    fn mismatch(operand: &Operand, expected: &str) -> CorruptBytecode {
        CorruptBytecode::new(
            operand.address,
            format!(
                "expected {} operand but found {}",
                expected,
                operand.kind.name()
            ),
        )
    }

    pub fn read_number_data(
        &self,
        operand: &Operand,
        address: &mut usize,
    ) -> Result<u32, CorruptBytecode> {
        match operand.kind {
            OperandKind::Number => read_u32(self.code(), address, self.len()),
            _ => Err(Self::mismatch(operand, "number")),
        }
    }

    pub fn read_string_data(
        &self,
        operand: &Operand,
        address: &mut usize,
    ) -> Result<String, CorruptBytecode> {
        match operand.kind {
            OperandKind::String => {
                let mut start = operand.address;
                let value = read_string_item(self.code(), &mut start, self.len())?;
                *address = start;
                Ok(value)
            }
            _ => Err(Self::mismatch(operand, "string")),
        }
    }

    /// Read the header of a string list; the items are decoded lazily. A
    /// single string operand is treated as a one-item list.
    pub fn read_stringlist_data(
        &self,
        operand: &Operand,
        address: &mut usize,
    ) -> Result<CodedStringList<'a>, CorruptBytecode> {
        let code = self.code();
        match operand.kind {
            OperandKind::StringList => {
                let count = read_u32(code, address, self.len())?;
                let region = read_u32(code, address, self.len())? as usize;
                let start = *address;
                let end = start.checked_add(region).filter(|end| *end <= self.len());
                let end = end.ok_or_else(|| {
                    CorruptBytecode::new(
                        operand.address,
                        format!("string list region of {} bytes runs past end of binary", region),
                    )
                })?;
                *address = end;
                Ok(CodedStringList::new(code, start, end, count))
            }
            OperandKind::String => {
                let start = operand.address;
                let mut end = start;
                read_string_item(code, &mut end, self.len())?;
                *address = end;
                Ok(CodedStringList::new(code, start, end, 1))
            }
            _ => Err(Self::mismatch(operand, "string-list")),
        }
    }

    pub fn read_comparator_data(
        &self,
        operand: &Operand,
        address: &mut usize,
    ) -> Result<Comparator, CorruptBytecode> {
        match operand.kind {
            OperandKind::Comparator => {
                let code = self.read_byte(address)?;
                Comparator::from_code(code).ok_or_else(|| {
                    CorruptBytecode::new(operand.address, format!("unknown comparator {}", code))
                })
            }
            _ => Err(Self::mismatch(operand, "comparator")),
        }
    }

    pub fn read_match_type_data(
        &self,
        operand: &Operand,
        address: &mut usize,
    ) -> Result<MatchType, CorruptBytecode> {
        match operand.kind {
            OperandKind::MatchType => {
                let code = self.read_byte(address)?;
                let relation = if MatchType::has_relation(code) {
                    let rel = self.read_byte(address)?;
                    Some(Relation::from_code(rel).ok_or_else(|| {
                        CorruptBytecode::new(operand.address, format!("unknown relation {}", rel))
                    })?)
                } else {
                    None
                };
                MatchType::from_code(code, relation).ok_or_else(|| {
                    CorruptBytecode::new(operand.address, format!("unknown match type {}", code))
                })
            }
            _ => Err(Self::mismatch(operand, "match-type")),
        }
    }

    pub fn read_variable_data(
        &self,
        operand: &Operand,
        address: &mut usize,
    ) -> Result<VariableRef, CorruptBytecode> {
        match operand.kind {
            OperandKind::Variable => {
                let storage = self.read_byte(address)?;
                let slot = read_u32(self.code(), address, self.len())?;
                Ok(VariableRef { storage, slot })
            }
            _ => Err(Self::mismatch(operand, "variable")),
        }
    }

    pub fn read_number(&self, address: &mut usize) -> Result<u32, CorruptBytecode> {
        let operand = self.read_operand(address)?;
        self.read_number_data(&operand, address)
    }

    pub fn read_string(&self, address: &mut usize) -> Result<String, CorruptBytecode> {
        let operand = self.read_operand(address)?;
        self.read_string_data(&operand, address)
    }

    pub fn read_stringlist(&self, address: &mut usize) -> Result<CodedStringList<'a>, CorruptBytecode> {
        let operand = self.read_operand(address)?;
        self.read_stringlist_data(&operand, address)
    }

    pub fn read_comparator(&self, address: &mut usize) -> Result<Comparator, CorruptBytecode> {
        let operand = self.read_operand(address)?;
        self.read_comparator_data(&operand, address)
    }

    pub fn read_match_type(&self, address: &mut usize) -> Result<MatchType, CorruptBytecode> {
        let operand = self.read_operand(address)?;
        self.read_match_type_data(&operand, address)
    }

    pub fn read_variable(&self, address: &mut usize) -> Result<VariableRef, CorruptBytecode> {
        let operand = self.read_operand(address)?;
        self.read_variable_data(&operand, address)
    }

    /// Decode any core operand completely. String lists are read eagerly.
    pub fn read_value(&self, address: &mut usize) -> Result<OperandValue, CorruptBytecode> {
        let operand = self.read_operand(address)?;
        match operand.kind {
            OperandKind::Number => self.read_number_data(&operand, address).map(OperandValue::Number),
            OperandKind::String => self.read_string_data(&operand, address).map(OperandValue::String),
            OperandKind::StringList => {
                let list = self.read_stringlist_data(&operand, address)?;
                list.iter()
                    .collect::<Result<Vec<_>, _>>()
                    .map(OperandValue::StringList)
            }
            OperandKind::Comparator => self
                .read_comparator_data(&operand, address)
                .map(OperandValue::Comparator),
            OperandKind::MatchType => self
                .read_match_type_data(&operand, address)
                .map(OperandValue::MatchType),
            OperandKind::Variable => self
                .read_variable_data(&operand, address)
                .map(OperandValue::Variable),
            OperandKind::Extension { def, .. } => Err(CorruptBytecode::new(
                operand.address,
                format!("{} operand has no core value form", def.name),
            )),
        }
    }
}
