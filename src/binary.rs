//! Binary block: the append-only code buffer produced by the code generator
//! and replayed by the interpreter.
//!
//! All multi-byte values are big-endian. Reads are bounds-checked against both
//! the end of the buffer and a caller-supplied limit (the end of the record or
//! list region being decoded), so a malformed block can never make a decoder
//! look at bytes that do not belong to it.

use log::debug;
use std::fmt;
use std::fs;
use std::path::Path;

/// File magic for saved binaries
pub const BINARY_MAGIC: &[u8; 4] = b"SVBN";

/// Current container version
pub const BINARY_VERSION: u16 = 1;

/// Number of distinct extensions a single binary can reference
pub const MAX_LINKED_EXTENSIONS: usize = 0xC0;

/// Raised whenever decoding finds the block inconsistent with itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptBytecode {
    /// Address at which the problem was detected
    pub address: usize,
    pub reason: String,
}

impl CorruptBytecode {
    pub fn new(address: usize, reason: impl Into<String>) -> Self {
        CorruptBytecode {
            address,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CorruptBytecode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "corrupt bytecode at {:08x}: {}", self.address, self.reason)
    }
}

impl std::error::Error for CorruptBytecode {}

/// Errors concerning the binary container rather than the code inside it
#[derive(Debug, Clone, PartialEq)]
pub enum BinaryError {
    BadMagic,
    UnsupportedVersion(u16),
    Truncated(&'static str),
    InvalidExtensionName,
    UnknownExtension(String),
    TooManyExtensions,
    Io(String),
}

impl fmt::Display for BinaryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BinaryError::BadMagic => write!(f, "not a sieve binary (bad magic)"),
            BinaryError::UnsupportedVersion(v) => {
                write!(f, "unsupported sieve binary version {}", v)
            }
            BinaryError::Truncated(what) => write!(f, "binary truncated while reading {}", what),
            BinaryError::InvalidExtensionName => write!(f, "extension name is not valid UTF-8"),
            BinaryError::UnknownExtension(name) => {
                write!(f, "binary requires unknown extension '{}'", name)
            }
            BinaryError::TooManyExtensions => write!(
                f,
                "binary links more than {} extensions",
                MAX_LINKED_EXTENSIONS
            ),
            BinaryError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for BinaryError {}

impl From<std::io::Error> for BinaryError {
    fn from(err: std::io::Error) -> Self {
        BinaryError::Io(err.to_string())
    }
}

/// A compiled script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binary {
    code: Vec<u8>,
    /// Names of the extensions referenced by the code, indexed by the
    /// binary-local extension index used in operation and operand headers
    extensions: Vec<String>,
}

impl Binary {
    pub fn new() -> Self {
        Binary::default()
    }

    pub fn from_parts(code: Vec<u8>, extensions: Vec<String>) -> Self {
        Binary { code, extensions }
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Address the next emitted byte will land on
    pub fn address(&self) -> usize {
        self.code.len()
    }

    pub fn emit_byte(&mut self, byte: u8) -> usize {
        let address = self.code.len();
        self.code.push(byte);
        address
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) -> usize {
        let address = self.code.len();
        self.code.extend_from_slice(bytes);
        address
    }

    pub fn emit_u32(&mut self, value: u32) -> usize {
        self.emit_bytes(&value.to_be_bytes())
    }

    pub fn emit_i32(&mut self, value: i32) -> usize {
        self.emit_bytes(&value.to_be_bytes())
    }

    /// Get the binary-local index of an extension, adding it to the link
    /// table on first use
    pub fn link_extension(&mut self, name: &str) -> Result<u8, BinaryError> {
        if let Some(index) = self.extensions.iter().position(|e| e == name) {
            return Ok(index as u8);
        }
        if self.extensions.len() >= MAX_LINKED_EXTENSIONS {
            return Err(BinaryError::TooManyExtensions);
        }
        debug!(
            "Linking extension '{}' as binary index {}",
            name,
            self.extensions.len()
        );
        self.extensions.push(name.to_string());
        Ok((self.extensions.len() - 1) as u8)
    }

    /// Swap the code buffer out so a nested block can be generated on its own.
    /// Returns the previous contents.
    pub(crate) fn detach_code(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.code)
    }

    /// Put back a buffer taken with `detach_code`, returning what was emitted
    /// in between
    pub(crate) fn reattach_code(&mut self, saved: Vec<u8>) -> Vec<u8> {
        std::mem::replace(&mut self.code, saved)
    }

    /// Serialize into the on-disk container format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.code.len() + 16);
        out.extend_from_slice(BINARY_MAGIC);
        out.extend_from_slice(&BINARY_VERSION.to_be_bytes());
        out.extend_from_slice(&(self.extensions.len() as u16).to_be_bytes());
        for name in &self.extensions {
            out.extend_from_slice(&(name.len() as u16).to_be_bytes());
            out.extend_from_slice(name.as_bytes());
        }
        out.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.code);
        out
    }

    /// Parse the on-disk container format
    pub fn from_bytes(data: &[u8]) -> Result<Self, BinaryError> {
        let mut address = 0;
        let limit = data.len();

        let magic = read_bytes(data, &mut address, 4, limit)
            .map_err(|_| BinaryError::Truncated("magic"))?;
        if magic != BINARY_MAGIC {
            return Err(BinaryError::BadMagic);
        }

        let version = read_u16(data, &mut address, limit)
            .map_err(|_| BinaryError::Truncated("version"))?;
        if version != BINARY_VERSION {
            return Err(BinaryError::UnsupportedVersion(version));
        }

        let count = read_u16(data, &mut address, limit)
            .map_err(|_| BinaryError::Truncated("extension count"))?
            as usize;
        if count > MAX_LINKED_EXTENSIONS {
            return Err(BinaryError::TooManyExtensions);
        }

        let mut extensions = Vec::with_capacity(count);
        for _ in 0..count {
            let len = read_u16(data, &mut address, limit)
                .map_err(|_| BinaryError::Truncated("extension name"))?
                as usize;
            let raw = read_bytes(data, &mut address, len, limit)
                .map_err(|_| BinaryError::Truncated("extension name"))?;
            let name =
                std::str::from_utf8(raw).map_err(|_| BinaryError::InvalidExtensionName)?;
            extensions.push(name.to_string());
        }

        let code_len = read_u32(data, &mut address, limit)
            .map_err(|_| BinaryError::Truncated("code length"))? as usize;
        let code = read_bytes(data, &mut address, code_len, limit)
            .map_err(|_| BinaryError::Truncated("code"))?;

        Ok(Binary {
            code: code.to_vec(),
            extensions,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), BinaryError> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BinaryError> {
        let data = fs::read(path)?;
        Binary::from_bytes(&data)
    }
}

// ---- bounded readers ----
//
// `limit` is an exclusive upper bound; it is clamped to the buffer length.

fn take<'a>(
    code: &'a [u8],
    address: &mut usize,
    len: usize,
    limit: usize,
    what: &str,
) -> Result<&'a [u8], CorruptBytecode> {
    let limit = limit.min(code.len());
    let start = *address;
    let end = start
        .checked_add(len)
        .ok_or_else(|| CorruptBytecode::new(start, format!("{} length overflows", what)))?;
    if end > limit {
        return Err(CorruptBytecode::new(
            start,
            format!(
                "{} of {} bytes runs past end of region at {:08x}",
                what, len, limit
            ),
        ));
    }
    *address = end;
    Ok(&code[start..end])
}

pub fn read_u8(code: &[u8], address: &mut usize, limit: usize) -> Result<u8, CorruptBytecode> {
    Ok(take(code, address, 1, limit, "byte")?[0])
}

pub fn read_u16(code: &[u8], address: &mut usize, limit: usize) -> Result<u16, CorruptBytecode> {
    let b = take(code, address, 2, limit, "word")?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

pub fn read_u32(code: &[u8], address: &mut usize, limit: usize) -> Result<u32, CorruptBytecode> {
    let b = take(code, address, 4, limit, "integer")?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_i32(code: &[u8], address: &mut usize, limit: usize) -> Result<i32, CorruptBytecode> {
    let b = take(code, address, 4, limit, "offset")?;
    Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_bytes<'a>(
    code: &'a [u8],
    address: &mut usize,
    len: usize,
    limit: usize,
) -> Result<&'a [u8], CorruptBytecode> {
    take(code, address, len, limit, "data")
}
