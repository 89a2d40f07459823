// Extensions shipped with the crate

pub mod flags;
pub mod imap4flags;
pub mod testsuite;

use crate::extension::ExtensionDef;

pub static EXTENSIONS: [&ExtensionDef; 2] = [&imap4flags::EXTENSION, &testsuite::EXTENSION];
