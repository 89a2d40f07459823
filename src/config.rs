//! Runtime configuration, read from TOML.
//!
//! ```toml
//! [trace]
//! level = "tests"
//! addresses = true
//!
//! [limits]
//! max_variable_size = 1024
//! max_operations = 100000
//!
//! [diagnostics]
//! max_errors = 10
//! ```

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// How much of the execution gets traced, from least to most verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    #[default]
    None,
    Actions,
    Commands,
    Tests,
    Matching,
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TraceLevel::None => "none",
            TraceLevel::Actions => "actions",
            TraceLevel::Commands => "commands",
            TraceLevel::Tests => "tests",
            TraceLevel::Matching => "matching",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub level: TraceLevel,
    /// Also trace debug-only events
    pub debug: bool,
    /// Prefix trace lines with the operation address
    pub addresses: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Slots available in the default variable storage
    pub max_variables: u32,
    /// Longest value a variable may hold, in bytes
    pub max_variable_size: usize,
    /// Abort a run after this many operations
    pub max_operations: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_variables: 255,
            max_variable_size: 4096,
            max_operations: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// 0 = unlimited
    pub max_errors: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SieveConfig {
    pub trace: TraceConfig,
    pub limits: Limits,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "cannot read configuration: {}", msg),
            ConfigError::Parse(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl SieveConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&source)
    }
}
