//! Diagnostic accumulation shared by compilation and interpretation.
//!
//! The handler is always passed down explicitly; nothing in the crate reaches
//! for a global one. Counters only ever grow.

use log::{error, warn};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A rendered, location-tagged message
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", self.location, kind, self.message)
    }
}

#[derive(Debug, Default)]
pub struct ErrorHandler {
    errors: u32,
    warnings: u32,
    /// Stop keeping error messages after this many (0 = unlimited)
    max_errors: u32,
    diagnostics: Vec<Diagnostic>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        ErrorHandler::default()
    }

    pub fn with_max_errors(max_errors: u32) -> Self {
        ErrorHandler {
            max_errors,
            ..ErrorHandler::default()
        }
    }

    pub fn record_error(&mut self, location: &str, args: fmt::Arguments<'_>) {
        self.errors += 1;
        let message = args.to_string();
        error!("{}: {}", location, message);

        if self.max_errors == 0 || self.errors <= self.max_errors {
            self.diagnostics.push(Diagnostic {
                severity: Severity::Error,
                location: location.to_string(),
                message,
            });
        }
    }

    pub fn record_warning(&mut self, location: &str, args: fmt::Arguments<'_>) {
        self.warnings += 1;
        let message = args.to_string();
        warn!("{}: {}", location, message);

        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            location: location.to_string(),
            message,
        });
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }

    pub fn warning_count(&self) -> u32 {
        self.warnings
    }

    /// True once the configured error budget has been used up
    pub fn limit_reached(&self) -> bool {
        self.max_errors > 0 && self.errors >= self.max_errors
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Messages of the recorded errors, oldest first
    pub fn error_messages(&self) -> impl Iterator<Item = &str> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.message.as_str())
    }

    /// Everything recorded so far, one diagnostic per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for diagnostic in &self.diagnostics {
            out.push_str(&diagnostic.to_string());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_counters_and_rendering() {
        let mut ehandler = ErrorHandler::new();
        ehandler.record_error("line 3", format_args!("unknown command '{}'", "fileinto"));
        ehandler.record_warning("line 4", format_args!("flag {} ignored", "\\Bogus"));

        assert_eq!(ehandler.error_count(), 1);
        assert_eq!(ehandler.warning_count(), 1);
        assert_eq!(
            ehandler.render(),
            "line 3: error: unknown command 'fileinto'\nline 4: warning: flag \\Bogus ignored\n"
        );
        assert_eq!(
            ehandler.error_messages().collect::<Vec<_>>(),
            vec!["unknown command 'fileinto'"]
        );
    }

    #[test]
    fn test_max_errors_keeps_counting() {
        let mut ehandler = ErrorHandler::with_max_errors(2);
        for i in 0..5 {
            ehandler.record_error("binary", format_args!("error {}", i));
        }
        assert_eq!(ehandler.error_count(), 5);
        assert!(ehandler.limit_reached());
        assert_eq!(ehandler.error_messages().count(), 2);
    }
}
