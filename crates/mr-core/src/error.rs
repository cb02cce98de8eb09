use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MacroErrorKind {
    Parse,
    Recursion,
    Security,
    Evaluation,
    Timeout,
    Config,
    Io,
}

impl MacroErrorKind {
    pub fn default_code(self) -> &'static str {
        match self {
            Self::Parse => "MACRO_PARSE",
            Self::Recursion => "MACRO_RECURSION",
            Self::Security => "MACRO_SECURITY",
            Self::Evaluation => "MACRO_EVAL",
            Self::Timeout => "MACRO_TIMEOUT",
            Self::Config => "MACRO_CONFIG",
            Self::Io => "MACRO_IO",
        }
    }
}

impl fmt::Display for MacroErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_code())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct MacroError {
    pub kind: MacroErrorKind,
    pub code: String,
    pub message: String,
}

impl MacroError {
    pub fn new(kind: MacroErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn of_kind(kind: MacroErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, kind.default_code(), message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::of_kind(MacroErrorKind::Parse, message)
    }

    pub fn recursion(message: impl Into<String>) -> Self {
        Self::of_kind(MacroErrorKind::Recursion, message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::of_kind(MacroErrorKind::Security, message)
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::of_kind(MacroErrorKind::Evaluation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::of_kind(MacroErrorKind::Timeout, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::of_kind(MacroErrorKind::Config, message)
    }

    /// Timeouts surface from the evaluator but degrade exactly like evaluation errors.
    pub fn degrades_to_unresolved(&self) -> bool {
        matches!(
            self.kind,
            MacroErrorKind::Parse | MacroErrorKind::Evaluation | MacroErrorKind::Timeout
        )
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn display_uses_code_and_message() {
        let error = MacroError::parse("unexpected token");
        assert_eq!(error.to_string(), "MACRO_PARSE: unexpected token");
        assert_eq!(error.kind, MacroErrorKind::Parse);
    }

    #[test]
    fn custom_code_keeps_kind() {
        let error = MacroError::new(MacroErrorKind::Io, "CLI_TEMPLATE_READ", "missing");
        assert_eq!(error.code, "CLI_TEMPLATE_READ");
        assert_eq!(error.kind.to_string(), "MACRO_IO");
    }

    #[test]
    fn only_recoverable_evaluation_failures_degrade() {
        assert!(MacroError::timeout("slow").degrades_to_unresolved());
        assert!(MacroError::evaluation("boom").degrades_to_unresolved());
        assert!(!MacroError::recursion("loop").degrades_to_unresolved());
        assert!(!MacroError::security("denied").degrades_to_unresolved());
    }
}
