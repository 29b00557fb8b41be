//! Parse results that keep going after a bad file.
//!
//! Library scans must never abort because one file is malformed, so the
//! parsers report partial results with diagnostics instead of bailing out.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub line: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(file: &Path, message: impl Into<String>) -> Self {
        Self {
            file: file.to_path_buf(),
            line: None,
            message: message.into(),
        }
    }

    pub fn at_line(file: &Path, line: usize, message: impl Into<String>) -> Self {
        Self {
            file: file.to_path_buf(),
            line: Some(line),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.file.display(), line, self.message),
            None => write!(f, "{}: {}", self.file.display(), self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Ok(T),
    PartialOk(T, Vec<Diagnostic>),
    Fail(String),
}

impl<T> ParseOutcome<T> {
    pub fn from_parts(value: T, diagnostics: Vec<Diagnostic>) -> Self {
        if diagnostics.is_empty() {
            ParseOutcome::Ok(value)
        } else {
            ParseOutcome::PartialOk(value, diagnostics)
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ParseOutcome::Ok(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            ParseOutcome::Ok(v) | ParseOutcome::PartialOk(v, _) => Some(v),
            ParseOutcome::Fail(_) => None,
        }
    }

    /// Split into the value (if any) and the diagnostics, turning a `Fail`
    /// into a diagnostic against `file`.
    pub fn into_parts(self, file: &Path) -> (Option<T>, Vec<Diagnostic>) {
        match self {
            ParseOutcome::Ok(v) => (Some(v), Vec::new()),
            ParseOutcome::PartialOk(v, diags) => (Some(v), diags),
            ParseOutcome::Fail(reason) => (None, vec![Diagnostic::new(file, reason)]),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ParseOutcome<U> {
        match self {
            ParseOutcome::Ok(v) => ParseOutcome::Ok(f(v)),
            ParseOutcome::PartialOk(v, d) => ParseOutcome::PartialOk(f(v), d),
            ParseOutcome::Fail(r) => ParseOutcome::Fail(r),
        }
    }
}
