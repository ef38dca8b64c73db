use std::fmt;
use std::time::Duration;

use rhai::{EvalAltResult, ParseError};
use serde::Serialize;

/// Failure classes reported by the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Syntax,
    /// The snippet finished without binding `result`.
    ContractViolation,
    Timeout,
    /// A name outside the capability set was referenced.
    ForbiddenSymbol,
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::ContractViolation => "ContractViolation",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::ForbiddenSymbol => "NameError",
            ErrorKind::Runtime => "RuntimeError",
        };
        f.write_str(label)
    }
}

/// A structured execution failure. Never raised past the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn missing_result(slot: &str) -> Self {
        Self::new(
            ErrorKind::ContractViolation,
            format!("Code did not assign a value to `{slot}`. End the snippet with `{slot} = ...`"),
        )
    }

    pub(crate) fn timeout(limit: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Execution timed out after {}", describe_duration(limit)),
        )
    }

    pub(crate) fn from_parse(err: &ParseError) -> Self {
        Self::new(ErrorKind::Syntax, SyntaxIssue::from(err).to_string())
    }

    /// Classify an interpreter error. `is_registered` reports whether a
    /// function name exists under any signature.
    pub(crate) fn from_eval(
        err: &EvalAltResult,
        limit: Duration,
        is_registered: &dyn Fn(&str) -> bool,
    ) -> Self {
        match classify(err, is_registered) {
            ErrorKind::Timeout => Self::timeout(limit),
            ErrorKind::ForbiddenSymbol => Self::new(
                ErrorKind::ForbiddenSymbol,
                format!("{err}. Only the sandbox helpers (df, pd, np and the prelude) are available"),
            ),
            kind => Self::new(kind, err.to_string()),
        }
    }
}

fn classify(err: &EvalAltResult, is_registered: &dyn Fn(&str) -> bool) -> ErrorKind {
    match err {
        EvalAltResult::ErrorTerminated(..) | EvalAltResult::ErrorTooManyOperations(..) => {
            ErrorKind::Timeout
        }
        EvalAltResult::ErrorVariableNotFound(..) | EvalAltResult::ErrorModuleNotFound(..) => {
            ErrorKind::ForbiddenSymbol
        }
        // Operators and known names with the wrong argument types are plain
        // runtime errors; only names with no signature at all are forbidden.
        EvalAltResult::ErrorFunctionNotFound(signature, _) => {
            let name = called_name(signature);
            if is_operator(name) || is_registered(name) {
                ErrorKind::Runtime
            } else {
                ErrorKind::ForbiddenSymbol
            }
        }
        EvalAltResult::ErrorParsing(..) => ErrorKind::Syntax,
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => classify(inner, is_registered),
        _ => ErrorKind::Runtime,
    }
}

/// Function name out of a call signature such as `mean (np, i64)`.
fn called_name(signature: &str) -> &str {
    signature
        .split_once('(')
        .map_or(signature, |(name, _)| name)
        .trim()
}

fn is_operator(name: &str) -> bool {
    !name.starts_with(|c: char| c.is_alphabetic() || c == '_')
}

fn describe_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{} seconds", d.as_secs())
    } else {
        format!("{} ms", d.as_millis())
    }
}

/// Where and why a snippet failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxIssue {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl From<&ParseError> for SyntaxIssue {
    fn from(err: &ParseError) -> Self {
        let pos = err.position();
        Self {
            message: err.err_type().to_string(),
            line: pos.line(),
            column: pos.position(),
        }
    }
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(l), Some(c)) => write!(f, "line {l}, column {c}: {}", self.message),
            (Some(l), None) => write!(f, "line {l}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}
