use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure raised while turning templates and their parameter
/// specifications into generated shader sources.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{}:{line}: {message}", file.display())]
    Syntax {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{}:{line}: {source}", file.display())]
    Evaluation {
        file: PathBuf,
        line: usize,
        #[source]
        source: EvalError,
    },

    #[error("{}: {message}", file.display())]
    Specification { file: PathBuf, message: String },

    #[error("duplicate shader name '{name}' (generated from both '{}' and '{}')", first.display(), second.display())]
    DuplicateName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("could not compile '{name}': {message}")]
    Compile { name: String, message: String },

    #[error("could not access '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Source file and line for errors that point at a template location.
    pub fn position(&self) -> Option<(&Path, usize)> {
        match self {
            Error::Syntax { file, line, .. } | Error::Evaluation { file, line, .. } => {
                Some((file, *line))
            }
            _ => None,
        }
    }
}

/// Failure while evaluating an expression against a variable environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("'{name}' expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("expected a {expected}, got a {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("'{op}' is not defined for {lhs} and {rhs}")]
    InvalidOperands {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("index {index} is out of bounds for a tuple of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("range() expects a non-negative integer, got {0}")]
    NegativeRange(i64),

    #[error("call depth exceeded {0} levels")]
    RecursionLimit(usize),
}
