//! Error types for the policy decision point
//!
//! Load-time failures ([`ParseError`]) abort a policy load as a whole.
//! Evaluation-time failures ([`EvalError`]) never escape the engine: they are
//! narrowed into an Indeterminate [`Decision`](crate::engine::Decision).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::attribute::AttributeType;

/// Location of a construct inside a policy document.
///
/// Holds the chain of object keys and array indices walked by the parser,
/// e.g. `policies > rules > [1] > condition`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentPath(pub Vec<String>);

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        f.write_str(&self.0.join(" > "))
    }
}

/// Policy document errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    /// Unknown tag, malformed structure or wrong JSON shape
    #[error("schema error at {path} (line {line}, column {column}): {message}")]
    Schema {
        message: String,
        path: DocumentPath,
        line: usize,
        column: usize,
    },

    /// Type mismatch, unresolvable reference or duplicate identifier
    #[error("type error at {path} (line {line}, column {column}): {message}")]
    Type {
        message: String,
        path: DocumentPath,
        line: usize,
        column: usize,
    },

    /// Document is not well-formed JSON
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },
}

impl ParseError {
    /// Path of the construct that failed, if the error has one
    pub fn path(&self) -> Option<&DocumentPath> {
        match self {
            ParseError::Schema { path, .. } | ParseError::Type { path, .. } => Some(path),
            ParseError::Syntax { .. } => None,
        }
    }

    /// Human-readable message without location
    pub fn message(&self) -> &str {
        match self {
            ParseError::Schema { message, .. }
            | ParseError::Type { message, .. }
            | ParseError::Syntax { message, .. } => message,
        }
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, ParseError::Schema { .. })
    }

    pub fn is_type(&self) -> bool {
        matches!(self, ParseError::Type { .. })
    }
}

/// Failure to coerce a raw value into a typed attribute value
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("expected {expected} but got {actual}")]
pub struct TypeError {
    pub expected: String,
    pub actual: String,
}

impl TypeError {
    pub fn new(expected: impl fmt::Display, actual: impl Into<String>) -> Self {
        Self {
            expected: expected.to_string(),
            actual: actual.into(),
        }
    }
}

/// Failure reported by an external attribute resolver
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ResolveError(pub String);

/// Evaluation-time errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// Attribute absent from the request and not supplied by the resolver
    #[error("attribute \"{id}\" of type {expected} is unavailable: {message}")]
    Resolution {
        id: String,
        expected: AttributeType,
        message: String,
    },

    /// A function's runtime precondition was violated
    #[error("function \"{function}\" failed: {message}")]
    Function {
        function: &'static str,
        message: String,
    },

    /// More than one child applicable under only-one-applicable
    #[error("ambiguous policy: children {first} and {second} are both applicable")]
    Ambiguity { first: String, second: String },

    /// Mapper selected a value that names no child
    #[error("no child matches selector value \"{value}\"")]
    MissingChild { value: String },

    /// Caller abandoned the evaluation
    #[error("evaluation cancelled")]
    Cancelled,

    /// Store has no published policy
    #[error("no policy loaded")]
    NoPolicy,
}

impl EvalError {
    pub fn function(function: &'static str, message: impl Into<String>) -> Self {
        EvalError::Function {
            function,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::Resolution { .. } => ErrorKind::Resolution,
            EvalError::Function { .. } => ErrorKind::Function,
            EvalError::Ambiguity { .. } => ErrorKind::Ambiguity,
            EvalError::MissingChild { .. } => ErrorKind::MissingChild,
            EvalError::Cancelled => ErrorKind::Cancelled,
            EvalError::NoPolicy => ErrorKind::NoPolicy,
        }
    }
}

/// Error classification carried by Indeterminate decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Resolution,
    Function,
    Ambiguity,
    MissingChild,
    Cancelled,
    NoPolicy,
}

/// Crate-level errors
#[derive(Debug, Error)]
pub enum PdpError {
    /// Policy document rejected
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for policy decision point operations
pub type Result<T> = std::result::Result<T, PdpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_path_display() {
        let path = DocumentPath(vec!["policies".into(), "rules".into(), "[1]".into()]);
        assert_eq!(path.to_string(), "policies > rules > [1]");
        assert_eq!(DocumentPath::default().to_string(), "<root>");
    }

    #[test]
    fn test_eval_error_kind() {
        assert_eq!(EvalError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            EvalError::function("divide", "division by zero").kind(),
            ErrorKind::Function
        );
        let err = EvalError::Ambiguity {
            first: "a".into(),
            second: "b".into(),
        };
        assert!(err.to_string().contains("a and b"));
    }

    #[test]
    fn test_parse_error_accessors() {
        let err = ParseError::Schema {
            message: "unknown tag \"foo\"".into(),
            path: DocumentPath(vec!["policies".into(), "foo".into()]),
            line: 3,
            column: 7,
        };
        assert!(err.is_schema());
        assert!(!err.is_type());
        assert_eq!(err.path().map(|p| p.0.len()), Some(2));
        assert!(err.to_string().contains("line 3"));
    }
}
