//! Rust-level error type for the embedder API (§7).
//!
//! `JSError` is distinct from a JS-level *thrown value*: a thrown value is
//! itself a [`crate::value::Value`] (usually an Error object) that flows
//! through the evaluator's thrown-value register. `JSError` is what
//! fallible host-facing calls (`eval`, arena growth, parsing) return when
//! the engine itself cannot continue the operation.

use std::fmt;

/// The §7 error taxonomy, shared between internal engine failures and the
/// `name` field synthesized for JS-visible Error objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JSErrorKind {
    Generic,
    Type,
    Syntax,
    Reference,
    Range,
    Eval,
    Uri,
    Internal,
    Aggregate,
}

impl JSErrorKind {
    /// The `name` property a thrown Error object of this kind carries.
    pub fn name(&self) -> &'static str {
        match self {
            JSErrorKind::Generic => "Error",
            JSErrorKind::Type => "TypeError",
            JSErrorKind::Syntax => "SyntaxError",
            JSErrorKind::Reference => "ReferenceError",
            JSErrorKind::Range => "RangeError",
            JSErrorKind::Eval => "EvalError",
            JSErrorKind::Uri => "URIError",
            JSErrorKind::Internal => "InternalError",
            JSErrorKind::Aggregate => "AggregateError",
        }
    }
}

impl fmt::Display for JSErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single frame in a captured call stack, used to format the `stack`
/// string on thrown errors (§6 "Error value shape").
#[derive(Clone, Debug)]
pub struct CallFrame {
    pub filename: String,
    pub function_name: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "    at {} ({}:{}:{})", self.function_name, self.filename, self.line, self.column)
    }
}

/// The single Rust-level error type returned by fallible entry points.
#[derive(thiserror::Error, Debug)]
pub enum JSError {
    #[error("tokenization failed at {file}:{line}: {message}")]
    Tokenize { file: String, line: usize, message: String },

    #[error("parse error at {file}:{line}:{column}: {message}")]
    Parse {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{kind}: {message}")]
    Evaluation {
        kind: JSErrorKind,
        message: String,
        stack: Vec<CallFrame>,
    },

    #[error("arena allocation failed: {message}")]
    OutOfMemory { message: String },

    #[error("stack overflow: {message}")]
    StackOverflow { message: String },

    #[error("coroutine-per-tick limit ({limit}) exceeded")]
    FatalCoroutineLimit { limit: usize },

    #[error("coroutine cancelled before it could resume")]
    CoroutineCancelled,

    #[error("GC aborted without reclaiming bytes: {reason}")]
    GcAborted { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl JSError {
    pub fn type_error(message: impl Into<String>) -> JSError {
        JSError::Evaluation {
            kind: JSErrorKind::Type,
            message: message.into(),
            stack: Vec::new(),
        }
    }

    pub fn range_error(message: impl Into<String>) -> JSError {
        JSError::Evaluation {
            kind: JSErrorKind::Range,
            message: message.into(),
            stack: Vec::new(),
        }
    }

    pub fn reference_error(message: impl Into<String>) -> JSError {
        JSError::Evaluation {
            kind: JSErrorKind::Reference,
            message: message.into(),
            stack: Vec::new(),
        }
    }

    pub fn syntax_error(message: impl Into<String>) -> JSError {
        JSError::Evaluation {
            kind: JSErrorKind::Syntax,
            message: message.into(),
            stack: Vec::new(),
        }
    }

    pub fn kind(&self) -> JSErrorKind {
        match self {
            JSError::Tokenize { .. } | JSError::Parse { .. } => JSErrorKind::Syntax,
            JSError::Evaluation { kind, .. } => kind.clone(),
            JSError::OutOfMemory { .. } | JSError::StackOverflow { .. } | JSError::FatalCoroutineLimit { .. } => JSErrorKind::Range,
            JSError::CoroutineCancelled => JSErrorKind::Internal,
            JSError::GcAborted { .. } => JSErrorKind::Internal,
            JSError::Io(_) => JSErrorKind::Generic,
        }
    }

    /// Attach a captured call stack, used when the evaluator propagates
    /// an error through nested call frames.
    pub fn with_stack(mut self, frames: Vec<CallFrame>) -> Self {
        if let JSError::Evaluation { stack, .. } = &mut self {
            *stack = frames;
        }
        self
    }

    /// Formatted message suitable for printing to stderr by the default CLI
    /// (without ANSI color; the CLI wraps this with color codes itself).
    pub fn user_message(&self) -> String {
        match self {
            JSError::Evaluation { kind, message, stack } => {
                let mut s = format!("{kind}: {message}");
                for frame in stack {
                    s.push('\n');
                    s.push_str(&frame.to_string());
                }
                s
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_matches_ecmascript_error_constructors() {
        assert_eq!(JSErrorKind::Type.name(), "TypeError");
        assert_eq!(JSErrorKind::Range.name(), "RangeError");
        assert_eq!(JSErrorKind::Reference.name(), "ReferenceError");
    }

    #[test]
    fn type_error_carries_type_kind() {
        let e = JSError::type_error("not a function");
        assert_eq!(e.kind(), JSErrorKind::Type);
        assert!(e.user_message().starts_with("TypeError"));
    }

    #[test]
    fn stack_overflow_maps_to_range_kind() {
        let e = JSError::StackOverflow { message: "parse depth exceeded".into() };
        assert_eq!(e.kind(), JSErrorKind::Range);
    }
}
