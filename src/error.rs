use std::fmt;

use serde::Serialize;

/// Structured error type for a script run. Replaces stringly-typed errors so
/// hosts can match on the failure kind and display appropriate UI.
///
/// Only `Lex` and `Parse` (and genuinely unexpected host failures) abort a
/// run; per-statement issues such as arity mismatches or device failures are
/// logged as warnings at the call site and execution continues.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", content = "detail")]
pub enum RunError {
    /// Illegal character or unterminated string. Fatal.
    Lex { line: usize, message: String },
    /// Unexpected token. Fatal.
    Parse { line: usize, message: String },
    /// Dispatcher argument mismatch. Caught at the call site.
    Arity {
        function: String,
        required: usize,
        supplied: usize,
    },
    /// Unknown function name. Treated as a no-op at the call site.
    Unresolved { function: String },
    /// Propagated from a device backend. Caught at the call site.
    Device { message: String },
    /// Host I/O failure (script file unreadable, config unwritable).
    Io { message: String },
    /// Failure inside the embedded Lua engine.
    Lua { message: String },
}

impl RunError {
    pub fn lex(line: usize, message: impl Into<String>) -> Self {
        RunError::Lex {
            line,
            message: message.into(),
        }
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        RunError::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn device(message: impl Into<String>) -> Self {
        RunError::Device {
            message: message.into(),
        }
    }

    /// Whether the error aborts the whole run (as opposed to being
    /// swallowed with a warning at the failing statement).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunError::Lex { .. } | RunError::Parse { .. } | RunError::Io { .. }
        )
    }

    /// The source line the error is tied to, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            RunError::Lex { line, .. } | RunError::Parse { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Lex { line, message } => write!(f, "lex error on line {line}: {message}"),
            RunError::Parse { line, message } => {
                write!(f, "parse error on line {line}: {message}")
            }
            RunError::Arity {
                function,
                required,
                supplied,
            } => write!(
                f,
                "{function} requires at least {required} argument(s), got {supplied}"
            ),
            RunError::Unresolved { function } => write!(f, "unknown function {function}"),
            RunError::Device { message } => write!(f, "device error: {message}"),
            RunError::Io { message } => write!(f, "I/O error: {message}"),
            RunError::Lua { message } => write!(f, "lua error: {message}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self {
        RunError::Io {
            message: e.to_string(),
        }
    }
}

/// Clean-stop marker raised by the Lua `exit` handler and unwound by the
/// adapter as a normal completion, never surfaced as an error.
#[derive(Debug, Clone)]
pub struct StopSignal(pub String);

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script stopped: {}", self.0)
    }
}

impl std::error::Error for StopSignal {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(RunError::lex(3, "bad char").is_fatal());
        assert!(RunError::parse(1, "unexpected token").is_fatal());
        assert!(!RunError::Unresolved {
            function: "poke".into()
        }
        .is_fatal());
        assert!(!RunError::Arity {
            function: "click".into(),
            required: 2,
            supplied: 1,
        }
        .is_fatal());
    }

    #[test]
    fn display_cites_line() {
        let e = RunError::lex(7, "unterminated string");
        assert_eq!(e.to_string(), "lex error on line 7: unterminated string");
        assert_eq!(e.line(), Some(7));
    }
}
