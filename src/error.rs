//! Crate-wide error type.
//!
//! One enum covers every failure class the engines can surface: parse
//! failures, dangling references, impossible schemas, operator misuse,
//! patch precondition violations, and IR type mismatches. Absence is never
//! an error; lookups that can miss return `Option`.

use thiserror::Error;

/// Errors produced by the IR, the match/patch driver, the diff engine, and
/// the satisfiability engine.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Tag, path, or schema text failed to parse.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A path expression failed to parse or apply.
    #[error("!path: {message}")]
    Path { message: String },

    /// Undefined definition, schema, tag, or operator.
    #[error("reference error: {message}")]
    Reference { message: String },

    /// Satisfiability check rejected a reachable definition.
    #[error("{message}")]
    Cycle { message: String },

    /// Operator argument arity or type mismatch at instantiation.
    #[error("cannot instantiate !{op}: {message}")]
    Instantiation { op: String, message: String },

    /// Patch precondition failed; the message carries the divergence.
    #[error("structural error at {path}: {message}")]
    Structural { path: String, message: String },

    /// Operation applied to the wrong IR type.
    #[error("type error: {message}")]
    Type { message: String },

    /// The SAT backend failed internally.
    #[error("sat solver: {message}")]
    Solver { message: String },
}

impl Error {
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse { message: message.into() }
    }

    pub fn path(message: impl Into<String>) -> Self {
        Error::Path { message: message.into() }
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Error::Reference { message: message.into() }
    }

    pub fn cycle(message: impl Into<String>) -> Self {
        Error::Cycle { message: message.into() }
    }

    pub fn instantiation(op: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Instantiation { op: op.into(), message: message.into() }
    }

    pub fn structural(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Structural { path: path.into(), message: message.into() }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Error::Type { message: message.into() }
    }

    pub fn solver(message: impl Into<String>) -> Self {
        Error::Solver { message: message.into() }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
