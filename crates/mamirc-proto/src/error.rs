//! Error types for IRC line parsing.

use thiserror::Error;

/// Errors produced while parsing a raw IRC line.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum LineParseError {
    /// The line was empty after stripping delimiters.
    #[error("empty IRC line")]
    Empty,

    /// The line had a `:` prefix sigil but nothing after it.
    #[error("IRC line has prefix but no command")]
    MissingCommand,

    /// The line contained a NUL byte, which IRC forbids.
    #[error("IRC line contains NUL byte")]
    NulByte,
}
