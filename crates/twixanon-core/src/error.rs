//! Error types for the twixanon-core library.
//!
//! One enum covers every failure mode of the engine. The variants mirror the
//! per-file outcomes a batch run reports: a malformed container is skipped, a
//! partial redaction or serialization problem fails the file, and a single
//! undecodable header field is only ever reported, never raised out of a parse.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for twixanon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all twixanon operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The container layout is unreadable or inconsistent
    #[error("malformed twix container at offset {offset}: {details}")]
    MalformedContainer {
        /// Byte offset (absolute, in the file) where the problem was detected
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// A structured header field could not be decoded as its declared type
    #[error("cannot decode header field '{field}' at offset {offset}: {details}")]
    HeaderDecode {
        /// Field identifier, e.g. `raid[0].PatientName`
        field: String,
        /// Offset of the field relative to its segment
        offset: usize,
        /// Why decoding failed
        details: String,
    },

    /// A PII rule was applied to one copy of a value but another copy survived
    #[error("partial redaction for rule '{rule}': '{field}' still holds identifying data")]
    PartialRedaction {
        /// Identifier of the rule that is not satisfied
        rule: String,
        /// The occurrence that kept its original value
        field: String,
    },

    /// The output would violate a fixed-size constraint of the container
    #[error("cannot serialize container: {details}")]
    Serialization {
        /// Detailed description of the violated constraint
        details: String,
    },

    /// A rule definition is invalid (bad regex, empty matcher set, ...)
    #[error("invalid rule '{rule}': {details}")]
    InvalidRule {
        /// Rule identifier
        rule: String,
        /// Detailed description of the issue
        details: String,
    },

    /// Failed to parse a rule set document
    #[error("failed to parse rule set: {0}")]
    RuleSetParse(#[from] serde_json::Error),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new malformed container error
    pub fn malformed(offset: usize, details: impl Into<String>) -> Self {
        Self::MalformedContainer {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new header decode error
    pub fn header_decode(field: impl Into<String>, offset: usize, details: impl Into<String>) -> Self {
        Self::HeaderDecode {
            field: field.into(),
            offset,
            details: details.into(),
        }
    }

    /// Creates a new partial redaction error
    pub fn partial_redaction(rule: impl Into<String>, field: impl Into<String>) -> Self {
        Self::PartialRedaction {
            rule: rule.into(),
            field: field.into(),
        }
    }

    /// Creates a new serialization error
    pub fn serialization(details: impl Into<String>) -> Self {
        Self::Serialization {
            details: details.into(),
        }
    }

    /// Creates a new invalid rule error
    pub fn invalid_rule(rule: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            details: details.into(),
        }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if the file should be skipped rather than counted as failed
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::MalformedContainer { .. })
    }
}
