use std::io;
use std::path::PathBuf;

use crate::config::Field;

/// Fatal problems found before any line is read.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern `{pattern}` captures unknown field `{name}`")]
    UnknownField { pattern: String, name: String },

    #[error("pattern `{pattern}` has no named capture groups")]
    NoNamedGroups { pattern: String },

    #[error("pattern `{pattern}` does not capture required field `{field}`")]
    MissingField { pattern: String, field: Field },

    #[error("at least one of a log file path or --stdin is required")]
    NoInput,

    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot load url patterns from {}: {source}", path.display())]
    PatternFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Per-line failures. The offending line is dropped and the stream continues.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("line does not match the pattern")]
    NoMatch,

    #[error("field `{field}` is not a valid number: {value:?}")]
    InvalidNumber { field: Field, value: String },

    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("record has no `{0}` field")]
    MissingField(Field),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparseable timestamp {0:?}")]
pub struct TimestampError(pub String);
