use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A 0-based position in a single-line source such as an RQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// 0-based line number
    pub line: usize,
    /// 0-based column (character offset within the line)
    pub column: usize,
    /// 0-based absolute byte offset from the start of input
    pub offset: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.column + 1)
    }
}

/// Errors from the fail-fast parts of the crate: parsing, schema files,
/// indexing, SQL emission, CSV and table codecs.
///
/// Schema *validation* problems are not reported through this type; they are
/// collected as [`crate::validate::SchemaError`] values up to a cap.
#[derive(Debug, Error)]
pub enum TagStormError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("{message} line {line} of {file}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("{message} line {line} of schema {file}")]
    Schema {
        file: String,
        line: usize,
        message: String,
    },

    #[error("tag {tag} value {value} not unique in {file}")]
    NotUnique {
        tag: String,
        value: String,
        file: String,
    },

    #[error("can't find tag named {tag} in stanza")]
    MissingTag { tag: String },

    #[error("{message} at {position} in \"{input}\"")]
    Rql {
        message: String,
        input: String,
        position: Position,
    },

    #[error("no field named {field} in {file}")]
    UnknownField { field: String, file: String },

    #[error("bad csv: {0}")]
    Csv(String),

    #[error("delimited table: {0}")]
    Delimited(#[from] ::csv::Error),

    #[error("{message} line {line} of {table}")]
    Table {
        table: String,
        line: usize,
        message: String,
    },

    #[error(
        "row width {width} exceeds the {limit} byte limit of narrow row formats; \
         switch engines or drop some wide fields"
    )]
    RowTooWide { width: usize, limit: usize },

    #[error("field {field} maps to column {column}, which is a reserved SQL word")]
    ReservedWord { field: String, column: String },

    #[error("fields {first} and {second} both map to column {column} (names differ only in case)")]
    ColumnCollision {
        first: String,
        second: String,
        column: String,
    },

    #[error("key field {0} is not a field of the tag storm")]
    UnknownKeyField(String),

    #[error("can't compile wildcard pattern: {message}")]
    Wildcard { pattern: String, message: String },

    #[error("facet: {0}")]
    Facet(String),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TagStormError>;

impl TagStormError {
    pub fn parse_error(file: &str, line: usize, message: impl Into<String>) -> Self {
        TagStormError::Parse {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn schema_error(file: &str, line: usize, message: impl Into<String>) -> Self {
        TagStormError::Schema {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TagStormError::Io {
            path: path.into(),
            source,
        }
    }
}
