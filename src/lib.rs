use std::path::{Path, PathBuf};

pub mod config;
pub mod definition;
pub mod location;
pub mod registry;
pub mod snapshot;
pub mod table;
pub mod template;
pub mod xml;

#[cfg(test)]
mod tests;

pub use definition::{ColumnSpec, RepositoryInfo, TableDefinition, TableKind, TableSchema};
pub use location::LocationIndex;
pub use registry::{ConfigImport, ReloadSelector, TableRegistry};
pub use table::{Entry, LoadOrigin, LoadParameters, Row, Table};

#[derive(Debug, thiserror::Error)]
#[error("{context}: {detail}")]
pub struct Error {
    pub context: Box<ErrorContext>,
    pub detail: Box<ErrorDetail>,
}

impl Error {
    pub fn is_configuration_error(&self) -> bool {
        self.detail.is_configuration_error()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub table: Option<String>,
    pub path: Option<PathBuf>,
}

impl ErrorContext {
    pub(crate) fn table(name: impl Into<String>) -> Self {
        Self {
            table: Some(name.into()),
            path: None,
        }
    }

    pub(crate) fn path(path: impl AsRef<Path>) -> Self {
        Self {
            table: None,
            path: Some(path.as_ref().to_owned()),
        }
    }

    pub(crate) fn error(&self, detail: ErrorDetail) -> Error {
        Error {
            context: Box::new(self.clone()),
            detail: Box::new(detail),
        }
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.table, &self.path) {
            (Some(table), Some(path)) => write!(f, "{table}({})", path.display()),
            (Some(table), None) => write!(f, "{table}"),
            (None, Some(path)) => write!(f, "{}", path.display()),
            (None, None) => write!(f, "<registry>"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorDetail {
    #[error("Failed to read document: {0}")]
    ReadDocument(std::io::Error),
    #[error("Failed to parse XML document: {0}")]
    ParseXml(roxmltree::Error),
    #[error("Unexpected root element <{0}>")]
    UnexpectedRoot(String),
    #[error("Unknown data table type '{0}'")]
    UnknownTableType(String),
    #[error("Required '{attribute}' attribute missing from <{element}>")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("Invalid column index: {0}")]
    InvalidColumnIndex(String),
    #[error("Required 'value' column missing from column definition")]
    MissingValueColumn,
    #[error("An 'asset' attribute is required for refgenie tables")]
    MissingAsset,
    #[error("Field '{0}' is defined more than once")]
    DuplicateField(String),
    #[error("Merging tables with non matching columns is not allowed: {expected} != {got}")]
    ColumnMismatch { expected: String, got: String },
    #[error("Not enough fields specified ({got} < {required}): {fields:?}")]
    RowTooNarrow {
        fields: Vec<String>,
        got: usize,
        required: usize,
    },
    #[error("Entry already exists and duplicates are not allowed: {0:?}")]
    DuplicateEntry(Vec<String>),
    #[error("Unable to determine a location file for persisting values: {0:?}")]
    NoPersistTarget(Vec<String>),
    #[error("Persisting table definitions requires a definitions file")]
    NoDefinitionsFile,
    #[error("Failed to lock file: {0}")]
    LockFile(std::io::Error),
    #[error("Failed to write file: {0}")]
    WriteFile(std::io::Error),
    #[error("Failed to encode snapshot: {0}")]
    EncodeSnapshot(serde_json::Error),
    #[error("Failed to decode snapshot: {0}")]
    DecodeSnapshot(serde_json::Error),
    #[error("No such data table: {0}")]
    TableNotFound(String),
}

impl ErrorDetail {
    /// Errors caused by a broken deployment rather than by data or I/O.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ErrorDetail::ParseXml(_)
                | ErrorDetail::UnexpectedRoot(_)
                | ErrorDetail::UnknownTableType(_)
                | ErrorDetail::MissingAttribute { .. }
                | ErrorDetail::InvalidColumnIndex(_)
                | ErrorDetail::MissingValueColumn
                | ErrorDetail::MissingAsset
                | ErrorDetail::DuplicateField(_)
                | ErrorDetail::ColumnMismatch { .. }
        )
    }
}
