use std::path::PathBuf;

use thiserror::Error;

pub type TreeResult<T> = Result<T, TreeError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures surfaced by the document engine. All of them are local to one
/// request; the stored document is never touched when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Malformed XML: {0}")]
    MalformedInput(String),

    #[error("Invalid path '{path}': {reason}")]
    BadPath { path: String, reason: String },

    #[error("Node at path '{path}' not found (step {step} matched nothing)")]
    PathNotFound { path: String, step: usize },

    #[error("Path '{path}' is ambiguous: step {step} matched {count} nodes, add an index such as [1]")]
    AmbiguousPath { path: String, step: usize, count: usize },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Missing payload: {0}")]
    MissingPayload(String),
}

impl TreeError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    pub fn bad_path(path: &str, reason: impl Into<String>) -> Self {
        Self::BadPath { path: path.to_string(), reason: reason.into() }
    }

    /// Stable code used when the error crosses the transport boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "MalformedInput",
            Self::BadPath { .. } => "BadPath",
            Self::PathNotFound { .. } => "PathNotFound",
            Self::AmbiguousPath { .. } => "AmbiguousPath",
            Self::InvalidOperation(_) => "InvalidOperation",
            Self::MissingPayload(_) => "MissingPayload",
        }
    }

    /// Both unresolvable outcomes count as "not found" for mutation and
    /// reporting purposes; only the diagnostic text differs.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PathNotFound { .. } | Self::AmbiguousPath { .. })
    }
}

/// Failures from the persistence layer, or from the engine while serving a
/// stored tree.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Tree {0} not found.")]
    TreeNotFound(u64),

    #[error("No trees found.")]
    NoTrees,

    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt tree record {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tree(e) => e.kind(),
            Self::TreeNotFound(_) | Self::NoTrees => "NotFound",
            Self::Io { .. } | Self::Corrupt { .. } => "StorageFailure",
        }
    }
}
