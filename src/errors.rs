//! Error types for the Dogma-Internal crate.
//!
//! This module defines a unified error enumeration used across the value
//! model, object storage, the repository engine, the watch manager and the
//! HTTP protocol adapter. It integrates with `thiserror` to provide rich
//! `Display` implementations and error source chaining where applicable.
//!
//! Notes:
//! - The set of kinds is closed; every variant maps to exactly one stable
//!   wire code (see [`DogmaError::kind`]) used in error response bodies.
//! - Each variant carries contextual details via its message payload.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the Dogma-Internal library.
///
/// - Used across parsing/validation, storage, the push pipeline, queries,
///   watches and the registry.
/// - Implements `std::error::Error` via `thiserror`.
pub enum DogmaError {
    /// Malformed path, name, query or revision literal.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No project with the given name exists (or it has been removed).
    #[error("Project `{0}` does not exist")]
    ProjectNotFound(String),

    /// A project with the given name already exists.
    #[error("Project `{0}` already exists")]
    ProjectExists(String),

    /// No repository with the given name exists (or it has been removed).
    #[error("Repository `{0}` does not exist")]
    RepositoryNotFound(String),

    /// A repository with the given name already exists.
    #[error("Repository `{0}` already exists")]
    RepositoryExists(String),

    /// The file addressed by a query does not exist at the given revision.
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// The revision does not resolve to a commit of the repository.
    #[error("Revision not found: {0}")]
    RevisionNotFound(String),

    /// The push is structurally unacceptable (bad content type, over the
    /// change-count or content-size limits).
    #[error("Invalid push: {0}")]
    InvalidPush(String),

    /// A path touched by the push was modified between the base revision and
    /// the current head, or a patch failed to apply cleanly.
    #[error("Change conflict: {0}")]
    ChangeConflict(String),

    /// Every change of the push is already present at head.
    #[error("Redundant change: {0}")]
    RedundantChange(String),

    /// A JSON-path expression failed to compile.
    #[error("Invalid query: {0}")]
    QuerySyntax(String),

    /// A JSON-path expression failed to evaluate, including "no match".
    #[error("Query evaluation failed: {0}")]
    QueryExecution(String),

    /// Backend I/O or cryptographic failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error from an underlying reader or writer.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    /// The server is terminating and refuses new work.
    #[error("Server is shutting down")]
    ShuttingDown,
}

impl DogmaError {
    /// Stable wire code for this error, used as the `exception` field of
    /// HTTP error bodies. Codes are part of the public API contract.
    pub fn kind(&self) -> &'static str {
        match self {
            DogmaError::InvalidArgument(_) => "invalid-argument",
            DogmaError::ProjectNotFound(_) => "project-not-found",
            DogmaError::ProjectExists(_) => "project-exists",
            DogmaError::RepositoryNotFound(_) => "repository-not-found",
            DogmaError::RepositoryExists(_) => "repository-exists",
            DogmaError::EntryNotFound(_) => "entry-not-found",
            DogmaError::RevisionNotFound(_) => "revision-not-found",
            DogmaError::InvalidPush(_) => "invalid-push",
            DogmaError::ChangeConflict(_) => "change-conflict",
            DogmaError::RedundantChange(_) => "redundant-change",
            DogmaError::QuerySyntax(_) => "query-syntax",
            DogmaError::QueryExecution(_) => "query-execution",
            DogmaError::Storage(_) | DogmaError::IOError(_) => "storage",
            DogmaError::ShuttingDown => "shutting-down",
        }
    }
}
