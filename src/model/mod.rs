//! Value types of the repository model: revisions, paths and path patterns,
//! entries, changes, commits, queries and project/repository metadata.
//!
//! Everything in this module is a pure value with structural equality and a
//! stable serde representation; the wire format of the HTTP API reuses these
//! types directly.

pub mod change;
pub mod commit;
pub mod entry;
pub mod path;
pub mod project;
pub mod query;
pub mod revision;

pub use change::{Change, ChangeContent};
pub use commit::{Author, Commit, CommitDetail, CommitMessage, PushResult};
pub use entry::{Entry, EntryContent, EntryType, ListEntry};
pub use path::{PathPattern, normalize_path, validate_file_path};
pub use project::{Project, RepoStatus, Repository};
pub use query::{Query, QueryType};
pub use revision::Revision;
