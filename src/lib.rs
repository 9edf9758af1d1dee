//! Dogma-Internal is the core engine of a highly-available, version-controlled
//! configuration repository: projects contain repositories, each repository is
//! an append-only history of commits over a tree of JSON/JSON5/YAML/text
//! files. Clients read at any revision, diff, push atomic multi-file changes,
//! and long-poll watch files or whole repositories until the watched state
//! advances past a known revision.
pub mod config;
pub mod errors;
pub mod hash;
pub mod internal;
pub mod model;
pub mod protocol;
