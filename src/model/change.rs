//! Intended edits to a repository, as submitted by a push.

use serde::{Deserialize, Serialize};

/// The typed content of a [`Change`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "type", content = "content")]
pub enum ChangeContent {
    /// Adds a new JSON file or replaces an existing file with the provided
    /// JSON tree.
    UpsertJson(serde_json::Value),

    /// Adds a new text file or replaces an existing file with the provided
    /// content.
    UpsertText(String),

    /// Removes an existing file.
    Remove,

    /// Renames an existing file to the provided destination path.
    Rename(String),

    /// Applies a JSON patch to a JSON file, as defined in
    /// [RFC 6902](https://tools.ietf.org/html/rfc6902).
    ApplyJsonPatch(serde_json::Value),

    /// Applies a textual patch in
    /// [unified format](https://en.wikipedia.org/wiki/Diff_utility#Unified_format)
    /// to a text file.
    ApplyTextPatch(String),
}

/// A modification of an individual entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Path of the file change.
    pub path: String,
    /// Content of the file change.
    #[serde(flatten)]
    pub content: ChangeContent,
}

impl Change {
    pub fn upsert_json(path: impl Into<String>, content: serde_json::Value) -> Change {
        Change {
            path: path.into(),
            content: ChangeContent::UpsertJson(content),
        }
    }

    pub fn upsert_text(path: impl Into<String>, content: impl Into<String>) -> Change {
        Change {
            path: path.into(),
            content: ChangeContent::UpsertText(content.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Change {
        Change {
            path: path.into(),
            content: ChangeContent::Remove,
        }
    }

    pub fn rename(path: impl Into<String>, to: impl Into<String>) -> Change {
        Change {
            path: path.into(),
            content: ChangeContent::Rename(to.into()),
        }
    }

    /// Paths this change touches: its own path plus, for renames, the
    /// destination.
    pub fn touched_paths(&self) -> Vec<&str> {
        match &self.content {
            ChangeContent::Rename(to) => vec![self.path.as_str(), to.as_str()],
            _ => vec![self.path.as_str()],
        }
    }
}
