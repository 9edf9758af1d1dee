//! Files and directories as they exist at a revision.

use serde::{Deserialize, Serialize};

use crate::model::revision::Revision;

/// The typed content of an [`Entry`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "type", content = "content")]
pub enum EntryContent {
    /// Content as a JSON tree. YAML and JSON5 files are normalized to this
    /// representation on ingest.
    Json(serde_json::Value),
    /// Content as a UTF-8 string.
    Text(String),
    /// This entry is a directory; directories carry no content.
    Directory,
}

/// A file or a directory in a repository at a specific revision.
///
/// Entries are immutable snapshots; mutating a file produces a new entry at
/// a higher revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Path of this entry.
    pub path: String,
    /// Content of this entry.
    #[serde(flatten)]
    pub content: EntryContent,
    /// Revision this entry was read at.
    pub revision: Revision,
    /// API url of this entry.
    pub url: String,
}

impl Entry {
    pub fn entry_type(&self) -> EntryType {
        match self.content {
            EntryContent::Json(_) => EntryType::Json,
            EntryContent::Text(_) => EntryType::Text,
            EntryContent::Directory => EntryType::Directory,
        }
    }
}

/// The type of an entry, without its content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// A UTF-8 encoded JSON file.
    Json,
    /// A UTF-8 encoded text file.
    Text,
    /// A directory.
    Directory,
}

/// Metadata of a file or a directory, as returned by content listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub path: String,
    pub r#type: EntryType,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The wire shape flattens type/content beside path and revision.
    #[test]
    fn test_entry_wire_shape() {
        let entry = Entry {
            path: "/a.json".to_string(),
            content: EntryContent::Json(serde_json::json!({"x": 1})),
            revision: Revision::from(3),
            url: "/api/v1/projects/p/repos/r/contents/a.json".to_string(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "JSON");
        assert_eq!(value["content"]["x"], 1);
        assert_eq!(value["revision"], 3);

        let back: Entry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.entry_type(), EntryType::Json);
    }

    /// Directories have a type but no content field.
    #[test]
    fn test_directory_has_no_content() {
        let entry = Entry {
            path: "/dir".to_string(),
            content: EntryContent::Directory,
            revision: Revision::from(1),
            url: String::new(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "DIRECTORY");
        assert!(value.get("content").is_none());
    }
}
