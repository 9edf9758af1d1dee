//! Typed file content and format ingestion.
//!
//! A repository stores two shapes of file: JSON trees and UTF-8 text. What a
//! pushed change becomes is decided by the path extension: `.json` parses
//! with the strict parser, `.json5` with the tolerant JSON5 parser (single
//! quotes, unquoted field names, comments, trailing commas), and
//! `.yaml`/`.yml` parse as YAML; all three normalize to the same JSON tree.
//! Everything else is text, normalized to end with a newline.
//!
//! Blob bytes are canonical: JSON serializes with sorted keys (the default
//! `serde_json::Value` map ordering), so semantically equal trees always
//! produce the same content ID.

use serde_json::Value;

use crate::errors::DogmaError;
use crate::model::{EntryContent, EntryType};

/// In-memory content of a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Json(Value),
    Text(String),
}

/// File format implied by a path extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathFormat {
    Json,
    Json5,
    Yaml,
    Text,
}

/// Decide the format of a path from its extension, case-insensitively.
pub fn format_of(path: &str) -> PathFormat {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".json") {
        PathFormat::Json
    } else if lower.ends_with(".json5") {
        PathFormat::Json5
    } else if lower.ends_with(".yaml") || lower.ends_with(".yml") {
        PathFormat::Yaml
    } else {
        PathFormat::Text
    }
}

/// Whether files at this path hold a JSON tree after ingestion.
pub fn is_json_path(path: &str) -> bool {
    format_of(path) != PathFormat::Text
}

/// Normalize text content to end with exactly the newline it needs.
pub fn normalize_text(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_owned()
    } else {
        format!("{text}\n")
    }
}

impl FileContent {
    pub fn kind(&self) -> EntryType {
        match self {
            FileContent::Json(_) => EntryType::Json,
            FileContent::Text(_) => EntryType::Text,
        }
    }

    /// Canonical blob bytes of this content.
    pub fn to_blob(&self) -> Result<Vec<u8>, DogmaError> {
        match self {
            FileContent::Json(value) => serde_json::to_vec(value)
                .map_err(|e| DogmaError::Storage(format!("JSON serialization failed: {e}"))),
            FileContent::Text(text) => Ok(text.as_bytes().to_vec()),
        }
    }

    /// Reconstruct content from blob bytes and the entry type recorded in
    /// the manifest.
    pub fn from_blob(kind: EntryType, blob: &[u8]) -> Result<FileContent, DogmaError> {
        match kind {
            EntryType::Json => serde_json::from_slice(blob)
                .map(FileContent::Json)
                .map_err(|e| DogmaError::Storage(format!("stored JSON is corrupt: {e}"))),
            EntryType::Text => String::from_utf8(blob.to_vec())
                .map(FileContent::Text)
                .map_err(|e| DogmaError::Storage(format!("stored text is not UTF-8: {e}"))),
            EntryType::Directory => {
                Err(DogmaError::Storage("directories have no blob".to_string()))
            }
        }
    }

    pub fn into_entry_content(self) -> EntryContent {
        match self {
            FileContent::Json(value) => EntryContent::Json(value),
            FileContent::Text(text) => EntryContent::Text(text),
        }
    }

    /// Ingest an upserted JSON tree. The path must imply a JSON shape.
    pub fn ingest_json(path: &str, value: Value) -> Result<FileContent, DogmaError> {
        if !is_json_path(path) {
            return Err(DogmaError::InvalidPush(format!(
                "UPSERT_JSON requires a .json/.json5/.yaml path: `{path}`"
            )));
        }
        Ok(FileContent::Json(value))
    }

    /// Ingest upserted text, parsing it according to the path format.
    pub fn ingest_text(path: &str, text: &str) -> Result<FileContent, DogmaError> {
        match format_of(path) {
            PathFormat::Json => serde_json::from_str(text).map(FileContent::Json).map_err(|e| {
                DogmaError::InvalidPush(format!("`{path}` does not parse as JSON: {e}"))
            }),
            PathFormat::Json5 => json5::from_str(text).map(FileContent::Json).map_err(|e| {
                DogmaError::InvalidPush(format!("`{path}` does not parse as JSON5: {e}"))
            }),
            PathFormat::Yaml => serde_yaml::from_str::<Value>(text)
                .map(FileContent::Json)
                .map_err(|e| {
                    DogmaError::InvalidPush(format!("`{path}` does not parse as YAML: {e}"))
                }),
            PathFormat::Text => Ok(FileContent::Text(normalize_text(text))),
        }
    }
}
