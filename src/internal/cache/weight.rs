//! Cache weights for the result shapes the engine memoizes: content bytes
//! plus path/query string lengths, approximated without re-serializing.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::internal::cache::CacheWeight;
use crate::model::{Change, ChangeContent, Commit, Entry, EntryContent, ListEntry};

/// Approximate serialized size of a JSON tree.
pub fn json_weight(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(_) => 5,
        Value::Number(_) => 8,
        Value::String(s) => s.len() + 2,
        Value::Array(items) => 2 + items.iter().map(json_weight).sum::<usize>(),
        Value::Object(map) => {
            2 + map
                .iter()
                .map(|(k, v)| k.len() + 4 + json_weight(v))
                .sum::<usize>()
        }
    }
}

fn entry_content_weight(content: &EntryContent) -> usize {
    match content {
        EntryContent::Json(value) => json_weight(value),
        EntryContent::Text(text) => text.len(),
        EntryContent::Directory => 0,
    }
}

fn change_weight(change: &Change) -> usize {
    change.path.len()
        + match &change.content {
            ChangeContent::UpsertJson(value) | ChangeContent::ApplyJsonPatch(value) => {
                json_weight(value)
            }
            ChangeContent::UpsertText(text) | ChangeContent::ApplyTextPatch(text) => text.len(),
            ChangeContent::Remove => 0,
            ChangeContent::Rename(to) => to.len(),
        }
}

impl CacheWeight for Entry {
    fn cache_weight(&self) -> usize {
        self.path.len() + self.url.len() + entry_content_weight(&self.content) + 16
    }
}

impl CacheWeight for BTreeMap<String, Entry> {
    fn cache_weight(&self) -> usize {
        self.iter()
            .map(|(path, entry)| path.len() + entry.cache_weight())
            .sum::<usize>()
            + 16
    }
}

impl CacheWeight for Vec<ListEntry> {
    fn cache_weight(&self) -> usize {
        self.iter().map(|e| e.path.len() + 8).sum::<usize>() + 16
    }
}

impl CacheWeight for Change {
    fn cache_weight(&self) -> usize {
        change_weight(self) + 16
    }
}

impl CacheWeight for BTreeMap<String, Change> {
    fn cache_weight(&self) -> usize {
        self.iter()
            .map(|(path, change)| path.len() + change_weight(change))
            .sum::<usize>()
            + 16
    }
}

impl CacheWeight for Vec<Commit> {
    fn cache_weight(&self) -> usize {
        self.iter()
            .map(|c| {
                c.author.name.len()
                    + c.author.email.len()
                    + c.commit_message.summary.len()
                    + 48
            })
            .sum::<usize>()
            + 16
    }
}
