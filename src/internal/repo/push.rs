//! The push pipeline: validation, apply, normalization and conflict
//! detection. Five ordered phases, each failing fast with a typed error:
//!
//! 1. validation — paths, patches and content types are checked and parsed;
//! 2. base resolution — done by the caller, which hands in the base and head
//!    manifests;
//! 3. apply — changes build a working tree from the base, in input order,
//!    last writer wins per path except JSON patches, which stack;
//! 4. normalization — changes whose effect already exists at head are
//!    dropped; an empty survivor set is a redundant push;
//! 5. conflict detection — a surviving path whose content differs between
//!    base and head was modified concurrently and fails the push.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::DogmaError;
use crate::hash::ContentId;
use crate::internal::repo::content::FileContent;
use crate::internal::repo::objects::{Manifest, ManifestEntry};
use crate::internal::repo::textpatch;
use crate::internal::store::{ObjectKind, ObjectStore};
use crate::model::path::validate_file_path;
use crate::model::{Change, ChangeContent, EntryType};

/// Push limits enforced during validation.
#[derive(Debug, Clone, Copy)]
pub struct PushLimits {
    pub max_changes: usize,
    pub max_content_bytes: usize,
}

/// A change after validation: paths checked, patches parsed, content
/// canonicalized.
enum ValidChange {
    Upsert { path: String, content: FileContent },
    Remove { path: String },
    Rename { path: String, to: String },
    JsonPatch { path: String, patch: json_patch::Patch },
    TextPatch { path: String, patch: String },
}

impl ValidChange {
    fn path(&self) -> &str {
        match self {
            ValidChange::Upsert { path, .. }
            | ValidChange::Remove { path }
            | ValidChange::Rename { path, .. }
            | ValidChange::JsonPatch { path, .. }
            | ValidChange::TextPatch { path, .. } => path,
        }
    }
}

/// Phase 1: validate and parse the submitted changes.
fn validate(changes: &[Change], limits: &PushLimits) -> Result<Vec<ValidChange>, DogmaError> {
    if changes.is_empty() {
        return Err(DogmaError::RedundantChange(
            "the push contains no changes".to_string(),
        ));
    }
    if changes.len() > limits.max_changes {
        return Err(DogmaError::InvalidPush(format!(
            "{} changes exceed the limit of {}",
            changes.len(),
            limits.max_changes
        )));
    }

    let mut total_bytes = 0usize;
    let mut valid = Vec::with_capacity(changes.len());
    for change in changes {
        validate_file_path(&change.path)?;
        let parsed = match &change.content {
            ChangeContent::UpsertJson(value) => {
                total_bytes += value.to_string().len();
                ValidChange::Upsert {
                    path: change.path.clone(),
                    content: FileContent::ingest_json(&change.path, value.clone())?,
                }
            }
            ChangeContent::UpsertText(text) => {
                total_bytes += text.len();
                ValidChange::Upsert {
                    path: change.path.clone(),
                    content: FileContent::ingest_text(&change.path, text)?,
                }
            }
            ChangeContent::Remove => ValidChange::Remove {
                path: change.path.clone(),
            },
            ChangeContent::Rename(to) => {
                validate_file_path(to)?;
                ValidChange::Rename {
                    path: change.path.clone(),
                    to: to.clone(),
                }
            }
            ChangeContent::ApplyJsonPatch(value) => {
                total_bytes += value.to_string().len();
                let patch: json_patch::Patch =
                    serde_json::from_value(value.clone()).map_err(|e| {
                        DogmaError::InvalidPush(format!(
                            "JSON patch for `{}` is malformed: {e}",
                            change.path
                        ))
                    })?;
                ValidChange::JsonPatch {
                    path: change.path.clone(),
                    patch,
                }
            }
            ChangeContent::ApplyTextPatch(patch) => {
                total_bytes += patch.len();
                textpatch::validate_patch(&change.path, patch)?;
                ValidChange::TextPatch {
                    path: change.path.clone(),
                    patch: patch.clone(),
                }
            }
        };
        valid.push(parsed);
    }
    if total_bytes > limits.max_content_bytes {
        return Err(DogmaError::InvalidPush(format!(
            "content size of {total_bytes} bytes exceeds the limit of {} bytes",
            limits.max_content_bytes
        )));
    }
    Ok(valid)
}

/// An entry of the working tree built during the apply phase.
#[derive(Clone)]
enum WorkEntry {
    /// Carried over from the base tree; content not loaded.
    Untouched(ManifestEntry),
    /// Created or modified by this push.
    Loaded(FileContent),
}

struct WorkingTree<'a> {
    entries: BTreeMap<String, WorkEntry>,
    store: &'a dyn ObjectStore,
}

impl WorkingTree<'_> {
    fn from_manifest<'a>(manifest: &Manifest, store: &'a dyn ObjectStore) -> WorkingTree<'a> {
        WorkingTree {
            entries: manifest
                .iter()
                .map(|(p, e)| (p.clone(), WorkEntry::Untouched(*e)))
                .collect(),
            store,
        }
    }

    /// Materialize the content of a working entry.
    async fn load(&self, entry: &WorkEntry) -> Result<FileContent, DogmaError> {
        match entry {
            WorkEntry::Loaded(content) => Ok(content.clone()),
            WorkEntry::Untouched(manifest_entry) => {
                let (_, blob) = self
                    .store
                    .get(&manifest_entry.blob, Some(ObjectKind::Blob))
                    .await?;
                FileContent::from_blob(manifest_entry.kind, &blob)
            }
        }
    }
}

/// Phase 3: apply validated changes in input order onto the base tree.
async fn apply<'a>(
    base: &Manifest,
    changes: Vec<ValidChange>,
    store: &'a dyn ObjectStore,
) -> Result<(WorkingTree<'a>, BTreeSet<String>), DogmaError> {
    let mut tree = WorkingTree::from_manifest(base, store);
    let mut touched = BTreeSet::new();

    for change in changes {
        touched.insert(change.path().to_string());
        match change {
            ValidChange::Upsert { path, content } => {
                tree.entries.insert(path, WorkEntry::Loaded(content));
            }
            ValidChange::Remove { path } => {
                if tree.entries.remove(&path).is_none() {
                    return Err(DogmaError::ChangeConflict(format!(
                        "cannot remove non-existent file `{path}`"
                    )));
                }
            }
            ValidChange::Rename { path, to } => {
                let Some(entry) = tree.entries.remove(&path) else {
                    return Err(DogmaError::ChangeConflict(format!(
                        "cannot rename non-existent file `{path}`"
                    )));
                };
                if tree.entries.contains_key(&to) {
                    return Err(DogmaError::ChangeConflict(format!(
                        "cannot rename `{path}` to existing file `{to}`"
                    )));
                }
                touched.insert(to.clone());
                tree.entries.insert(to, entry);
            }
            ValidChange::JsonPatch { path, patch } => {
                let Some(entry) = tree.entries.get(&path) else {
                    return Err(DogmaError::ChangeConflict(format!(
                        "cannot patch non-existent file `{path}`"
                    )));
                };
                let FileContent::Json(mut value) = tree.load(entry).await? else {
                    return Err(DogmaError::ChangeConflict(format!(
                        "cannot apply a JSON patch to text file `{path}`"
                    )));
                };
                json_patch::patch(&mut value, &patch).map_err(|e| {
                    DogmaError::ChangeConflict(format!(
                        "JSON patch does not apply to `{path}`: {e}"
                    ))
                })?;
                tree.entries
                    .insert(path, WorkEntry::Loaded(FileContent::Json(value)));
            }
            ValidChange::TextPatch { path, patch } => {
                let Some(entry) = tree.entries.get(&path) else {
                    return Err(DogmaError::ChangeConflict(format!(
                        "cannot patch non-existent file `{path}`"
                    )));
                };
                let FileContent::Text(old) = tree.load(entry).await? else {
                    return Err(DogmaError::ChangeConflict(format!(
                        "cannot apply a text patch to JSON file `{path}`"
                    )));
                };
                let new = textpatch::apply_unified(&path, &old, &patch)?;
                tree.entries
                    .insert(path, WorkEntry::Loaded(FileContent::Text(new)));
            }
        }
    }
    Ok((tree, touched))
}

/// A path that survived normalization, with its state after the push.
#[derive(Debug)]
pub(crate) struct Survivor {
    pub path: String,
    /// `None` means the path is removed; otherwise the entry type, blob ID,
    /// and the blob bytes when they still need inserting.
    pub after: Option<(EntryType, ContentId, Option<Vec<u8>>)>,
}

/// The outcome of phases 1–5, ready to persist.
#[derive(Debug)]
pub(crate) struct PreparedPush {
    /// Normalized changes, in path order: what the commit records and what
    /// watchers are matched against.
    pub effective: Vec<Change>,
    pub survivors: Vec<Survivor>,
}

fn blob_of(content: &FileContent) -> Result<(EntryType, ContentId, Vec<u8>), DogmaError> {
    let bytes = content.to_blob()?;
    Ok((content.kind(), ContentId::of(ObjectKind::Blob, &bytes), bytes))
}

/// Run phases 1 and 3–5 of the pipeline.
///
/// `base` and `head` are the manifests of the resolved base revision and of
/// the current head; the caller resolves revisions (phase 2) and holds the
/// repository write lock.
pub(crate) async fn prepare(
    base: &Manifest,
    head: &Manifest,
    changes: &[Change],
    limits: &PushLimits,
    store: &dyn ObjectStore,
) -> Result<PreparedPush, DogmaError> {
    let valid = validate(changes, limits)?;
    let (tree, touched) = apply(base, valid, store).await?;

    // Phase 4: drop changes whose effect is already present at head.
    let mut survivors = Vec::new();
    let mut effective = Vec::new();
    for path in &touched {
        let after = match tree.entries.get(path) {
            Some(WorkEntry::Untouched(entry)) => Some((entry.kind, entry.blob, None)),
            Some(WorkEntry::Loaded(content)) => {
                let (kind, id, bytes) = blob_of(content)?;
                Some((kind, id, Some(bytes)))
            }
            None => None,
        };
        let at_head = head.get(path);
        let unchanged = match (&after, at_head) {
            (None, None) => true,
            (Some((kind, id, _)), Some(entry)) => *kind == entry.kind && *id == entry.blob,
            _ => false,
        };
        if unchanged {
            continue;
        }
        match &after {
            Some((_, _, _)) => {
                let content = tree
                    .load(tree.entries.get(path).expect("surviving path exists"))
                    .await?;
                effective.push(match content {
                    FileContent::Json(value) => Change::upsert_json(path.clone(), value),
                    FileContent::Text(text) => Change::upsert_text(path.clone(), text),
                });
            }
            None => effective.push(Change::remove(path.clone())),
        }
        survivors.push(Survivor {
            path: path.clone(),
            after,
        });
    }
    if survivors.is_empty() {
        return Err(DogmaError::RedundantChange(
            "every change is already present at the head revision".to_string(),
        ));
    }

    // Phase 5: a surviving path modified between base and head conflicts.
    for survivor in &survivors {
        let at_base = base.get(&survivor.path);
        let at_head = head.get(&survivor.path);
        if at_base != at_head {
            return Err(DogmaError::ChangeConflict(format!(
                "`{}` changed between the base revision and the head",
                survivor.path
            )));
        }
    }

    Ok(PreparedPush {
        effective,
        survivors,
    })
}

/// Phases 1 and 3 only, diffing the result against `base` instead of
/// normalizing against a head: the preview of what a push would do.
pub(crate) async fn preview(
    base: &Manifest,
    changes: &[Change],
    limits: &PushLimits,
    store: &dyn ObjectStore,
) -> Result<Vec<Change>, DogmaError> {
    let valid = validate(changes, limits)?;
    let (tree, touched) = apply(base, valid, store).await?;

    let mut normalized = Vec::new();
    for path in &touched {
        match tree.entries.get(path) {
            Some(entry) => {
                if let Some(at_base) = base.get(path)
                    && let WorkEntry::Untouched(current) = entry
                    && current == at_base
                {
                    continue;
                }
                let content = tree.load(entry).await?;
                let (kind, id, _) = blob_of(&content)?;
                if let Some(at_base) = base.get(path)
                    && at_base.kind == kind
                    && at_base.blob == id
                {
                    continue;
                }
                normalized.push(match content {
                    FileContent::Json(value) => Change::upsert_json(path.clone(), value),
                    FileContent::Text(text) => Change::upsert_text(path.clone(), text),
                });
            }
            None => {
                if base.get(path).is_some() {
                    normalized.push(Change::remove(path.clone()));
                }
            }
        }
    }
    Ok(normalized)
}
