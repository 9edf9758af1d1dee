//! The repository engine: reads, diffs, history, previews and the push
//! pipeline over one content-addressed object store, plus the long-poll
//! watch entry points.
//!
//! A [`Repo`] owns its revision index, reference storage and watcher.
//! Reads resolve the revision, consult the result cache and fetch trees and
//! blobs through the object store; they never take the write lock. A push
//! holds the write lock from the apply phase until the head has advanced, so
//! commits within a repository are totally ordered and the index only ever
//! sees exact successors.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

pub mod content;
pub mod objects;
pub mod push;
pub mod textpatch;

pub use push::PushLimits;

use crate::errors::DogmaError;
use crate::internal::cache::{Fingerprint, Operation, ResultCache};
use crate::internal::index::RevisionIndex;
use crate::internal::repo::content::FileContent;
use crate::internal::repo::objects::{CommitRecord, Manifest, ManifestEntry};
use crate::internal::store::refs::MAIN_REF;
use crate::internal::store::{ObjectKind, ObjectStore, RefStore};
use crate::internal::watch::{CloseReason, CommitEvent, RepoWatcher};
use crate::model::{
    Author, Change, Commit, CommitMessage, Entry, EntryContent, EntryType, ListEntry, PathPattern,
    PushResult, Query, Repository, Revision,
};

/// Hard engine cap on commits returned by one history read, regardless of
/// the caller's `maxCommits`.
pub const MAX_HISTORY_COMMITS: usize = 1000;

/// A single repository: an append-only history of commits over a file tree.
pub struct Repo {
    project: String,
    name: String,
    /// Per-instance identity; cache fingerprints key on this, never on the
    /// name, so a re-created repository starts cold.
    instance_id: Uuid,
    creator: Author,
    created_at: DateTime<Utc>,
    store: Arc<dyn ObjectStore>,
    index: RevisionIndex,
    refs: RefStore,
    cache: Arc<ResultCache>,
    watcher: RepoWatcher,
    write_lock: tokio::sync::Mutex<()>,
    limits: PushLimits,
    max_watch_timeout: Duration,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("project", &self.project)
            .field("name", &self.name)
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl Repo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project: impl Into<String>,
        name: impl Into<String>,
        creator: Author,
        store: Arc<dyn ObjectStore>,
        cache: Arc<ResultCache>,
        limits: PushLimits,
        eval_workers: usize,
        max_watch_timeout: Duration,
    ) -> Repo {
        let project = project.into();
        let name = name.into();
        let label = format!("{project}/{name}");
        Repo {
            project,
            name,
            instance_id: Uuid::new_v4(),
            creator,
            created_at: Utc::now(),
            store,
            index: RevisionIndex::new(),
            refs: RefStore::new(),
            cache,
            watcher: RepoWatcher::new(label, eval_workers),
            write_lock: tokio::sync::Mutex::new(()),
            limits,
            max_watch_timeout,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Repository metadata as listed by the API.
    pub fn info(&self) -> Repository {
        Repository {
            name: self.name.clone(),
            creator: self.creator.clone(),
            head_revision: self.head(),
            created_at: self.created_at,
            removed_at: None,
        }
    }

    /// The highest absolute revision; 0 for a repository with no commits.
    pub fn head(&self) -> Revision {
        Revision::from(self.index.head())
    }

    /// Resolve a possibly-relative revision against the current head.
    pub fn normalize(&self, rev: Revision) -> Result<Revision, DogmaError> {
        rev.normalize(self.index.head())
    }

    fn entry_url(&self, path: &str) -> String {
        format!(
            "/api/v1/projects/{}/repos/{}/contents{path}",
            self.project, self.name
        )
    }

    fn fingerprint(&self, op: Operation) -> Fingerprint {
        Fingerprint {
            repo: self.instance_id,
            op,
        }
    }

    async fn load_commit(&self, abs: i64) -> Result<CommitRecord, DogmaError> {
        let id = self.index.get(abs)?;
        let (_, data) = self.store.get(&id, Some(ObjectKind::Commit)).await?;
        CommitRecord::from_data(&data)
    }

    async fn manifest_at(&self, abs: i64) -> Result<Manifest, DogmaError> {
        if abs == 0 {
            return Ok(Manifest::empty());
        }
        let commit = self.load_commit(abs).await?;
        let (_, data) = self.store.get(&commit.tree, Some(ObjectKind::Tree)).await?;
        Manifest::from_data(&data)
    }

    async fn load_content(&self, entry: &ManifestEntry) -> Result<FileContent, DogmaError> {
        let (_, blob) = self.store.get(&entry.blob, Some(ObjectKind::Blob)).await?;
        FileContent::from_blob(entry.kind, &blob)
    }

    /// The commit of an absolute or relative revision, in stored form.
    pub async fn commit_record(&self, rev: Revision) -> Result<CommitRecord, DogmaError> {
        let abs = self.normalize(rev)?.as_i64();
        if abs == 0 {
            return Err(DogmaError::RevisionNotFound(
                "the repository has no commits yet".to_string(),
            ));
        }
        self.load_commit(abs).await
    }

    /// Directories implied by the files of a manifest, deepest included.
    fn directories_of(manifest: &Manifest) -> BTreeSet<String> {
        let mut dirs = BTreeSet::new();
        for (path, _) in manifest.iter() {
            let mut end = path.len();
            while let Some(slash) = path[..end].rfind('/') {
                if slash == 0 {
                    break;
                }
                dirs.insert(path[..slash].to_string());
                end = slash;
            }
        }
        dirs
    }

    /// Find entries matching a pattern at a revision, with content, ordered
    /// by path ascending.
    pub async fn find(
        &self,
        rev: Revision,
        pattern: &PathPattern,
        max_entries: Option<usize>,
    ) -> Result<Arc<BTreeMap<String, Entry>>, DogmaError> {
        let abs = self.normalize(rev)?.as_i64();
        let fingerprint = self.fingerprint(Operation::Find {
            revision: abs,
            pattern: pattern.as_str().to_string(),
            max_entries,
        });
        self.cache
            .get_or_load(fingerprint, || self.find_uncached(abs, pattern, max_entries))
            .await
    }

    async fn find_uncached(
        &self,
        abs: i64,
        pattern: &PathPattern,
        max_entries: Option<usize>,
    ) -> Result<BTreeMap<String, Entry>, DogmaError> {
        let manifest = self.manifest_at(abs).await?;
        let cap = max_entries.unwrap_or(usize::MAX);
        let mut found = BTreeMap::new();

        for dir in Self::directories_of(&manifest) {
            if pattern.matches(&dir) {
                found.insert(
                    dir.clone(),
                    Entry {
                        path: dir.clone(),
                        content: EntryContent::Directory,
                        revision: Revision::from(abs),
                        url: self.entry_url(&dir),
                    },
                );
            }
        }
        for (path, entry) in manifest.iter() {
            if !pattern.matches(path) {
                continue;
            }
            let content = self.load_content(entry).await?;
            found.insert(
                path.clone(),
                Entry {
                    path: path.clone(),
                    content: content.into_entry_content(),
                    revision: Revision::from(abs),
                    url: self.entry_url(path),
                },
            );
        }
        // The cap keeps the smallest paths, matching the ascending order.
        while found.len() > cap {
            found.pop_last();
        }
        Ok(found)
    }

    /// List entries matching a pattern at a revision, without content.
    pub async fn list(
        &self,
        rev: Revision,
        pattern: &PathPattern,
        max_entries: Option<usize>,
    ) -> Result<Arc<Vec<ListEntry>>, DogmaError> {
        let abs = self.normalize(rev)?.as_i64();
        let fingerprint = self.fingerprint(Operation::List {
            revision: abs,
            pattern: pattern.as_str().to_string(),
            max_entries,
        });
        self.cache
            .get_or_load(fingerprint, || async move {
                let manifest = self.manifest_at(abs).await?;
                let mut listed = BTreeMap::new();
                for dir in Self::directories_of(&manifest) {
                    if pattern.matches(&dir) {
                        listed.insert(dir.clone(), EntryType::Directory);
                    }
                }
                for (path, entry) in manifest.iter() {
                    if pattern.matches(path) {
                        listed.insert(path.clone(), entry.kind);
                    }
                }
                let cap = max_entries.unwrap_or(usize::MAX);
                Ok(listed
                    .into_iter()
                    .take(cap)
                    .map(|(path, kind)| ListEntry { path, r#type: kind })
                    .collect())
            })
            .await
    }

    /// Fetch one entry, optionally projected by a JSON-path query.
    pub async fn get(&self, rev: Revision, query: &Query) -> Result<Arc<Entry>, DogmaError> {
        let abs = self.normalize(rev)?.as_i64();
        let fingerprint = self.fingerprint(Operation::Query {
            revision: abs,
            query: query.fingerprint(),
        });
        self.cache
            .get_or_load(fingerprint, || self.get_uncached(abs, query))
            .await
    }

    async fn get_uncached(&self, abs: i64, query: &Query) -> Result<Entry, DogmaError> {
        let manifest = self.manifest_at(abs).await?;
        let path = query.path();
        let entry = manifest.get(path).ok_or_else(|| {
            DogmaError::EntryNotFound(format!("`{path}` at revision {abs}"))
        })?;
        let content = match self.load_content(entry).await? {
            FileContent::Json(value) => EntryContent::Json(query.apply_json(&value)?),
            FileContent::Text(text) => match query.query_type() {
                crate::model::QueryType::Identity => EntryContent::Text(text),
                crate::model::QueryType::JsonPath(_) => {
                    return Err(DogmaError::QueryExecution(format!(
                        "JSON-path query on text file `{path}`"
                    )));
                }
            },
        };
        Ok(Entry {
            path: path.to_string(),
            content,
            revision: Revision::from(abs),
            url: self.entry_url(path),
        })
    }

    /// Diff two revisions under a pattern: path → the change that turns
    /// `from` into `to` at that path.
    pub async fn diff(
        &self,
        from: Revision,
        to: Revision,
        pattern: &PathPattern,
    ) -> Result<Arc<BTreeMap<String, Change>>, DogmaError> {
        let abs_from = self.normalize(from)?.as_i64();
        let abs_to = self.normalize(to)?.as_i64();
        let fingerprint = self.fingerprint(Operation::Diff {
            from: abs_from,
            to: abs_to,
            pattern: pattern.as_str().to_string(),
        });
        self.cache
            .get_or_load(fingerprint, || self.diff_uncached(abs_from, abs_to, pattern))
            .await
    }

    async fn diff_uncached(
        &self,
        abs_from: i64,
        abs_to: i64,
        pattern: &PathPattern,
    ) -> Result<BTreeMap<String, Change>, DogmaError> {
        let from = self.manifest_at(abs_from).await?;
        let to = self.manifest_at(abs_to).await?;

        let mut paths: BTreeSet<&String> = from.iter().map(|(p, _)| p).collect();
        paths.extend(to.iter().map(|(p, _)| p));

        let mut changes = BTreeMap::new();
        for path in paths {
            if !pattern.matches(path) {
                continue;
            }
            match (from.get(path), to.get(path)) {
                (Some(_), None) => {
                    changes.insert(path.clone(), Change::remove(path.clone()));
                }
                (None, Some(entry)) => {
                    changes.insert(path.clone(), self.upsert_of(path, entry).await?);
                }
                (Some(before), Some(after)) => {
                    if before != after {
                        changes.insert(path.clone(), self.upsert_of(path, after).await?);
                    }
                }
                (None, None) => unreachable!("path came from one of the manifests"),
            }
        }
        Ok(changes)
    }

    async fn upsert_of(&self, path: &str, entry: &ManifestEntry) -> Result<Change, DogmaError> {
        Ok(match self.load_content(entry).await? {
            FileContent::Json(value) => Change::upsert_json(path, value),
            FileContent::Text(text) => Change::upsert_text(path, text),
        })
    }

    /// Diff a single file between two revisions through a query: a JSON
    /// patch for JSON results, a unified diff for text.
    pub async fn diff_query(
        &self,
        from: Revision,
        to: Revision,
        query: &Query,
    ) -> Result<Arc<Change>, DogmaError> {
        let abs_from = self.normalize(from)?.as_i64();
        let abs_to = self.normalize(to)?.as_i64();
        let fingerprint = self.fingerprint(Operation::DiffQuery {
            from: abs_from,
            to: abs_to,
            query: query.fingerprint(),
        });
        self.cache
            .get_or_load(fingerprint, || async move {
                let path = query.path();
                let before = self.query_content(abs_from, query).await?;
                let after = self.query_content(abs_to, query).await?;
                match (before, after) {
                    (None, None) => Err(DogmaError::EntryNotFound(format!(
                        "`{path}` at revisions {abs_from} and {abs_to}"
                    ))),
                    (Some(_), None) => Ok(Change::remove(path)),
                    (None, Some(content)) => Ok(match content {
                        EntryContent::Json(value) => Change::upsert_json(path, value),
                        EntryContent::Text(text) => Change::upsert_text(path, text),
                        EntryContent::Directory => {
                            return Err(DogmaError::QueryExecution(format!(
                                "`{path}` is a directory"
                            )));
                        }
                    }),
                    (Some(EntryContent::Json(a)), Some(EntryContent::Json(b))) => {
                        let patch = json_patch::diff(&a, &b);
                        Ok(Change {
                            path: path.to_string(),
                            content: crate::model::ChangeContent::ApplyJsonPatch(
                                serde_json::to_value(patch).map_err(|e| {
                                    DogmaError::Storage(format!("patch serialization: {e}"))
                                })?,
                            ),
                        })
                    }
                    (Some(EntryContent::Text(a)), Some(EntryContent::Text(b))) => Ok(Change {
                        path: path.to_string(),
                        content: crate::model::ChangeContent::ApplyTextPatch(
                            textpatch::render_unified(path, &a, &b),
                        ),
                    }),
                    _ => Err(DogmaError::QueryExecution(format!(
                        "`{path}` changed type between revisions {abs_from} and {abs_to}"
                    ))),
                }
            })
            .await
    }

    /// Commit log between two revisions, filtered by a path pattern.
    /// Newest-first when `from > to`, oldest-first otherwise.
    pub async fn history(
        &self,
        from: Revision,
        to: Revision,
        pattern: &PathPattern,
        max_commits: usize,
    ) -> Result<Arc<Vec<Commit>>, DogmaError> {
        if max_commits == 0 {
            return Err(DogmaError::InvalidArgument(
                "maxCommits must be positive".to_string(),
            ));
        }
        let abs_from = self.normalize(from)?.as_i64();
        let abs_to = self.normalize(to)?.as_i64();
        let fingerprint = self.fingerprint(Operation::History {
            from: abs_from,
            to: abs_to,
            pattern: pattern.as_str().to_string(),
            max_commits,
        });
        self.cache
            .get_or_load(fingerprint, || async move {
                let newest_first = abs_from >= abs_to;
                let lo = abs_from.min(abs_to).max(1);
                let hi = abs_from.max(abs_to);
                let cap = max_commits.min(MAX_HISTORY_COMMITS);

                let mut commits = Vec::new();
                if hi >= 1 {
                    let range: Vec<i64> = if newest_first {
                        (lo..=hi).rev().collect()
                    } else {
                        (lo..=hi).collect()
                    };
                    for abs in range {
                        if commits.len() >= cap {
                            break;
                        }
                        let record = self.load_commit(abs).await?;
                        let matches = record.changes.iter().any(|c| {
                            c.touched_paths().into_iter().any(|p| pattern.matches(p))
                        });
                        if matches {
                            commits.push(record.to_commit());
                        }
                    }
                }
                Ok(commits)
            })
            .await
    }

    /// Apply changes onto `base` without committing and return the
    /// normalized change set a push would record.
    pub async fn preview(
        &self,
        base: Revision,
        changes: &[Change],
    ) -> Result<Vec<Change>, DogmaError> {
        let abs = self.normalize(base)?.as_i64();
        let manifest = self.manifest_at(abs).await?;
        push::preview(&manifest, changes, &self.limits, self.store.as_ref()).await
    }

    /// Push a change set against `base`, producing the next commit.
    pub async fn push(
        &self,
        base: Revision,
        author: Author,
        message: CommitMessage,
        changes: Vec<Change>,
    ) -> Result<PushResult, DogmaError> {
        // Phase 2: resolve the base before taking the lock; an absolute base
        // stays valid however far the head advances in the meantime.
        let abs_base = self.normalize(base)?.as_i64();

        let _write = self.write_lock.lock().await;
        let head = self.index.head();
        if abs_base < head {
            tracing::debug!(
                repo = %self.watch_label(),
                base = abs_base,
                head,
                "push rebases onto a newer head"
            );
        }
        let base_manifest = self.manifest_at(abs_base).await?;
        let head_manifest = self.manifest_at(head).await?;

        let prepared = push::prepare(
            &base_manifest,
            &head_manifest,
            &changes,
            &self.limits,
            self.store.as_ref(),
        )
        .await?;

        // Build the next tree from the head tree and the survivors.
        let mut next = head_manifest;
        for survivor in &prepared.survivors {
            match &survivor.after {
                Some((kind, blob, bytes)) => {
                    if let Some(bytes) = bytes {
                        let inserted = self.store.insert(ObjectKind::Blob, bytes).await?;
                        debug_assert_eq!(inserted, *blob);
                    }
                    next.insert(
                        survivor.path.clone(),
                        ManifestEntry {
                            kind: *kind,
                            blob: *blob,
                        },
                    );
                }
                None => {
                    next.remove(&survivor.path);
                }
            }
        }

        let revision = head + 1;
        let tree_id = self.store.insert(ObjectKind::Tree, &next.to_data()?).await?;
        let parent = if head == 0 {
            None
        } else {
            Some(self.index.get(head)?)
        };
        let record = CommitRecord {
            revision,
            parent,
            tree: tree_id,
            author,
            when: Utc::now(),
            summary: message.summary,
            detail: message.detail,
            changes: prepared.effective.clone(),
        };
        let commit_id = self.store.insert(ObjectKind::Commit, &record.to_data()?).await?;

        // The index append is the atomic publication point.
        self.index.put(revision, commit_id)?;
        self.refs.update(MAIN_REF, parent, commit_id)?;
        drop(_write);

        tracing::debug!(
            repo = %self.watch_label(),
            revision,
            changes = prepared.effective.len(),
            "pushed commit"
        );
        self.watcher.publish(CommitEvent {
            revision,
            changes: Arc::new(prepared.effective),
        });
        Ok(PushResult {
            revision: Revision::from(revision),
            pushed_at: record.when,
        })
    }

    fn watch_label(&self) -> String {
        format!("{}/{}", self.project, self.name)
    }

    fn clamp_timeout(&self, timeout: Duration) -> Duration {
        timeout.min(self.max_watch_timeout)
    }

    /// Block until a commit newer than `last_known` touches a path matching
    /// `pattern`, or the timeout expires (`Ok(None)`).
    pub async fn watch_repo(
        &self,
        last_known: Revision,
        pattern: &PathPattern,
        timeout: Duration,
    ) -> Result<Option<Revision>, DogmaError> {
        let deadline = Instant::now() + self.clamp_timeout(timeout);
        let mut floor = self.normalize(last_known)?.as_i64();
        loop {
            // Catch up before parking: a commit that landed between the
            // caller reading `last_known` and this call must still be seen.
            let head = self.index.head();
            if head > floor {
                for abs in ((floor + 1)..=head).rev() {
                    let record = self.load_commit(abs).await?;
                    let matches = record.changes.iter().any(|c| {
                        c.touched_paths().into_iter().any(|p| pattern.matches(p))
                    });
                    if matches {
                        return Ok(Some(Revision::from(abs)));
                    }
                }
                floor = head;
            }
            let handle = self.watcher.subscribe(floor, pattern.clone())?;
            if self.index.head() > floor {
                // A commit raced the registration; rescan instead of parking.
                continue;
            }
            match tokio::time::timeout_at(deadline, handle.wait()).await {
                Ok(Ok(event)) => return Ok(Some(Revision::from(event.revision))),
                Ok(Err(cancelled)) => return Err(cancelled),
                Err(_elapsed) => return Ok(None),
            }
        }
    }

    async fn query_content(
        &self,
        abs: i64,
        query: &Query,
    ) -> Result<Option<EntryContent>, DogmaError> {
        if abs == 0 {
            return Ok(None);
        }
        match self.get(Revision::from(abs), query).await {
            Ok(entry) => Ok(Some(entry.content.clone())),
            Err(DogmaError::EntryNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Block until the query's result differs from its result at
    /// `last_known`, or the timeout expires (`Ok(None)`).
    ///
    /// Query evaluation runs in the caller's task but is bounded by the
    /// repository's evaluation pool, so the notifier stays non-blocking and
    /// no watcher can starve the rest.
    pub async fn watch_file(
        &self,
        last_known: Revision,
        query: &Query,
        timeout: Duration,
    ) -> Result<Option<Arc<Entry>>, DogmaError> {
        let deadline = Instant::now() + self.clamp_timeout(timeout);
        let mut floor = self.normalize(last_known)?.as_i64();
        let baseline = self.query_content(floor, query).await?;
        let pattern = PathPattern::new(query.path())?;
        loop {
            let head = self.index.head();
            if head > floor {
                let permit = self.watcher.eval_permit().await;
                let current = self.query_content(head, query).await?;
                drop(permit);
                if current != baseline {
                    return match current {
                        Some(_) => {
                            let entry = self.get(Revision::from(head), query).await?;
                            Ok(Some(entry))
                        }
                        None => Err(DogmaError::EntryNotFound(format!(
                            "`{}` was removed at revision {head}",
                            query.path()
                        ))),
                    };
                }
                floor = head;
            }
            let handle = self.watcher.subscribe(floor, pattern.clone())?;
            if self.index.head() > floor {
                continue;
            }
            match tokio::time::timeout_at(deadline, handle.wait()).await {
                Ok(Ok(_event)) => continue,
                Ok(Err(cancelled)) => return Err(cancelled),
                Err(_elapsed) => return Ok(None),
            }
        }
    }

    /// Cancel all parked watchers, e.g. on removal or shutdown.
    pub fn close_watchers(&self, reason: CloseReason) {
        self.watcher.close(reason);
    }

    /// Admit watchers again after an un-remove.
    pub fn reopen_watchers(&self) {
        self.watcher.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::store::KvObjectStore;
    use crate::internal::store::memory::MemKvStore;
    use serde_json::json;

    fn test_repo() -> Repo {
        Repo::new(
            "proj",
            "main",
            Author::new("alice", "alice@example.com"),
            Arc::new(KvObjectStore::new(MemKvStore::new())),
            Arc::new(ResultCache::new(1 << 20, 8)),
            PushLimits {
                max_changes: 100,
                max_content_bytes: 1 << 20,
            },
            2,
            Duration::from_secs(60),
        )
    }

    async fn push_one(repo: &Repo, path: &str, value: serde_json::Value) -> PushResult {
        repo.push(
            Revision::HEAD,
            Author::new("alice", "alice@example.com"),
            CommitMessage::summary_only(format!("update {path}")),
            vec![Change::upsert_json(path, value)],
        )
        .await
        .unwrap()
    }

    /// The first push creates revision 1; reading HEAD sees it.
    #[tokio::test]
    async fn test_first_push_is_revision_one() {
        let repo = test_repo();
        assert_eq!(repo.head(), Revision::from(0));

        let result = push_one(&repo, "/a.json", json!({"x": 1})).await;
        assert_eq!(result.revision, Revision::from(1));
        assert_eq!(repo.head(), Revision::from(1));

        let entry = repo
            .get(Revision::HEAD, &Query::identity("/a.json").unwrap())
            .await
            .unwrap();
        assert_eq!(entry.content, EntryContent::Json(json!({"x": 1})));
        assert_eq!(entry.revision, Revision::from(1));
    }

    /// Every push advances the head by exactly one and links its parent.
    #[tokio::test]
    async fn test_dense_history() {
        let repo = test_repo();
        for i in 1..=4 {
            push_one(&repo, "/a.json", json!({ "n": i })).await;
        }
        assert_eq!(repo.head(), Revision::from(4));

        for k in 1..=4i64 {
            let record = repo.commit_record(Revision::from(k)).await.unwrap();
            assert_eq!(record.revision, k);
            match k {
                1 => assert!(record.parent.is_none()),
                _ => assert!(record.parent.is_some()),
            }
        }
    }

    /// A push equal to head state is redundant; the head does not move.
    #[tokio::test]
    async fn test_redundant_push() {
        let repo = test_repo();
        push_one(&repo, "/a.json", json!({"x": 1})).await;

        let err = repo
            .push(
                Revision::HEAD,
                Author::new("bob", "bob@example.com"),
                CommitMessage::summary_only("same again"),
                vec![Change::upsert_json("/a.json", json!({"x": 1}))],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "redundant-change");
        assert_eq!(repo.head(), Revision::from(1));
    }

    /// Two pushes from the same base to the same path: one wins, one
    /// conflicts.
    #[tokio::test]
    async fn test_conflicting_pushes() {
        let repo = test_repo();
        for i in 1..=3 {
            push_one(&repo, "/seed.json", json!({ "n": i })).await;
        }
        let base = repo.head();

        let first = repo
            .push(
                base,
                Author::new("a", "a@example.com"),
                CommitMessage::summary_only("set A"),
                vec![Change::upsert_json("/x.json", json!("A"))],
            )
            .await
            .unwrap();
        assert_eq!(first.revision, Revision::from(4));

        let second = repo
            .push(
                base,
                Author::new("b", "b@example.com"),
                CommitMessage::summary_only("set B"),
                vec![Change::upsert_json("/x.json", json!("B"))],
            )
            .await
            .unwrap_err();
        assert_eq!(second.kind(), "change-conflict");
        assert_eq!(repo.head(), Revision::from(4));
    }

    /// find returns files and implied directories in path order.
    #[tokio::test]
    async fn test_find_with_directories() {
        let repo = test_repo();
        repo.push(
            Revision::HEAD,
            Author::new("a", "a@example.com"),
            CommitMessage::summary_only("seed"),
            vec![
                Change::upsert_json("/conf/a.json", json!(1)),
                Change::upsert_text("/conf/sub/b.txt", "b"),
                Change::upsert_json("/top.json", json!(2)),
            ],
        )
        .await
        .unwrap();

        let found = repo
            .find(Revision::HEAD, &PathPattern::all(), None)
            .await
            .unwrap();
        let paths: Vec<&String> = found.keys().collect();
        assert_eq!(
            paths,
            vec!["/conf", "/conf/a.json", "/conf/sub", "/conf/sub/b.txt", "/top.json"]
        );
        assert_eq!(found["/conf"].content, EntryContent::Directory);

        let listed = repo
            .list(Revision::HEAD, &PathPattern::new("/conf/*").unwrap(), None)
            .await
            .unwrap();
        let listed_paths: Vec<&str> = listed.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(listed_paths, vec!["/conf/a.json", "/conf/sub"]);
    }

    /// Applying diff(a, b) semantics: the diff maps exactly the paths that
    /// changed, removals as REMOVE and additions/modifications as UPSERT.
    #[tokio::test]
    async fn test_diff_between_revisions() {
        let repo = test_repo();
        repo.push(
            Revision::HEAD,
            Author::new("a", "a@example.com"),
            CommitMessage::summary_only("r1"),
            vec![
                Change::upsert_json("/keep.json", json!(1)),
                Change::upsert_json("/gone.json", json!(2)),
            ],
        )
        .await
        .unwrap();
        repo.push(
            Revision::HEAD,
            Author::new("a", "a@example.com"),
            CommitMessage::summary_only("r2"),
            vec![
                Change::remove("/gone.json"),
                Change::upsert_json("/keep.json", json!(10)),
                Change::upsert_text("/new.txt", "hi"),
            ],
        )
        .await
        .unwrap();

        let diff = repo
            .diff(Revision::from(1), Revision::from(2), &PathPattern::all())
            .await
            .unwrap();
        assert_eq!(diff.len(), 3);
        assert_eq!(diff["/gone.json"], Change::remove("/gone.json"));
        assert_eq!(diff["/keep.json"], Change::upsert_json("/keep.json", json!(10)));
        assert_eq!(diff["/new.txt"], Change::upsert_text("/new.txt", "hi\n"));

        // Same revision diffs to nothing.
        let none = repo
            .diff(Revision::from(2), Revision::from(2), &PathPattern::all())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    /// History honors order, pattern filtering and the cap.
    #[tokio::test]
    async fn test_history() {
        let repo = test_repo();
        push_one(&repo, "/a.json", json!(1)).await;
        push_one(&repo, "/b.json", json!(2)).await;
        push_one(&repo, "/a.json", json!(3)).await;

        let newest_first = repo
            .history(Revision::HEAD, Revision::INIT, &PathPattern::all(), 10)
            .await
            .unwrap();
        let revs: Vec<i64> = newest_first.iter().map(|c| c.revision.as_i64()).collect();
        assert_eq!(revs, vec![3, 2, 1]);

        let only_a = repo
            .history(
                Revision::INIT,
                Revision::HEAD,
                &PathPattern::new("/a.json").unwrap(),
                10,
            )
            .await
            .unwrap();
        let revs: Vec<i64> = only_a.iter().map(|c| c.revision.as_i64()).collect();
        assert_eq!(revs, vec![1, 3]);

        let capped = repo
            .history(Revision::HEAD, Revision::INIT, &PathPattern::all(), 2)
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);
    }

    /// A cached read at an absolute revision returns the identical Arc.
    #[tokio::test]
    async fn test_reads_are_cached() {
        let repo = test_repo();
        push_one(&repo, "/a.json", json!({"x": 1})).await;

        let query = Query::identity("/a.json").unwrap();
        let first = repo.get(Revision::from(1), &query).await.unwrap();
        let second = repo.get(Revision::from(1), &query).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    /// A read through HEAD observes a push immediately.
    #[tokio::test]
    async fn test_head_read_after_push() {
        let repo = test_repo();
        push_one(&repo, "/a.json", json!({"v": 1})).await;
        let query = Query::identity("/a.json").unwrap();
        assert_eq!(
            repo.get(Revision::HEAD, &query).await.unwrap().content,
            EntryContent::Json(json!({"v": 1}))
        );

        push_one(&repo, "/a.json", json!({"v": 2})).await;
        assert_eq!(
            repo.get(Revision::HEAD, &query).await.unwrap().content,
            EntryContent::Json(json!({"v": 2}))
        );
    }
}
