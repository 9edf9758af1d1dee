//! The project/repository registry: creation, soft-removal, un-removal and
//! purge, plus the wiring that gives every repository its object store,
//! cache handle and watch scheduler.
//!
//! Soft-removal marks an item with a removal timestamp, hides it from
//! normal listings and cancels its watchers, but keeps all storage. Purge
//! hard-deletes a previously removed item. The reserved `meta` and `dogma`
//! repositories come into existence with their project and can never be
//! removed.
//!
//! All mutating entry points are `pub(crate)`: writes reach them through the
//! command applier only, so within one process every state transition is
//! serialized.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::config::{DogmaConfig, parse_size};
use crate::errors::DogmaError;
use crate::internal::cache::ResultCache;
use crate::internal::repo::{PushLimits, Repo};
use crate::internal::store::{
    EncryptedObjectStore, FileKvStore, KeyManager, KvObjectStore, KvStore, MemKvStore, ObjectStore,
};
use crate::internal::watch::CloseReason;
use crate::model::project::{is_reserved_repo, validate_name};
use crate::model::{Author, Project, Repository};

/// A repository slot inside a project: the engine plus its removal state.
struct RepoHolder {
    repo: Arc<Repo>,
    removed_at: StdRwLock<Option<DateTime<Utc>>>,
}

impl RepoHolder {
    fn removed_at(&self) -> Option<DateTime<Utc>> {
        *self.removed_at.read().expect("repo state lock poisoned")
    }

    fn info(&self) -> Repository {
        let mut info = self.repo.info();
        info.removed_at = self.removed_at();
        info
    }
}

/// One project and its repositories.
pub struct ProjectHolder {
    name: String,
    creator: Author,
    created_at: DateTime<Utc>,
    removed_at: StdRwLock<Option<DateTime<Utc>>>,
    repos: RwLock<BTreeMap<String, Arc<RepoHolder>>>,
}

impl ProjectHolder {
    fn removed_at(&self) -> Option<DateTime<Utc>> {
        *self.removed_at.read().expect("project state lock poisoned")
    }

    pub fn info(&self) -> Project {
        Project {
            name: self.name.clone(),
            creator: self.creator.clone(),
            created_at: self.created_at,
            removed_at: self.removed_at(),
        }
    }
}

fn engine_limits(config: &DogmaConfig) -> PushLimits {
    PushLimits {
        max_changes: config.push.max_changes,
        max_content_bytes: parse_size(&config.push.max_content_bytes).unwrap_or(8 << 20),
    }
}

/// The process-wide registry. Holds every project, the shared result cache
/// and the key manager of the encrypted store variant.
pub struct ProjectRegistry {
    projects: RwLock<BTreeMap<String, Arc<ProjectHolder>>>,
    cache: Arc<ResultCache>,
    keys: Arc<KeyManager>,
    config: DogmaConfig,
    limits: PushLimits,
    shutting_down: AtomicBool,
}

impl ProjectRegistry {
    pub fn new(config: DogmaConfig) -> ProjectRegistry {
        let cache = Arc::new(ResultCache::from_config(&config.cache));
        let limits = engine_limits(&config);
        ProjectRegistry {
            projects: RwLock::new(BTreeMap::new()),
            cache,
            keys: Arc::new(KeyManager::new()),
            config,
            limits,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// An in-memory registry, the configuration used throughout the tests.
    pub fn in_memory() -> ProjectRegistry {
        let mut config = DogmaConfig::default();
        config.storage.in_memory = true;
        ProjectRegistry::new(config)
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// The key manager backing encrypted repositories; its KEK lifecycle is
    /// an administrative surface, opaque to the engine.
    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    fn ensure_running(&self) -> Result<(), DogmaError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(DogmaError::ShuttingDown);
        }
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn repo_storage_dir(&self, project: &str, repo: &str) -> PathBuf {
        self.config
            .storage
            .root
            .join("projects")
            .join(project)
            .join("repos")
            .join(repo)
            .join("objects")
    }

    fn build_store(&self, project: &str, repo: &str) -> Result<Arc<dyn ObjectStore>, DogmaError> {
        let backing: Box<dyn KvStore> = if self.config.storage.in_memory {
            Box::new(MemKvStore::new())
        } else {
            Box::new(FileKvStore::new(self.repo_storage_dir(project, repo))?)
        };
        if self.config.storage.encrypt_at_rest {
            let repo_key = format!("{project}/{repo}");
            self.keys.create_repo_dek(&repo_key)?;
            Ok(Arc::new(EncryptedObjectStore::new(
                backing,
                self.keys.clone(),
                repo_key,
            )))
        } else {
            Ok(Arc::new(KvObjectStore::new(backing)))
        }
    }

    fn build_repo(
        &self,
        project: &str,
        name: &str,
        creator: Author,
    ) -> Result<Arc<RepoHolder>, DogmaError> {
        let store = self.build_store(project, name)?;
        let repo = Repo::new(
            project,
            name,
            creator,
            store,
            self.cache.clone(),
            self.limits,
            self.config.watch.eval_workers,
            Duration::from_millis(self.config.watch.max_timeout_millis),
        );
        Ok(Arc::new(RepoHolder {
            repo: Arc::new(repo),
            removed_at: StdRwLock::new(None),
        }))
    }

    // ---- read side ----

    /// Projects in either the active or the removed state.
    pub async fn list_projects(&self, removed: bool) -> Result<Vec<Project>, DogmaError> {
        self.ensure_running()?;
        let projects = self.projects.read().await;
        Ok(projects
            .values()
            .filter(|p| p.removed_at().is_some() == removed)
            .map(|p| p.info())
            .collect())
    }

    async fn project_any(&self, name: &str) -> Result<Arc<ProjectHolder>, DogmaError> {
        let projects = self.projects.read().await;
        projects
            .get(name)
            .cloned()
            .ok_or_else(|| DogmaError::ProjectNotFound(name.to_string()))
    }

    /// An active project.
    pub async fn project(&self, name: &str) -> Result<Arc<ProjectHolder>, DogmaError> {
        self.ensure_running()?;
        let holder = self.project_any(name).await?;
        if holder.removed_at().is_some() {
            return Err(DogmaError::ProjectNotFound(name.to_string()));
        }
        Ok(holder)
    }

    /// Repositories of an active project, active or removed ones.
    pub async fn list_repos(
        &self,
        project: &str,
        removed: bool,
    ) -> Result<Vec<Repository>, DogmaError> {
        let holder = self.project(project).await?;
        let repos = holder.repos.read().await;
        Ok(repos
            .values()
            .filter(|r| r.removed_at().is_some() == removed)
            .map(|r| r.info())
            .collect())
    }

    async fn repo_holder_any(
        &self,
        project: &str,
        name: &str,
    ) -> Result<Arc<RepoHolder>, DogmaError> {
        let holder = self.project(project).await?;
        let repos = holder.repos.read().await;
        repos
            .get(name)
            .cloned()
            .ok_or_else(|| DogmaError::RepositoryNotFound(format!("{project}/{name}")))
    }

    /// An active repository engine.
    pub async fn repo(&self, project: &str, name: &str) -> Result<Arc<Repo>, DogmaError> {
        self.ensure_running()?;
        let holder = self.repo_holder_any(project, name).await?;
        if holder.removed_at().is_some() {
            return Err(DogmaError::RepositoryNotFound(format!("{project}/{name}")));
        }
        Ok(holder.repo.clone())
    }

    /// Metadata of one repository, removed or not.
    pub async fn repo_info(&self, project: &str, name: &str) -> Result<Repository, DogmaError> {
        self.ensure_running()?;
        Ok(self.repo_holder_any(project, name).await?.info())
    }

    // ---- write side (reached through the command applier) ----

    pub(crate) async fn create_project(
        &self,
        name: &str,
        author: Author,
    ) -> Result<Project, DogmaError> {
        self.ensure_running()?;
        validate_name(name)?;
        let mut projects = self.projects.write().await;
        if projects.contains_key(name) {
            return Err(DogmaError::ProjectExists(name.to_string()));
        }

        let mut repos = BTreeMap::new();
        for reserved in crate::model::project::RESERVED_REPOS {
            repos.insert(
                reserved.to_string(),
                self.build_repo(name, reserved, author.clone())?,
            );
        }
        let holder = Arc::new(ProjectHolder {
            name: name.to_string(),
            creator: author,
            created_at: Utc::now(),
            removed_at: StdRwLock::new(None),
            repos: RwLock::new(repos),
        });
        projects.insert(name.to_string(), holder.clone());
        tracing::info!(project = name, "created project");
        Ok(holder.info())
    }

    pub(crate) async fn remove_project(&self, name: &str) -> Result<(), DogmaError> {
        self.ensure_running()?;
        let holder = self.project(name).await?;
        *holder.removed_at.write().expect("project state lock poisoned") = Some(Utc::now());
        for repo in holder.repos.read().await.values() {
            repo.repo.close_watchers(CloseReason::RepositoryRemoved);
        }
        tracing::info!(project = name, "removed project");
        Ok(())
    }

    pub(crate) async fn unremove_project(&self, name: &str) -> Result<Project, DogmaError> {
        self.ensure_running()?;
        let holder = self.project_any(name).await?;
        if holder.removed_at().is_none() {
            // Un-removing an active project is a no-op, not an error.
            return Ok(holder.info());
        }
        *holder.removed_at.write().expect("project state lock poisoned") = None;
        for repo in holder.repos.read().await.values() {
            if repo.removed_at().is_none() {
                repo.repo.reopen_watchers();
            }
        }
        tracing::info!(project = name, "unremoved project");
        Ok(holder.info())
    }

    pub(crate) async fn purge_project(&self, name: &str) -> Result<(), DogmaError> {
        self.ensure_running()?;
        let mut projects = self.projects.write().await;
        let Some(holder) = projects.get(name) else {
            return Err(DogmaError::ProjectNotFound(name.to_string()));
        };
        if holder.removed_at().is_none() {
            return Err(DogmaError::InvalidArgument(format!(
                "project `{name}` must be removed before it can be purged"
            )));
        }
        let holder = projects.remove(name).expect("checked above");
        for (repo_name, repo) in holder.repos.read().await.iter() {
            repo.repo.close_watchers(CloseReason::RepositoryRemoved);
            self.keys.drop_repo_dek(&format!("{name}/{repo_name}"));
        }
        if !self.config.storage.in_memory {
            let dir = self.config.storage.root.join("projects").join(name);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(project = name, error = %e, "failed to delete project storage");
            }
        }
        tracing::info!(project = name, "purged project");
        Ok(())
    }

    pub(crate) async fn create_repo(
        &self,
        project: &str,
        name: &str,
        author: Author,
    ) -> Result<Repository, DogmaError> {
        self.ensure_running()?;
        validate_name(name)?;
        if is_reserved_repo(name) {
            return Err(DogmaError::InvalidArgument(format!(
                "`{name}` is a reserved repository name"
            )));
        }
        let holder = self.project(project).await?;
        let mut repos = holder.repos.write().await;
        if repos.contains_key(name) {
            return Err(DogmaError::RepositoryExists(format!("{project}/{name}")));
        }
        let repo = self.build_repo(project, name, author)?;
        let info = repo.info();
        repos.insert(name.to_string(), repo);
        tracing::info!(project, repo = name, "created repository");
        Ok(info)
    }

    pub(crate) async fn remove_repo(&self, project: &str, name: &str) -> Result<(), DogmaError> {
        self.ensure_running()?;
        if is_reserved_repo(name) {
            return Err(DogmaError::InvalidArgument(format!(
                "reserved repository `{name}` cannot be removed"
            )));
        }
        let holder = self.repo_holder_any(project, name).await?;
        if holder.removed_at().is_some() {
            return Err(DogmaError::RepositoryNotFound(format!("{project}/{name}")));
        }
        *holder.removed_at.write().expect("repo state lock poisoned") = Some(Utc::now());
        holder.repo.close_watchers(CloseReason::RepositoryRemoved);
        tracing::info!(project, repo = name, "removed repository");
        Ok(())
    }

    pub(crate) async fn unremove_repo(
        &self,
        project: &str,
        name: &str,
    ) -> Result<Repository, DogmaError> {
        self.ensure_running()?;
        let holder = self.repo_holder_any(project, name).await?;
        if holder.removed_at().is_some() {
            *holder.removed_at.write().expect("repo state lock poisoned") = None;
            holder.repo.reopen_watchers();
            tracing::info!(project, repo = name, "unremoved repository");
        }
        Ok(holder.info())
    }

    pub(crate) async fn purge_repo(&self, project: &str, name: &str) -> Result<(), DogmaError> {
        self.ensure_running()?;
        let project_holder = self.project(project).await?;
        let mut repos = project_holder.repos.write().await;
        let Some(holder) = repos.get(name) else {
            return Err(DogmaError::RepositoryNotFound(format!("{project}/{name}")));
        };
        if holder.removed_at().is_none() {
            return Err(DogmaError::InvalidArgument(format!(
                "repository `{project}/{name}` must be removed before it can be purged"
            )));
        }
        repos.remove(name);
        self.keys.drop_repo_dek(&format!("{project}/{name}"));
        if !self.config.storage.in_memory {
            let dir = self
                .config
                .storage
                .root
                .join("projects")
                .join(project)
                .join("repos")
                .join(name);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(project, repo = name, error = %e, "failed to delete repository storage");
            }
        }
        tracing::info!(project, repo = name, "purged repository");
        Ok(())
    }

    /// Refuse new work, cancel every watcher and flush the cache.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let projects = self.projects.read().await;
        for project in projects.values() {
            for repo in project.repos.read().await.values() {
                repo.repo.close_watchers(CloseReason::ShuttingDown);
            }
        }
        let stats = self.cache.stats();
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = format!("{:.2}", stats.hit_rate()),
            evictions = stats.evictions,
            "result cache at shutdown"
        );
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Creating a project creates its reserved repositories.
    #[tokio::test]
    async fn test_create_project_with_reserved_repos() {
        let registry = ProjectRegistry::in_memory();
        let project = registry
            .create_project("p1", Author::new("a", "a@example.com"))
            .await
            .unwrap();
        assert_eq!(project.name, "p1");

        let repos = registry.list_repos("p1", false).await.unwrap();
        let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["dogma", "meta"]);

        assert!(registry.repo("p1", "meta").await.is_ok());
    }

    /// Duplicate names fail with the exists kinds.
    #[tokio::test]
    async fn test_duplicate_creation() {
        let registry = ProjectRegistry::in_memory();
        let author = Author::new("a", "a@example.com");
        registry.create_project("p1", author.clone()).await.unwrap();
        assert_eq!(
            registry
                .create_project("p1", author.clone())
                .await
                .unwrap_err()
                .kind(),
            "project-exists"
        );

        registry.create_repo("p1", "r1", author.clone()).await.unwrap();
        assert_eq!(
            registry
                .create_repo("p1", "r1", author)
                .await
                .unwrap_err()
                .kind(),
            "repository-exists"
        );
    }

    /// Reserved repositories cannot be user-created or removed.
    #[tokio::test]
    async fn test_reserved_repo_guards() {
        let registry = ProjectRegistry::in_memory();
        let author = Author::new("a", "a@example.com");
        registry.create_project("p1", author.clone()).await.unwrap();

        assert_eq!(
            registry
                .create_repo("p1", "meta", author)
                .await
                .unwrap_err()
                .kind(),
            "invalid-argument"
        );
        assert_eq!(
            registry.remove_repo("p1", "dogma").await.unwrap_err().kind(),
            "invalid-argument"
        );
    }

    /// created → removed → created (un-remove) keeps the same engine and
    /// history.
    #[tokio::test]
    async fn test_remove_unremove_cycle() {
        let registry = ProjectRegistry::in_memory();
        let author = Author::new("a", "a@example.com");
        registry.create_project("p1", author.clone()).await.unwrap();
        registry.create_repo("p1", "r1", author.clone()).await.unwrap();

        let repo = registry.repo("p1", "r1").await.unwrap();
        repo.push(
            crate::model::Revision::HEAD,
            author,
            crate::model::CommitMessage::summary_only("seed"),
            vec![crate::model::Change::upsert_json(
                "/a.json",
                serde_json::json!(1),
            )],
        )
        .await
        .unwrap();

        registry.remove_repo("p1", "r1").await.unwrap();
        assert_eq!(
            registry.repo("p1", "r1").await.unwrap_err().kind(),
            "repository-not-found"
        );
        assert!(registry.list_repos("p1", false).await.unwrap().iter().all(|r| r.name != "r1"));
        let removed = registry.list_repos("p1", true).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].removed_at.is_some());

        let restored = registry.unremove_repo("p1", "r1").await.unwrap();
        assert!(restored.removed_at.is_none());
        let repo = registry.repo("p1", "r1").await.unwrap();
        assert_eq!(repo.head(), crate::model::Revision::from(1));
    }

    /// Purge requires prior removal and hard-deletes the slot.
    #[tokio::test]
    async fn test_purge_requires_removal() {
        let registry = ProjectRegistry::in_memory();
        let author = Author::new("a", "a@example.com");
        registry.create_project("p1", author.clone()).await.unwrap();
        registry.create_repo("p1", "r1", author).await.unwrap();

        assert_eq!(
            registry.purge_repo("p1", "r1").await.unwrap_err().kind(),
            "invalid-argument"
        );
        registry.remove_repo("p1", "r1").await.unwrap();
        registry.purge_repo("p1", "r1").await.unwrap();
        assert!(registry.list_repos("p1", true).await.unwrap().is_empty());
        assert_eq!(
            registry.repo_info("p1", "r1").await.unwrap_err().kind(),
            "repository-not-found"
        );
    }

    /// After shutdown every entry point refuses with shutting-down.
    #[tokio::test]
    async fn test_shutdown_refuses_work() {
        let registry = ProjectRegistry::in_memory();
        registry
            .create_project("p1", Author::new("a", "a@example.com"))
            .await
            .unwrap();
        registry.shutdown().await;

        assert_eq!(
            registry.list_projects(false).await.unwrap_err().kind(),
            "shutting-down"
        );
        assert_eq!(
            registry
                .create_project("p2", Author::new("a", "a@example.com"))
                .await
                .unwrap_err()
                .kind(),
            "shutting-down"
        );
    }

    /// Encrypted registries transparently encrypt repository contents.
    #[tokio::test]
    async fn test_encrypted_registry() {
        let mut config = DogmaConfig::default();
        config.storage.in_memory = true;
        config.storage.encrypt_at_rest = true;
        let registry = ProjectRegistry::new(config);
        let author = Author::new("a", "a@example.com");
        registry.create_project("p1", author.clone()).await.unwrap();
        registry.create_repo("p1", "r1", author.clone()).await.unwrap();

        let repo = registry.repo("p1", "r1").await.unwrap();
        repo.push(
            crate::model::Revision::HEAD,
            author,
            crate::model::CommitMessage::summary_only("secret"),
            vec![crate::model::Change::upsert_json(
                "/s.json",
                serde_json::json!({"token": "hunter2"}),
            )],
        )
        .await
        .unwrap();

        let entry = repo
            .get(
                crate::model::Revision::HEAD,
                &crate::model::Query::identity("/s.json").unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            entry.content,
            crate::model::EntryContent::Json(serde_json::json!({"token": "hunter2"}))
        );
    }
}
