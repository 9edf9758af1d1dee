//! HTTP transport adapter for the engine: the axum router for the
//! `/api/v1` surface, including the long-poll watch endpoint.
//!
//! Handlers stay thin: parse parameters, call the registry/engine or submit
//! a command, serialize the result. All mutating requests travel through
//! the command applier, never straight into the registry.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use super::types::{
    ApiError, ApiResult, CreateProjectRequest, CreateRepositoryRequest, NormalizedRevision,
    Params, PushRequest, StatusPatchOp, WatchFileResult, WatchRepoResult, require_unremove_patch,
};
use crate::errors::DogmaError;
use crate::internal::command::{Command, CommandApplier, CommandEnvelope, CommandOutput};
use crate::internal::registry::ProjectRegistry;
use crate::model::{Author, PathPattern, Query as FileQuery, Revision};

const DEFAULT_WATCH_TIMEOUT_MILLIS: u64 = 60_000;
const DEFAULT_MAX_COMMITS: usize = 100;

/// Shared state of the API: the registry for reads, the applier for writes.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProjectRegistry>,
    pub applier: Arc<CommandApplier>,
}

/// Build the `/api/v1` router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/projects", get(list_projects).post(create_project))
        .route(
            "/api/v1/projects/{project}",
            axum::routing::delete(remove_project).patch(patch_project),
        )
        .route(
            "/api/v1/projects/{project}/removed",
            axum::routing::delete(purge_project),
        )
        .route(
            "/api/v1/projects/{project}/repos",
            get(list_repos).post(create_repo),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}",
            axum::routing::delete(remove_repo).patch(patch_repo),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/removed",
            axum::routing::delete(purge_repo),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/revision/{rev}",
            get(normalize_revision),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/files/{*path}",
            get(get_files),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/list",
            get(list_root),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/list/{*path}",
            get(list_files),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/history",
            get(history_root),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/history/{*path}",
            get(history),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/compare",
            get(compare_root),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/compare/{*path}",
            get(compare),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/preview",
            post(preview),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/contents",
            get(contents_root).post(push),
        )
        .route(
            "/api/v1/projects/{project}/repos/{repo}/contents/{*path}",
            get(contents),
        )
        .with_state(state)
}

fn is_pattern(path: &str) -> bool {
    path.contains(['*', '?', ',', '{'])
}

fn request_author() -> Author {
    // Authentication is a front-end concern; the core records the anonymous
    // author the same way unauthenticated clients are reported.
    Author::new("anonymous", "anonymous@localhost")
}

fn idempotency_token(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
}

async fn submit(
    state: &AppState,
    headers: &HeaderMap,
    command: Command,
) -> Result<CommandOutput, DogmaError> {
    state
        .applier
        .submit(CommandEnvelope {
            token: idempotency_token(headers),
            author: request_author(),
            command,
        })
        .await
}

// ---- projects ----

async fn list_projects(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = Params(params);
    let removed = params.get("status") == Some("removed");
    let projects = state.registry.list_projects(removed).await?;
    Ok(Json(projects).into_response())
}

async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateProjectRequest>,
) -> ApiResult<Response> {
    let output = submit(&state, &headers, Command::CreateProject { name: body.name }).await?;
    let CommandOutput::Project(project) = output else {
        return Err(DogmaError::Storage("unexpected command output".to_string()).into());
    };
    Ok((StatusCode::CREATED, Json(project)).into_response())
}

async fn remove_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> ApiResult<StatusCode> {
    submit(&state, &headers, Command::RemoveProject { name: project }).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn patch_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
    Json(ops): Json<Vec<StatusPatchOp>>,
) -> ApiResult<Response> {
    require_unremove_patch(&ops)?;
    let output = submit(&state, &headers, Command::UnremoveProject { name: project }).await?;
    let CommandOutput::Project(project) = output else {
        return Err(DogmaError::Storage("unexpected command output".to_string()).into());
    };
    Ok(Json(project).into_response())
}

async fn purge_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> ApiResult<StatusCode> {
    submit(&state, &headers, Command::PurgeProject { name: project }).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- repositories ----

async fn list_repos(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = Params(params);
    let removed = params.get("status") == Some("removed");
    let repos = state.registry.list_repos(&project, removed).await?;
    Ok(Json(repos).into_response())
}

async fn create_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
    Json(body): Json<CreateRepositoryRequest>,
) -> ApiResult<Response> {
    let output = submit(
        &state,
        &headers,
        Command::CreateRepository {
            project,
            name: body.name,
        },
    )
    .await?;
    let CommandOutput::Repository(repo) = output else {
        return Err(DogmaError::Storage("unexpected command output".to_string()).into());
    };
    Ok((StatusCode::CREATED, Json(repo)).into_response())
}

async fn remove_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project, repo)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    submit(
        &state,
        &headers,
        Command::RemoveRepository {
            project,
            name: repo,
        },
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn patch_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project, repo)): Path<(String, String)>,
    Json(ops): Json<Vec<StatusPatchOp>>,
) -> ApiResult<Response> {
    require_unremove_patch(&ops)?;
    let output = submit(
        &state,
        &headers,
        Command::UnremoveRepository {
            project,
            name: repo,
        },
    )
    .await?;
    let CommandOutput::Repository(repo) = output else {
        return Err(DogmaError::Storage("unexpected command output".to_string()).into());
    };
    Ok(Json(repo).into_response())
}

async fn purge_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project, repo)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    submit(
        &state,
        &headers,
        Command::PurgeRepository {
            project,
            name: repo,
        },
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- contents ----

async fn normalize_revision(
    State(state): State<AppState>,
    Path((project, repo, rev)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let engine = state.registry.repo(&project, &repo).await?;
    let revision = engine.normalize(rev.parse()?)?;
    Ok(Json(NormalizedRevision { revision }).into_response())
}

fn file_query(path: &str, params: &Params) -> Result<FileQuery, DogmaError> {
    let exprs = params.get_all("jsonpath");
    if exprs.is_empty() {
        FileQuery::identity(path)
    } else {
        FileQuery::of_json_path(path, exprs)
    }
}

async fn fetch(
    state: &AppState,
    project: &str,
    repo: &str,
    path: &str,
    params: &Params,
) -> ApiResult<Response> {
    let engine = state.registry.repo(project, repo).await?;
    let revision = params.revision("revision")?;
    if is_pattern(path) {
        let pattern = PathPattern::new(path)?;
        let found = engine.find(revision, &pattern, None).await?;
        let entries: Vec<_> = found.values().cloned().collect();
        Ok(Json(entries).into_response())
    } else {
        let query = file_query(path, params)?;
        let entry = engine.get(revision, &query).await?;
        Ok(Json((*entry).clone()).into_response())
    }
}

async fn get_files(
    State(state): State<AppState>,
    Path((project, repo, path)): Path<(String, String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = Params(params);
    fetch(&state, &project, &repo, &format!("/{path}"), &params).await
}

async fn list_at(
    state: &AppState,
    project: &str,
    repo: &str,
    pattern: &str,
    params: &Params,
) -> ApiResult<Response> {
    let engine = state.registry.repo(project, repo).await?;
    let revision = params.revision("revision")?;
    let pattern = if is_pattern(pattern) {
        PathPattern::new(pattern)?
    } else if pattern == "/" {
        PathPattern::all()
    } else {
        // Listing a plain path means the path itself plus its direct
        // children when it is a directory.
        let base = pattern.trim_end_matches('/');
        PathPattern::new(&format!("{base},{base}/*"))?
    };
    let listed = engine.list(revision, &pattern, None).await?;
    Ok(Json((*listed).clone()).into_response())
}

async fn list_root(
    State(state): State<AppState>,
    Path((project, repo)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = Params(params);
    list_at(&state, &project, &repo, "/", &params).await
}

async fn list_files(
    State(state): State<AppState>,
    Path((project, repo, path)): Path<(String, String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = Params(params);
    list_at(&state, &project, &repo, &format!("/{path}"), &params).await
}

async fn history_at(
    state: &AppState,
    project: &str,
    repo: &str,
    pattern: &str,
    params: &Params,
) -> ApiResult<Response> {
    let engine = state.registry.repo(project, repo).await?;
    let from = params.revision("from")?;
    let to = match params.get("to") {
        Some(raw) => raw.parse()?,
        None => Revision::INIT,
    };
    let max_commits = match params.get("maxCommits") {
        Some(raw) => raw.parse::<usize>().map_err(|_| {
            DogmaError::InvalidArgument(format!("invalid maxCommits: `{raw}`"))
        })?,
        None => DEFAULT_MAX_COMMITS,
    };
    let pattern = if pattern == "/" {
        PathPattern::all()
    } else {
        PathPattern::new(pattern)?
    };
    let commits = engine.history(from, to, &pattern, max_commits).await?;
    Ok(Json((*commits).clone()).into_response())
}

async fn history_root(
    State(state): State<AppState>,
    Path((project, repo)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = Params(params);
    history_at(&state, &project, &repo, "/", &params).await
}

async fn history(
    State(state): State<AppState>,
    Path((project, repo, path)): Path<(String, String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = Params(params);
    history_at(&state, &project, &repo, &format!("/{path}"), &params).await
}

async fn compare_at(
    state: &AppState,
    project: &str,
    repo: &str,
    target: &str,
    params: &Params,
) -> ApiResult<Response> {
    let engine = state.registry.repo(project, repo).await?;
    let from = match params.get("from") {
        Some(raw) => raw.parse()?,
        None => Revision::INIT,
    };
    let to = params.revision("to")?;
    if is_pattern(target) || params.get("pathPattern").is_some() {
        let pattern = match params.get("pathPattern") {
            Some(p) => PathPattern::new(p)?,
            None => PathPattern::new(target)?,
        };
        let changes = engine.diff(from, to, &pattern).await?;
        let changes: Vec<_> = changes.values().cloned().collect();
        Ok(Json(changes).into_response())
    } else {
        let query = file_query(target, params)?;
        let change = engine.diff_query(from, to, &query).await?;
        Ok(Json((*change).clone()).into_response())
    }
}

async fn compare_root(
    State(state): State<AppState>,
    Path((project, repo)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = Params(params);
    let target = params
        .get("path")
        .map(str::to_string)
        .unwrap_or_else(|| "/**".to_string());
    compare_at(&state, &project, &repo, &target, &params).await
}

async fn compare(
    State(state): State<AppState>,
    Path((project, repo, path)): Path<(String, String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = Params(params);
    compare_at(&state, &project, &repo, &format!("/{path}"), &params).await
}

async fn preview(
    State(state): State<AppState>,
    Path((project, repo)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
    Json(body): Json<PushRequest>,
) -> ApiResult<Response> {
    let params = Params(params);
    let engine = state.registry.repo(&project, &repo).await?;
    let base = params.revision("revision")?;
    let normalized = engine.preview(base, &body.changes).await?;
    Ok(Json(normalized).into_response())
}

async fn push(
    State(state): State<AppState>,
    Path((project, repo)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    Json(body): Json<PushRequest>,
) -> ApiResult<Response> {
    let params = Params(params);
    let base = params.revision("revision")?;
    let output = submit(
        &state,
        &headers,
        Command::Push {
            project,
            repo,
            base,
            message: body.commit_message,
            changes: body.changes,
        },
    )
    .await?;
    let CommandOutput::Pushed(result) = output else {
        return Err(DogmaError::Storage("unexpected command output".to_string()).into());
    };
    Ok(Json(result).into_response())
}

// ---- long-poll watch ----

fn watch_timeout(params: &Params, headers: &HeaderMap) -> Duration {
    if let Some(raw) = params.get("timeoutMillis")
        && let Ok(millis) = raw.parse::<u64>()
    {
        return Duration::from_millis(millis);
    }
    if let Some(prefer) = headers.get("prefer").and_then(|v| v.to_str().ok())
        && let Some(seconds) = prefer.trim().strip_prefix("wait=")
        && let Ok(seconds) = seconds.parse::<u64>()
    {
        return Duration::from_secs(seconds);
    }
    Duration::from_millis(DEFAULT_WATCH_TIMEOUT_MILLIS)
}

fn last_known_revision(params: &Params, headers: &HeaderMap) -> Option<String> {
    if let Some(raw) = params.get("lastKnownRevision") {
        return Some(raw.to_string());
    }
    headers
        .get("if-none-match")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string())
}

fn not_modified(last_known: Revision) -> Response {
    (
        StatusCode::NOT_MODIFIED,
        [("last-known-revision", last_known.to_string())],
    )
        .into_response()
}

async fn contents_at(
    state: &AppState,
    project: &str,
    repo: &str,
    path: &str,
    params: &Params,
    headers: &HeaderMap,
) -> ApiResult<Response> {
    let Some(last_known_raw) = last_known_revision(params, headers) else {
        // No last-known revision means a plain fetch.
        return fetch(state, project, repo, path, params).await;
    };
    let last_known: Revision = last_known_raw.parse()?;
    let timeout = watch_timeout(params, headers);
    let engine = state.registry.repo(project, repo).await?;

    if is_pattern(path) {
        let pattern = PathPattern::new(path)?;
        match engine
            .watch_repo(last_known, &pattern, timeout)
            .await
            .map_err(ApiError::watching)?
        {
            Some(revision) => Ok(Json(WatchRepoResult { revision }).into_response()),
            None => Ok(not_modified(last_known)),
        }
    } else {
        let query = file_query(path, params)?;
        match engine
            .watch_file(last_known, &query, timeout)
            .await
            .map_err(ApiError::watching)?
        {
            Some(entry) => Ok(Json(WatchFileResult {
                revision: entry.revision,
                entry: (*entry).clone(),
            })
            .into_response()),
            None => Ok(not_modified(last_known)),
        }
    }
}

async fn contents_root(
    State(state): State<AppState>,
    Path((project, repo)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let params = Params(params);
    contents_at(&state, &project, &repo, "/**", &params, &headers).await
}

async fn contents(
    State(state): State<AppState>,
    Path((project, repo, path)): Path<(String, String, String)>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let params = Params(params);
    contents_at(&state, &project, &repo, &format!("/{path}"), &params, &headers).await
}
