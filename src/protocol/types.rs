//! Wire types of the HTTP/JSON API and the mapping from engine errors to
//! HTTP statuses and stable error codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::errors::DogmaError;
use crate::model::{Entry, Revision};

/// The error body every failed request carries:
/// `{"exception": "<kind>", "message": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub exception: String,
    pub message: String,
}

/// An engine error on its way out of the API layer.
///
/// `watching` marks errors raised while a long-poll was parked: a watched
/// repository that disappears mid-poll is `410 Gone` rather than `404`.
#[derive(Debug)]
pub struct ApiError {
    error: DogmaError,
    watching: bool,
}

impl ApiError {
    pub fn watching(error: DogmaError) -> ApiError {
        ApiError {
            error,
            watching: true,
        }
    }

    fn status(&self) -> StatusCode {
        match self.error.kind() {
            "invalid-argument" | "invalid-push" | "query-syntax" | "query-execution" => {
                StatusCode::BAD_REQUEST
            }
            "project-not-found" | "repository-not-found" if self.watching => StatusCode::GONE,
            "project-not-found" | "repository-not-found" | "entry-not-found"
            | "revision-not-found" => StatusCode::NOT_FOUND,
            "project-exists" | "repository-exists" | "change-conflict" | "redundant-change" => {
                StatusCode::CONFLICT
            }
            "shutting-down" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DogmaError> for ApiError {
    fn from(error: DogmaError) -> ApiError {
        ApiError {
            error,
            watching: false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self.error, "request failed");
        }
        let body = ErrorBody {
            exception: self.error.kind().to_string(),
            message: self.error.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Decoded query-string parameters, preserving repeats.
///
/// `serde_urlencoded` cannot collect repeated keys into a `Vec` through a
/// struct, so handlers extract `Vec<(String, String)>` and read through
/// this view.
pub struct Params(pub Vec<(String, String)>);

impl Params {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Parse a revision parameter, `head` included; absent means HEAD.
    pub fn revision(&self, key: &str) -> Result<Revision, DogmaError> {
        match self.get(key) {
            Some(raw) => raw.parse(),
            None => Ok(Revision::HEAD),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRepositoryRequest {
    pub name: String,
}

/// One operation of the JSON-patch body used by PATCH un-remove requests.
#[derive(Debug, Deserialize)]
pub struct StatusPatchOp {
    pub op: String,
    pub path: String,
    pub value: serde_json::Value,
}

/// Validate the only PATCH body the API accepts:
/// `[{"op":"replace","path":"/status","value":"active"}]`.
pub fn require_unremove_patch(ops: &[StatusPatchOp]) -> Result<(), DogmaError> {
    let valid = ops.len() == 1
        && ops[0].op == "replace"
        && ops[0].path == "/status"
        && ops[0].value == serde_json::json!("active");
    if valid {
        Ok(())
    } else {
        Err(DogmaError::InvalidArgument(
            "expected [{\"op\":\"replace\",\"path\":\"/status\",\"value\":\"active\"}]".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub commit_message: crate::model::CommitMessage,
    pub changes: Vec<crate::model::Change>,
}

/// Watch completion for a file watch.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchFileResult {
    pub revision: Revision,
    pub entry: Entry,
}

/// Watch completion for a repository watch.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRepoResult {
    pub revision: Revision,
}

/// Body of the normalize endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRevision {
    pub revision: Revision,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Each error kind maps to its documented status.
    #[test]
    fn test_status_mapping() {
        let cases: Vec<(DogmaError, StatusCode)> = vec![
            (
                DogmaError::InvalidArgument("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                DogmaError::ProjectNotFound("p".into()),
                StatusCode::NOT_FOUND,
            ),
            (DogmaError::ProjectExists("p".into()), StatusCode::CONFLICT),
            (
                DogmaError::RedundantChange("r".into()),
                StatusCode::CONFLICT,
            ),
            (DogmaError::Storage("s".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (DogmaError::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    /// Mid-watch disappearance is Gone, not Not Found.
    #[test]
    fn test_watching_gone() {
        let err = ApiError::watching(DogmaError::RepositoryNotFound("p/r".into()));
        assert_eq!(err.status(), StatusCode::GONE);
        let err = ApiError::from(DogmaError::RepositoryNotFound("p/r".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    /// Repeated query keys are all visible through Params.
    #[test]
    fn test_params_repeats() {
        let params = Params(vec![
            ("jsonpath".to_string(), "$.a".to_string()),
            ("revision".to_string(), "3".to_string()),
            ("jsonpath".to_string(), "$.b".to_string()),
        ]);
        assert_eq!(params.get_all("jsonpath"), vec!["$.a", "$.b"]);
        assert_eq!(params.revision("revision").unwrap(), Revision::from(3));
        assert_eq!(params.revision("missing").unwrap(), Revision::HEAD);
    }

    /// Only the canonical un-remove patch is accepted.
    #[test]
    fn test_unremove_patch_validation() {
        let ok: Vec<StatusPatchOp> = serde_json::from_value(serde_json::json!([
            {"op": "replace", "path": "/status", "value": "active"}
        ]))
        .unwrap();
        assert!(require_unremove_patch(&ok).is_ok());

        let bad: Vec<StatusPatchOp> = serde_json::from_value(serde_json::json!([
            {"op": "replace", "path": "/status", "value": "gone"}
        ]))
        .unwrap();
        assert!(require_unremove_patch(&bad).is_err());
    }
}
