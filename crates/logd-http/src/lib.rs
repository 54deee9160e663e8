// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! HTTP shim: `MATCH`/`PATCH` on `/api/data` (spec.md §6 "HTTP").
//!
//! A thin adapter over [`logd_storage::Storage`] and [`logd_txn::TxTable`] —
//! every `PATCH` is a single-participant transaction, committed inline. No
//! watch/newtx/schema/migration surface exists here; those are
//! session-protocol only.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use logd_proto::{ErrorCode, MatchRequest, MatchResult, PatchRequest, PatchResult};
use logd_storage::{Storage, StorageError};
use logd_txn::{TxError, TxTable};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Shared state behind the router: the storage engine and the transaction
/// table `PATCH` requests commit through.
#[derive(Clone)]
pub struct AppState {
    /// Commit log, index, snapshots, schema.
    pub storage: Storage,
    /// The transaction table `PATCH` allocates single-participant
    /// transactions from.
    pub txs: Arc<TxTable>,
}

/// Build the router: one route, `/api/data`, answering `MATCH`/`PATCH` and
/// rejecting every other method with 405 (spec.md §6).
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new().route("/api/data", any(data_handler)).with_state(Arc::new(state))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: ErrorCode,
    message: String,
}

fn error_response(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: ErrorDetail { code, message: message.into() } })).into_response()
}

async fn data_handler(State(state): State<Arc<AppState>>, method: Method, body: Bytes) -> Response {
    match method.as_str() {
        "MATCH" => handle_match(&state, &body),
        "PATCH" => handle_patch(&state, &body).await,
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, ErrorCode::InvalidMessage, "unknown method"),
    }
}

fn handle_match(state: &AppState, body: &[u8]) -> Response {
    let req: MatchRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, ErrorCode::InvalidMessage, err.to_string()),
    };
    let commit = req.at_commit.unwrap_or_else(|| state.storage.current_commit());
    let read = state.storage.read_state_at(&req.path, commit, req.scope.as_deref());
    let doc_state = match read {
        Ok(doc_state) => doc_state,
        Err(err) => return storage_error_response(&err),
    };
    let matched = match &req.match_doc {
        Some(doc) => match logd_merge::match_doc(&doc_state, doc) {
            Ok(m) => Some(m),
            Err(err) => return error_response(StatusCode::BAD_REQUEST, ErrorCode::InvalidDiff, err.to_string()),
        },
        None => None,
    };
    Json(MatchResult { state: doc_state, matched }).into_response()
}

async fn handle_patch(state: &AppState, body: &[u8]) -> Response {
    let req: PatchRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, ErrorCode::InvalidMessage, err.to_string()),
    };
    let tx = state.txs.new_tx(1, req.scope.clone(), None::<Duration>);
    let patcher = match tx.new_patcher(req.scope.as_deref(), req.path, req.patch, req.match_doc) {
        Ok(p) => p,
        Err(TxError::ScopeMismatch) => {
            return error_response(StatusCode::BAD_REQUEST, ErrorCode::TxScopeMismatch, "scope mismatch")
        }
        Err(err) => return error_response(StatusCode::BAD_REQUEST, ErrorCode::InvalidDiff, err.to_string()),
    };
    match patcher.commit(&state.storage).await {
        Ok(result) => Json(PatchResult {
            committed: result.committed,
            matched: result.matched,
            commit: result.commit,
            data: result.data,
        })
        .into_response(),
        Err(TxError::Timeout) => error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Timeout, "transaction timed out"),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::StorageError, err.to_string()),
    }
}

fn storage_error_response(err: &StorageError) -> Response {
    let (status, code) = match err {
        StorageError::CommitNotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::CommitNotFound),
        StorageError::ScopeNotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::ScopeNotFound),
        StorageError::Merge(_) | StorageError::TypeConflict => (StatusCode::BAD_REQUEST, ErrorCode::InvalidDiff),
        StorageError::SnapshotInProgress | StorageError::Snapshot(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::StorageError)
        }
        StorageError::Schema(schema_err) => {
            let code = match schema_err {
                logd_storage::SchemaError::MigrationInProgress => ErrorCode::MigrationInProgress,
                logd_storage::SchemaError::NoMigrationInProgress => ErrorCode::NoMigrationInProgress,
                logd_storage::SchemaError::NoPendingMigration => ErrorCode::NoPendingMigration,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, code)
        }
    };
    warn!(?err, "storage error serving http request");
    error_response(status, code, err.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use logd_node::{KPath, Node, Value};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let storage = Storage::new();
        let txs = Arc::new(TxTable::new(storage.clone(), Duration::from_secs(5)));
        AppState { storage, txs }
    }

    async fn send(app: Router, method: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = axum::http::Request::builder()
            .method(Method::from_bytes(method.as_bytes()).unwrap())
            .uri("/api/data")
            .header("content-type", "application/x-tony")
            .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap();
        (status, json)
    }

    fn alice_patch() -> Node {
        Node::new(Value::Object(vec![(
            "users".to_string(),
            Node::new(Value::Object(vec![(
                "alice".to_string(),
                Node::new(Value::Object(vec![(
                    "name".to_string(),
                    Node::new(Value::String("Alice".to_string())),
                )])),
            )])),
        )]))
    }

    #[tokio::test]
    async fn patch_then_match_round_trips() {
        let app = router(test_state());
        let patch_req = PatchRequest { tx: None, scope: None, path: KPath::root(), patch: alice_patch(), match_doc: None };
        let patch_body = serde_json::to_value(&patch_req).unwrap();
        let (status, patch_json) = send(app.clone(), "PATCH", patch_body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patch_json["committed"], serde_json::json!(true));
        assert_eq!(patch_json["commit"], serde_json::json!(1));

        let match_req =
            MatchRequest { path: KPath::parse("users").unwrap(), scope: None, at_commit: None, match_doc: None };
        let match_body = serde_json::to_value(&match_req).unwrap();
        let (status, match_json) = send(app, "MATCH", match_body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(match_json["matched"], serde_json::json!(null));
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let app = router(test_state());
        let (status, _) = send(app, "DELETE", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = router(test_state());
        let request = axum::http::Request::builder()
            .method("MATCH")
            .uri("/api/data")
            .body(axum::body::Body::from("not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn commit_not_found_maps_to_404() {
        let app = router(test_state());
        let match_req = MatchRequest { path: KPath::root(), scope: None, at_commit: Some(99), match_doc: None };
        let match_body = serde_json::to_value(&match_req).unwrap();
        let (status, _) = send(app, "MATCH", match_body).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
