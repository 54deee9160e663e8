// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-connection request loop (spec.md §4.E).
//!
//! A session runs three cooperating tasks over one connection: a reader
//! that decodes complete [`logd_proto::Envelope<Request>`] frames off a
//! streaming buffer, a dispatcher (run inline in the reader task, per
//! spec.md §4.E "The dispatcher runs synchronously per request") that maps
//! each request to a handler, and a writer draining a bounded outbound
//! queue. Each active watch gets its own forwarder task.

use logd_node::KPath;
use logd_proto::{
    wire, DeleteScopeRequest, Envelope, ErrorCode, HelloRequest, MatchRequest, MatchResult,
    MigrationRequest, MigrationResult, NewTxRequest, NewTxResult, PatchRequest, PatchResult,
    Request, Response, SchemaRequest, SchemaResult, UnwatchRequest, WatchEventMessage,
    WatchRequest, WatchResult,
};
use logd_storage::{Storage, StorageError};
use logd_txn::{TxError, TxTable};
use logd_watch::{WatchHub, WatchId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Tuning knobs for one session (spec.md §5 "bounded outbound queue").
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Largest frame body accepted from the client.
    pub max_payload: usize,
    /// Outbound queue depth (session writer, and each watch forwarder).
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_payload: 8 * 1024 * 1024, outbound_buffer: 256 }
    }
}

/// The shared engine handles every session is built from (spec.md §2): the
/// storage engine, the transaction table, and the watch hub.
#[derive(Clone)]
pub struct Engine {
    /// Commit log, index, snapshots, schema.
    pub storage: Storage,
    /// The transient transaction table.
    pub txs: Arc<TxTable>,
    /// The watch hub.
    pub hub: WatchHub,
}

struct SessionState {
    watches: Mutex<HashMap<u64, tokio::task::JoinHandle<()>>>,
    /// Path/scope pairs this session currently watches, and the watch id
    /// each is registered under — used to reject a second `watch` on the
    /// same path/scope rather than silently registering a duplicate
    /// forwarder (spec.md §4.E "a session may not watch the same path
    /// twice").
    watched_paths: Mutex<HashMap<(KPath, Option<String>), u64>>,
    outbound: mpsc::Sender<Vec<u8>>,
}

/// Drive one connection to completion: run the reader/dispatcher loop until
/// the peer closes or sends something malformed, then tear down every
/// watch and forwarder task this session registered (spec.md §5 "Session
/// shutdown... all watches are unregistered").
pub async fn run_session<S>(stream: S, engine: Engine, config: SessionConfig)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(config.outbound_buffer);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let state = Arc::new(SessionState {
        watches: Mutex::new(HashMap::new()),
        watched_paths: Mutex::new(HashMap::new()),
        outbound: outbound_tx,
    });

    let mut acc: Vec<u8> = Vec::with_capacity(64 * 1024);
    let mut read_buf = vec![0u8; 16 * 1024];
    'read: loop {
        let n = match reader.read(&mut read_buf).await {
            Ok(0) | Err(_) => break 'read,
            Ok(n) => n,
        };
        acc.extend_from_slice(&read_buf[..n]);

        if acc.len() >= 4 {
            let declared_len = u32::from_be_bytes([acc[0], acc[1], acc[2], acc[3]]) as usize;
            if declared_len > config.max_payload {
                warn!("frame declares a body larger than max payload, dropping connection");
                break 'read;
            }
        }

        loop {
            match wire::decode::<Envelope<Request>>(&acc) {
                Ok((envelope, consumed)) => {
                    acc.drain(..consumed);
                    handle_envelope(envelope, &engine, &state, &config).await;
                }
                Err(wire::FrameError::IncompleteLength | wire::FrameError::IncompleteBody) => break,
                Err(err) => {
                    warn!(?err, "failed to decode request frame, dropping connection");
                    break 'read;
                }
            }
        }
    }

    let mut watches = state.watches.lock().await;
    for (id, handle) in watches.drain() {
        handle.abort();
        engine.hub.unregister(WatchId::from_u64(id));
    }
    drop(watches);
    writer_task.abort();
}

async fn send(state: &SessionState, id: Option<String>, body: Response) {
    let envelope = Envelope { id, body };
    if let Ok(frame) = wire::encode(&envelope) {
        let _ = state.outbound.send(frame).await;
    }
}

async fn handle_envelope(envelope: Envelope<Request>, engine: &Engine, state: &Arc<SessionState>, config: &SessionConfig) {
    let id = envelope.id;
    let response = match envelope.body {
        Request::Hello(req) => handle_hello(req),
        Request::Match(req) => handle_match(&engine.storage, req),
        Request::Patch(req) => handle_patch(engine, req).await,
        Request::NewTx(req) => handle_new_tx(engine, req),
        Request::Watch(req) => handle_watch(engine, state, req, config).await,
        Request::Unwatch(req) => handle_unwatch(engine, state, req).await,
        Request::DeleteScope(req) => handle_delete_scope(&engine.storage, req),
        Request::Schema(req) => handle_schema(&engine.storage, req),
        Request::Migration(req) => handle_migration(&engine.storage, req),
    };
    send(state, id, response).await;
}

fn handle_hello(_req: HelloRequest) -> Response {
    Response::Hello
}

fn handle_match(storage: &Storage, req: MatchRequest) -> Response {
    let commit = req.at_commit.unwrap_or_else(|| storage.current_commit());
    match storage.read_state_at(&req.path, commit, req.scope.as_deref()) {
        Ok(state) => {
            let matched = match &req.match_doc {
                Some(doc) => match logd_merge::match_doc(&state, doc) {
                    Ok(m) => Some(m),
                    Err(err) => return error_response(ErrorCode::InvalidDiff, err.to_string()),
                },
                None => None,
            };
            Response::Match(MatchResult { state, matched })
        }
        Err(err) => error_response(storage_error_code(&err), err.to_string()),
    }
}

async fn handle_patch(engine: &Engine, req: PatchRequest) -> Response {
    let tx = match req.tx {
        Some(id) => match engine.txs.get(id) {
            Ok(tx) => tx,
            Err(_) => return error_response(ErrorCode::TxNotFound, "unknown transaction".to_string()),
        },
        None => engine.txs.new_tx(1, req.scope.clone(), None),
    };
    let patcher = match tx.new_patcher(req.scope.as_deref(), req.path, req.patch, req.match_doc) {
        Ok(p) => p,
        Err(TxError::ScopeMismatch) => return error_response(ErrorCode::TxScopeMismatch, "scope mismatch".to_string()),
        Err(err) => return error_response(ErrorCode::InvalidTx, err.to_string()),
    };
    match patcher.commit(&engine.storage).await {
        Ok(result) => Response::Patch(PatchResult {
            committed: result.committed,
            matched: result.matched,
            commit: result.commit,
            data: result.data,
        }),
        Err(TxError::Timeout) => error_response(ErrorCode::Timeout, "transaction timed out".to_string()),
        Err(err) => error_response(ErrorCode::InvalidTx, err.to_string()),
    }
}

fn handle_new_tx(engine: &Engine, req: NewTxRequest) -> Response {
    let timeout = req.timeout_ms.map(Duration::from_millis);
    let tx = engine.txs.new_tx(req.expected_participants, req.scope, timeout);
    Response::NewTx(NewTxResult { tx: tx.id() })
}

async fn handle_watch(engine: &Engine, state: &Arc<SessionState>, req: WatchRequest, config: &SessionConfig) -> Response {
    let key = (req.path.clone(), req.scope.clone());
    {
        let mut watched_paths = state.watched_paths.lock().await;
        if watched_paths.contains_key(&key) {
            return error_response(ErrorCode::AlreadyWatching, "already watching this path".to_string());
        }
        watched_paths.insert(key.clone(), 0);
    }

    let (watch_id, mut rx) = engine.hub.register(req.path.clone(), req.scope.clone(), config.outbound_buffer);
    state.watched_paths.lock().await.insert(key, watch_id.as_u64());
    let frontier = engine.storage.current_commit();

    if !req.no_init {
        match engine.storage.read_state_at(&req.path, frontier, req.scope.as_deref()) {
            Ok(initial) => {
                send(
                    state,
                    None,
                    Response::Event(WatchEventMessage {
                        watch_id: watch_id.as_u64(),
                        commit: frontier,
                        path: req.path.clone(),
                        state: Some(initial),
                        patch: None,
                        replay_complete: None,
                    }),
                )
                .await;
            }
            Err(err) => {
                engine.hub.unregister(watch_id);
                state.watched_paths.lock().await.remove(&(req.path.clone(), req.scope.clone()));
                return error_response(storage_error_code(&err), err.to_string());
            }
        }
    }

    let replay = match req.since_commit {
        Some(since) => engine.storage.read_patches_in_range(&req.path, since, frontier, req.scope.as_deref()),
        None => Ok(Vec::new()),
    };
    match replay {
        Ok(patches) => {
            for (commit, patch) in patches {
                send(
                    state,
                    None,
                    Response::Event(WatchEventMessage {
                        watch_id: watch_id.as_u64(),
                        commit,
                        path: req.path.clone(),
                        state: None,
                        patch: Some(patch),
                        replay_complete: None,
                    }),
                )
                .await;
            }
        }
        Err(err) => {
            engine.hub.unregister(watch_id);
            state.watched_paths.lock().await.remove(&(req.path.clone(), req.scope.clone()));
            return error_response(ErrorCode::ReplayFailed, err.to_string());
        }
    }
    send(
        state,
        None,
        Response::Event(WatchEventMessage {
            watch_id: watch_id.as_u64(),
            commit: frontier,
            path: req.path.clone(),
            state: None,
            patch: None,
            replay_complete: Some(true),
        }),
    )
    .await;

    let forward_state = state.clone();
    let watch_path = req.path.clone();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if event.commit <= frontier {
                continue;
            }
            send(
                &forward_state,
                None,
                Response::Event(WatchEventMessage {
                    watch_id: watch_id.as_u64(),
                    commit: event.commit,
                    path: watch_path.clone(),
                    state: None,
                    patch: event.patch,
                    replay_complete: None,
                }),
            )
            .await;
        }
    });
    state.watches.lock().await.insert(watch_id.as_u64(), handle);
    Response::Watch(WatchResult { watch_id: watch_id.as_u64() })
}

async fn handle_unwatch(engine: &Engine, state: &Arc<SessionState>, req: UnwatchRequest) -> Response {
    let mut watches = state.watches.lock().await;
    match watches.remove(&req.watch_id) {
        Some(handle) => {
            handle.abort();
            engine.hub.unregister(WatchId::from_u64(req.watch_id));
            state.watched_paths.lock().await.retain(|_, id| *id != req.watch_id);
            Response::Unwatch
        }
        None => error_response(ErrorCode::NotWatching, "not watching".to_string()),
    }
}

fn handle_delete_scope(storage: &Storage, req: DeleteScopeRequest) -> Response {
    match storage.delete_scope(&req.scope) {
        Ok(()) => Response::DeleteScope,
        Err(err) => error_response(storage_error_code(&err), err.to_string()),
    }
}

fn handle_schema(storage: &Storage, req: SchemaRequest) -> Response {
    let active = storage.get_active_schema();
    let pending = if req.include_pending { storage.get_pending_schema().map(|p| p.schema) } else { None };
    Response::Schema(SchemaResult { active: active.schema, active_commit: active.commit, pending })
}

fn handle_migration(storage: &Storage, req: MigrationRequest) -> Response {
    match req {
        MigrationRequest::Start { schema } => match storage.start_migration(schema) {
            Ok(()) => Response::Migration(MigrationResult { commit: Some(storage.current_commit()) }),
            Err(err) => error_response(storage_error_code(&err), err.to_string()),
        },
        MigrationRequest::Patch { path, node } => match storage.migration_patch(path, node) {
            Ok(commit) => Response::Migration(MigrationResult { commit: Some(commit) }),
            Err(err) => error_response(storage_error_code(&err), err.to_string()),
        },
        MigrationRequest::Complete => match storage.complete_migration() {
            Ok(()) => Response::Migration(MigrationResult { commit: None }),
            Err(err) => error_response(storage_error_code(&err), err.to_string()),
        },
        MigrationRequest::Abort => match storage.abort_migration() {
            Ok(()) => Response::Migration(MigrationResult { commit: None }),
            Err(err) => error_response(storage_error_code(&err), err.to_string()),
        },
    }
}

fn error_response(code: ErrorCode, message: String) -> Response {
    Response::Error { code, message }
}

fn storage_error_code(err: &StorageError) -> ErrorCode {
    match err {
        StorageError::CommitNotFound(_) => ErrorCode::CommitNotFound,
        StorageError::ScopeNotFound(_) => ErrorCode::ScopeNotFound,
        StorageError::SnapshotInProgress => ErrorCode::StorageError,
        StorageError::Merge(_) => ErrorCode::InvalidDiff,
        StorageError::Snapshot(_) => ErrorCode::StorageError,
        StorageError::Schema(schema_err) => match schema_err {
            logd_storage::SchemaError::MigrationInProgress => ErrorCode::MigrationInProgress,
            logd_storage::SchemaError::NoMigrationInProgress => ErrorCode::NoMigrationInProgress,
            logd_storage::SchemaError::NoPendingMigration => ErrorCode::NoPendingMigration,
        },
        StorageError::TypeConflict => ErrorCode::InvalidDiff,
    }
}
