// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session wire schema (spec.md §6 "Session protocol (TCP)").
//!
//! A connection exchanges self-delimited documents; this crate defines
//! their shape and, in [`wire`], a length-prefixed CBOR framing for them
//! (spec.md's own framing is a blank-line-terminated text grammar, scoped
//! out by spec.md §1's non-goal on document text surface syntax — see
//! `DESIGN.md`).

pub mod wire;

use logd_node::{KPath, Node};
use serde::{Deserialize, Serialize};

/// One of the six exhaustive failure buckets from spec.md §6, folded into a
/// single enum so any handler can produce one `ErrorCode` regardless of
/// which layer (path parse, merge, storage, transaction, watch) raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A request document did not match any known request shape.
    #[error("invalid_message")]
    InvalidMessage,
    /// A KPath or query path failed to parse.
    #[error("invalid_path")]
    InvalidPath,
    /// A patch document was malformed or referenced an unknown tag.
    #[error("invalid_diff")]
    InvalidDiff,
    /// A `watch` request's path or scope was malformed.
    #[error("invalid_watch")]
    InvalidWatch,
    /// A `patch`/`newtx` request's transaction fields were malformed.
    #[error("invalid_tx")]
    InvalidTx,
    /// The named transaction id is unknown.
    #[error("tx_not_found")]
    TxNotFound,
    /// A transaction already has its full expected participant count.
    #[error("tx_full")]
    TxFull,
    /// A joiner's scope did not match the transaction's scope.
    #[error("tx_scope_mismatch")]
    TxScopeMismatch,
    /// A participant's match precondition did not hold.
    #[error("match_failed")]
    MatchFailed,
    /// `unwatch` named a watch id that isn't registered.
    #[error("not_watching")]
    NotWatching,
    /// `watch` named a path/scope pair already being watched on this
    /// connection.
    #[error("already_watching")]
    AlreadyWatching,
    /// `ReadStateAt`/`ReadPatchesInRange` asked for a commit that does not
    /// exist (yet, or ever).
    #[error("commit_not_found")]
    CommitNotFound,
    /// A watch's replay could not be completed.
    #[error("replay_failed")]
    ReplayFailed,
    /// An operation exceeded its deadline (transaction commit, broadcast
    /// enqueue).
    #[error("timeout")]
    Timeout,
    /// A scope-creating operation named a scope that already exists.
    #[error("scope_exists")]
    ScopeExists,
    /// A scope-scoped operation named an unknown scope.
    #[error("scope_not_found")]
    ScopeNotFound,
    /// The session is shutting down or already closed.
    #[error("session_closed")]
    SessionClosed,
    /// `StartMigration` called while one is already running.
    #[error("migration_in_progress")]
    MigrationInProgress,
    /// `CompleteMigration`/`AbortMigration`/`MigrationPatch` called with no
    /// migration running.
    #[error("no_migration_in_progress")]
    NoMigrationInProgress,
    /// A migration was aborted; a pending read/patch raced it.
    #[error("migration_aborted")]
    MigrationAborted,
    /// A pending-schema read was requested with no migration running.
    #[error("no_pending_migration")]
    NoPendingMigration,
    /// An internal storage error that doesn't map to any of the above.
    #[error("storage_error")]
    StorageError,
    /// The requested resource does not exist.
    #[error("not_found")]
    NotFound,
}

/// `hello` — the first message on a connection (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelloRequest {
    /// Client-reported implementation name/version, for logging.
    pub client_info: Option<String>,
}

/// `match` — read state at a path, optionally checked against a match
/// document (spec.md §4.A, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRequest {
    /// The path to read.
    pub path: KPath,
    /// The scope to overlay, if any.
    pub scope: Option<String>,
    /// The commit to read at; `None` means "current".
    pub at_commit: Option<i64>,
    /// If present, checked against the read state; the response reports
    /// whether it held.
    pub match_doc: Option<Node>,
}

/// Result of a `match` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    /// The state read at the requested path/commit/scope.
    pub state: Node,
    /// Whether `match_doc`, if given, held against `state`.
    pub matched: Option<bool>,
}

/// `patch` — join (and, for a single-participant request, immediately
/// commit) a transaction (spec.md §4.D, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchRequest {
    /// An existing transaction id to join, or `None` to create a
    /// single-participant transaction for this request alone.
    pub tx: Option<i64>,
    /// The scope this participant writes into.
    pub scope: Option<String>,
    /// The path this participant patches.
    pub path: KPath,
    /// The patch document to apply at `path`.
    pub patch: Node,
    /// An optional precondition evaluated against the current state at
    /// `path` before commit.
    pub match_doc: Option<Node>,
}

/// Result of a `patch` request (mirrors `logd_txn::TxResult`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchResult {
    /// Whether the transaction committed.
    pub committed: bool,
    /// Whether every participant's match precondition held.
    pub matched: bool,
    /// The commit number, if committed.
    pub commit: i64,
    /// The merged, committed data, if committed.
    pub data: Node,
}

/// `newtx` — allocate a multi-participant transaction without joining it
/// yet (spec.md §4.D, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTxRequest {
    /// Number of participants expected to join.
    pub expected_participants: u32,
    /// The scope every participant must match.
    pub scope: Option<String>,
    /// Override of the transaction table's default timeout, in
    /// milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Result of a `newtx` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTxResult {
    /// The allocated transaction id, to be used in subsequent `patch`
    /// requests' `tx` field.
    pub tx: i64,
}

/// `watch` — register a watch at a path, with replay from `since_commit`
/// (spec.md §4.E, §4.F, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchRequest {
    /// The path to watch.
    pub path: KPath,
    /// The scope to watch, if any.
    pub scope: Option<String>,
    /// Replay every commit after this one before switching to live
    /// delivery; `None` replays nothing.
    pub since_commit: Option<i64>,
    /// Skip the initial full-state send that a fresh watch otherwise gets
    /// before replay/live delivery begins (spec.md §4.E "Watch").
    #[serde(default)]
    pub no_init: bool,
}

/// Result of a `watch` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchResult {
    /// The id to use in a later `unwatch` request.
    pub watch_id: u64,
}

/// `unwatch` — remove a previously registered watch (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnwatchRequest {
    /// The watch id returned by the original `watch` request.
    pub watch_id: u64,
}

/// `deleteScope` — remove every commit a scope holds (spec.md §4.C, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteScopeRequest {
    /// The scope to delete.
    pub scope: String,
}

/// `schema` — read the active (and, if in progress, pending) schema
/// (spec.md §4.C, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaRequest {
    /// If true, also report the pending schema.
    pub include_pending: bool,
}

/// Result of a `schema` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaResult {
    /// The schema currently serving reads.
    pub active: Node,
    /// The commit the active schema was set at.
    pub active_commit: i64,
    /// The pending schema, if a migration is running.
    pub pending: Option<Node>,
}

/// `migration` — drive the online schema migration state machine (spec.md
/// §4.C, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MigrationRequest {
    /// Begin migrating to a new schema.
    Start {
        /// The new schema document.
        schema: Node,
    },
    /// Write a value visible only in the pending index.
    Patch {
        /// The path to write.
        path: KPath,
        /// The value to place at `path`.
        node: Node,
    },
    /// Promote the pending schema to active.
    Complete,
    /// Discard the pending schema.
    Abort,
}

/// Result of a `migration` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationResult {
    /// The commit the operation was applied at, for `Start`/`Patch`.
    pub commit: Option<i64>,
}

/// Every request document shape a session's dispatcher recognizes (spec.md
/// §4.E, §6). An optional `id` outside this enum mirrors back on the
/// response, carried by [`Envelope`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Request {
    /// First message on a connection.
    Hello(HelloRequest),
    /// Read state, optionally checked against a precondition.
    Match(MatchRequest),
    /// Join/commit a transaction.
    Patch(PatchRequest),
    /// Allocate a multi-participant transaction.
    NewTx(NewTxRequest),
    /// Register a watch.
    Watch(WatchRequest),
    /// Remove a watch.
    Unwatch(UnwatchRequest),
    /// Delete a scope.
    DeleteScope(DeleteScopeRequest),
    /// Read schema state.
    Schema(SchemaRequest),
    /// Drive the migration state machine.
    Migration(MigrationRequest),
}

/// A watch delivery (spec.md §6 "Watch events").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchEventMessage {
    /// The watch this event belongs to.
    pub watch_id: u64,
    /// The commit this event reports.
    pub commit: i64,
    /// The path the notification applies to.
    pub path: KPath,
    /// The full state at `path`, sent for replay events.
    pub state: Option<Node>,
    /// The patch applicable at `path`, sent for live events.
    pub patch: Option<Node>,
    /// Set once on the event marking the end of replay, before live
    /// delivery begins (spec.md §6 "`replayComplete`").
    pub replay_complete: Option<bool>,
}

/// Every response document shape (spec.md §6 "Response schema").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Response {
    /// Acknowledges `hello`.
    Hello,
    /// Result of a `match` request.
    Match(MatchResult),
    /// Result of a `patch` request.
    Patch(PatchResult),
    /// Result of a `newtx` request.
    NewTx(NewTxResult),
    /// Result of a `watch` request.
    Watch(WatchResult),
    /// Acknowledges `unwatch`.
    Unwatch,
    /// Acknowledges `deleteScope`.
    DeleteScope,
    /// Result of a `schema` request.
    Schema(SchemaResult),
    /// Result of a `migration` request.
    Migration(MigrationResult),
    /// An asynchronous watch delivery, not a reply to any single request.
    Event(WatchEventMessage),
    /// A failure processing some request.
    Error {
        /// The failure kind.
        code: ErrorCode,
        /// A human-readable detail string.
        message: String,
    },
}

/// A request or response paired with the correlation `id` the client
/// supplied (spec.md §6 "plus an optional `id` that mirrors the request
/// `id`"). `Event` responses carry no `id` — they are not replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    /// Client-chosen correlation id, echoed back on the matching response.
    pub id: Option<String>,
    /// The request or response body.
    pub body: T,
}
