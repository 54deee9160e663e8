// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Multi-participant transaction coordinator (spec.md §4.D).
//!
//! `NewTx` creates a [`Tx`] bound to an expected participant count; each
//! participant calls `new_patcher` to join, and any one of them can call
//! `Patcher::commit` — the first caller through the commit-once guard
//! actually performs the commit, the rest observe the same shared result.

use logd_merge::MergeError;
use logd_node::path::Segment;
use logd_node::{KPath, Node, Value};
use logd_storage::{Storage, StorageError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OnceCell};
use tracing::{debug, warn};

/// Failure kinds surfaced by the coordinator (spec.md §4.D, §7).
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    /// All participants did not join, or commit did not complete, before
    /// the transaction's timeout elapsed.
    #[error("transaction timed out")]
    Timeout,
    /// Two participants targeted overlapping paths.
    #[error("conflicting participant paths")]
    Conflict,
    /// Two participants targeted the same prefix with incompatible
    /// container kinds (e.g. `.a.b` vs `.a[0]`).
    #[error("mixed accessor kinds at the same path prefix")]
    MixedAccessors,
    /// A joiner's scope did not match the transaction's scope.
    #[error("transaction scope mismatch")]
    ScopeMismatch,
    /// The transaction id is unknown (expired, never existed, or already
    /// swept).
    #[error("unknown transaction")]
    NotFound,
    /// Underlying storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// Evaluating or applying a participant's patch failed.
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),
}

/// One participant's contribution, collected before commit.
#[derive(Debug, Clone)]
struct Participant {
    path: KPath,
    patch: Node,
    match_doc: Option<Node>,
}

/// The outcome of a transaction, shared by every participant's `commit`
/// call (spec.md §4.D "Result carries...").
#[derive(Debug, Clone)]
pub struct TxResult {
    /// True if the transaction committed a log entry.
    pub committed: bool,
    /// True if every participant's match precondition held.
    pub matched: bool,
    /// The commit number, if committed; 0 otherwise.
    pub commit: i64,
    /// The merged, auto-ID-injected data, if committed; `null` otherwise.
    pub data: Node,
    /// A human-readable failure reason, if not committed.
    pub error: Option<String>,
}

impl TxResult {
    fn match_failed(reason: &str) -> Self {
        Self {
            committed: false,
            matched: false,
            commit: 0,
            data: Node::null(),
            error: Some(reason.to_string()),
        }
    }

    fn failed(reason: String) -> Self {
        Self {
            committed: false,
            matched: true,
            commit: 0,
            data: Node::null(),
            error: Some(reason),
        }
    }
}

/// A single in-flight (or recently resolved) transaction.
pub struct Tx {
    id: i64,
    expected: u32,
    scope: Option<String>,
    created_at: Instant,
    timeout: Duration,
    participants: Mutex<Vec<Participant>>,
    joined: AtomicU32,
    ready: Notify,
    result: OnceCell<TxResult>,
}

impl Tx {
    fn new(id: i64, expected: u32, scope: Option<String>, timeout: Duration) -> Self {
        Self {
            id,
            expected,
            scope,
            created_at: Instant::now(),
            timeout,
            participants: Mutex::new(Vec::new()),
            joined: AtomicU32::new(0),
            ready: Notify::new(),
            result: OnceCell::new(),
        }
    }

    /// This transaction's id.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// True once `createdAt + timeout` has elapsed and no result is set yet.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.result.initialized().is_none() && self.created_at.elapsed() >= self.timeout
    }

    /// Join the transaction as a participant with `path`/`patch`/optional
    /// `match_doc`. Fires the ready latch once the expected count joins.
    ///
    /// # Errors
    /// [`TxError::ScopeMismatch`] if `scope` does not equal the
    /// transaction's own scope (spec.md §4.E "Scopes of joiners must equal
    /// the transaction's scope").
    pub fn new_patcher(
        self: &Arc<Self>,
        scope: Option<&str>,
        path: KPath,
        patch: Node,
        match_doc: Option<Node>,
    ) -> Result<Arc<Patcher>, TxError> {
        if scope != self.scope.as_deref() {
            return Err(TxError::ScopeMismatch);
        }
        {
            let mut participants = self.participants.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            participants.push(Participant { path, patch, match_doc });
        }
        let joined = self.joined.fetch_add(1, Ordering::AcqRel) + 1;
        if joined >= self.expected {
            self.ready.notify_waiters();
        }
        Ok(Arc::new(Patcher { tx: self.clone() }))
    }

    async fn wait_ready(&self) {
        loop {
            let notified = self.ready.notified();
            if self.joined.load(Ordering::Acquire) >= self.expected {
                return;
            }
            notified.await;
        }
    }

    /// Block until ready, then perform (or observe) the commit, subject to
    /// the transaction's timeout (spec.md §4.D `Patcher.Commit`).
    ///
    /// # Errors
    /// [`TxError::Timeout`] if participants do not all join before the
    /// deadline. Commit-time failures (match mismatch, conflict, storage
    /// error) are reported inside the returned [`TxResult`], not as `Err`,
    /// so repeated calls stay idempotent (spec.md §4.D "Idempotence").
    pub async fn commit(self: &Arc<Self>, storage: &Storage) -> Result<TxResult, TxError> {
        tokio::time::timeout(self.timeout, self.wait_ready()).await.map_err(|_| {
            warn!(tx = self.id, expected = self.expected, joined = self.joined.load(Ordering::Acquire), "transaction timed out waiting for participants");
            TxError::Timeout
        })?;
        let result = self
            .result
            .get_or_init(|| async { self.do_commit(storage) })
            .await;
        Ok(result.clone())
    }

    fn do_commit(self: &Arc<Self>, storage: &Storage) -> TxResult {
        let participants = self.participants.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();

        for p in &participants {
            if let Some(match_doc) = &p.match_doc {
                let current = match storage.read_state_at(&p.path, storage.current_commit(), self.scope.as_deref()) {
                    Ok(node) => node,
                    Err(e) => return TxResult::failed(e.to_string()),
                };
                match logd_merge::match_doc(&current, match_doc) {
                    Ok(true) => {}
                    Ok(false) => return TxResult::match_failed("match-failed"),
                    Err(e) => return TxResult::failed(e.to_string()),
                }
            }
        }

        for i in 0..participants.len() {
            for j in (i + 1)..participants.len() {
                if participants[i].path.overlaps(&participants[j].path) {
                    return TxResult::failed(TxError::Conflict.to_string());
                }
            }
        }

        let mut merged = Node::null();
        for p in &participants {
            merged = match place(merged, p.path.segments(), p.patch.clone()) {
                Ok(n) => n,
                Err(e) => return TxResult::failed(e.to_string()),
            };
        }

        let schema = storage.get_active_schema().schema;
        let auto_id_fields = auto_id_fields(&schema);
        let touched_paths: Vec<KPath> = participants.iter().map(|p| p.path.clone()).collect();

        let write_result = storage.write_and_index_with(self.id, self.scope.clone(), |commit| {
            let mut counter = 0u32;
            inject_auto_ids(&mut merged, &auto_id_fields, &KPath::root(), commit, &mut counter);
            (merged, touched_paths)
        });

        match write_result {
            Ok(commit) => {
                let data = match storage.read_state_at(&KPath::root(), commit, self.scope.as_deref()) {
                    Ok(d) => d,
                    Err(e) => return TxResult::failed(e.to_string()),
                };
                TxResult {
                    committed: true,
                    matched: true,
                    commit,
                    data,
                    error: None,
                }
            }
            Err(e) => TxResult::failed(e.to_string()),
        }
    }
}

/// A participant's handle to commit its joined transaction.
pub struct Patcher {
    tx: Arc<Tx>,
}

impl Patcher {
    /// Wait for the transaction's commit, per [`Tx::commit`].
    ///
    /// # Errors
    /// See [`Tx::commit`].
    pub async fn commit(&self, storage: &Storage) -> Result<TxResult, TxError> {
        self.tx.commit(storage).await
    }

    /// The transaction this patcher belongs to.
    #[must_use]
    pub fn tx(&self) -> &Arc<Tx> {
        &self.tx
    }
}

/// The transient transaction table (spec.md §3 "Ownership": "the Tx
/// coordinator owns the transient transaction table").
pub struct TxTable {
    storage: Storage,
    txs: Mutex<HashMap<i64, Arc<Tx>>>,
    default_timeout: Duration,
}

impl TxTable {
    /// A fresh table bound to `storage`, with `default_timeout` used when a
    /// caller does not override it.
    #[must_use]
    pub fn new(storage: Storage, default_timeout: Duration) -> Self {
        Self {
            storage,
            txs: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Create a new `expected`-participant transaction in `scope`.
    #[must_use]
    pub fn new_tx(&self, expected: u32, scope: Option<String>, timeout: Option<Duration>) -> Arc<Tx> {
        let id = self.storage.next_tx_seq();
        let tx = Arc::new(Tx::new(id, expected, scope, timeout.unwrap_or(self.default_timeout)));
        self.txs.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id, tx.clone());
        tx
    }

    /// Look up an open transaction by id.
    ///
    /// # Errors
    /// [`TxError::NotFound`] if no such transaction is tracked.
    pub fn get(&self, id: i64) -> Result<Arc<Tx>, TxError> {
        self.txs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(TxError::NotFound)
    }

    /// Access the storage engine this table writes commits through.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Remove every tracked transaction that has expired without
    /// committing (spec.md §5 "expired transactions are deleted by a
    /// background sweeper and in-line on `Commit`").
    pub fn sweep_expired(&self) {
        let mut txs = self.txs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = txs.len();
        txs.retain(|_, tx| !tx.expired());
        let swept = before - txs.len();
        if swept > 0 {
            debug!(swept, remaining = txs.len(), "swept expired transactions");
        }
    }
}

/// Nest `patch` into `acc` at `segments`, building objects/arrays/sparse
/// arrays as needed (spec.md §4.D step 5 "builds a skeletal tree following
/// each path's accessors"). Errors if an existing node at a shared prefix
/// has an incompatible container kind.
fn place(acc: Node, segments: &[Segment], patch: Node) -> Result<Node, TxError> {
    let Some((seg, rest)) = segments.split_first() else {
        return Ok(patch);
    };
    match seg {
        Segment::Key(k) => {
            let mut pairs = match acc.value {
                Value::Object(pairs) => pairs,
                Value::Null => Vec::new(),
                _ => return Err(TxError::MixedAccessors),
            };
            let child = match pairs.iter().position(|(pk, _)| pk == k) {
                Some(i) => pairs.remove(i).1,
                None => Node::null(),
            };
            let new_child = place(child, rest, patch)?;
            pairs.push((k.clone(), new_child));
            Ok(Node::new(Value::Object(pairs)))
        }
        Segment::Index(i) => {
            let mut items = match acc.value {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                _ => return Err(TxError::MixedAccessors),
            };
            let idx = *i as usize;
            while items.len() <= idx {
                items.push(Node::null());
            }
            let child = std::mem::replace(&mut items[idx], Node::null());
            items[idx] = place(child, rest, patch)?;
            Ok(Node::new(Value::Array(items)))
        }
        Segment::Sparse(i) => {
            let mut map = match acc.value {
                Value::Sparse(map) => map,
                Value::Null => std::collections::BTreeMap::new(),
                _ => return Err(TxError::MixedAccessors),
            };
            let child = map.remove(i).unwrap_or_else(Node::null);
            map.insert(*i, place(child, rest, patch)?);
            Ok(Node::new(Value::Sparse(map)))
        }
    }
}

/// `(path, key-field-name)` pairs read from a schema node's `autoId`
/// section: `{"autoId": [{"path": ".users", "field": "id"}, ...]}`. This
/// shape resolves spec.md §3's open-ended "schema is a Node describing
/// field tags" down to the one subset storage/txn actually interpret.
fn auto_id_fields(schema: &Node) -> Vec<(KPath, String)> {
    let Some(entries) = schema.value.object_get("autoId") else {
        return Vec::new();
    };
    let Value::Array(entries) = &entries.value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let path_text = entry.value.object_get("path")?;
            let Value::String(path_text) = &path_text.value else { return None };
            let field = entry.value.object_get("field")?;
            let Value::String(field) = &field.value else { return None };
            let path = KPath::parse(path_text).ok()?;
            Some((path, field.clone()))
        })
        .collect()
}

/// Walk `node`, assigning a deterministic, monotonic ID to every element of
/// an array at an auto-ID path whose key field is absent or `null`
/// (spec.md §4.D step 6). IDs are `commit` zero-padded, then
/// index-within-commit zero-padded, so lexicographic order matches commit
/// order as required.
fn inject_auto_ids(node: &mut Node, fields: &[(KPath, String)], path: &KPath, commit: i64, counter: &mut u32) {
    if let Some((_, field)) = fields.iter().find(|(p, _)| p == path) {
        if let Value::Array(items) = &mut node.value {
            for item in items.iter_mut() {
                if let Value::Object(pairs) = &mut item.value {
                    let present = pairs.iter().any(|(k, v)| k == field && v.value != Value::Null);
                    if !present {
                        let id = Node::new(Value::String(format!("{commit:020}-{counter:08}")));
                        *counter += 1;
                        match pairs.iter().position(|(k, _)| k == field) {
                            Some(i) => pairs[i].1 = id,
                            None => pairs.push((field.clone(), id)),
                        }
                    }
                }
            }
        }
    }
    match &mut node.value {
        Value::Object(pairs) => {
            for (k, v) in pairs.iter_mut() {
                let child_path = path.child(Segment::Key(k.clone()));
                inject_auto_ids(v, fields, &child_path, commit, counter);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter_mut().enumerate() {
                let child_path = path.child(Segment::Index(i as u32));
                inject_auto_ids(v, fields, &child_path, commit, counter);
            }
        }
        Value::Sparse(map) => {
            for (k, v) in map.iter_mut() {
                let child_path = path.child(Segment::Sparse(*k));
                inject_auto_ids(v, fields, &child_path, commit, counter);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_storage::Storage;

    fn obj(pairs: Vec<(&str, Node)>) -> Node {
        Node::new(Value::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()))
    }

    fn string(s: &str) -> Node {
        Node::new(Value::String(s.to_string()))
    }

    #[tokio::test]
    async fn single_participant_commits() {
        let storage = Storage::new();
        let table = TxTable::new(storage.clone(), Duration::from_secs(5));
        let tx = table.new_tx(1, None, None);
        let patcher = tx
            .new_patcher(None, KPath::parse(".x").unwrap(), obj(vec![("k", string("v"))]), None)
            .unwrap();
        let result = patcher.commit(&storage).await.unwrap();
        assert!(result.committed);
        assert_eq!(result.commit, 1);
    }

    #[tokio::test]
    async fn two_participants_both_see_shared_result() {
        let storage = Storage::new();
        let table = TxTable::new(storage.clone(), Duration::from_secs(5));
        let tx = table.new_tx(2, None, None);
        let p1 = tx.new_patcher(None, KPath::parse(".a").unwrap(), string("1"), None).unwrap();
        let p2 = tx.new_patcher(None, KPath::parse(".b").unwrap(), string("2"), None).unwrap();
        let (r1, r2) = tokio::join!(p1.commit(&storage), p2.commit(&storage));
        let r1 = r1.unwrap();
        let r2 = r2.unwrap();
        assert!(r1.committed && r2.committed);
        assert_eq!(r1.commit, r2.commit);
    }

    #[tokio::test]
    async fn overlapping_paths_conflict() {
        let storage = Storage::new();
        let table = TxTable::new(storage.clone(), Duration::from_secs(5));
        let tx = table.new_tx(2, None, None);
        let p1 = tx.new_patcher(None, KPath::parse(".a").unwrap(), string("1"), None).unwrap();
        let p2 = tx.new_patcher(None, KPath::parse(".a.b").unwrap(), string("2"), None).unwrap();
        let r1 = p1.commit(&storage).await.unwrap();
        let r2 = p2.commit(&storage).await.unwrap();
        assert!(!r1.committed);
        assert!(!r2.committed);
    }

    #[tokio::test]
    async fn mismatched_scope_is_rejected() {
        let storage = Storage::new();
        let table = TxTable::new(storage.clone(), Duration::from_secs(5));
        let tx = table.new_tx(1, Some("scope-a".to_string()), None);
        let result = tx.new_patcher(Some("scope-b"), KPath::parse(".x").unwrap(), string("1"), None);
        assert!(matches!(result, Err(TxError::ScopeMismatch)));
    }

    #[tokio::test]
    async fn match_precondition_failure_aborts_without_writing() {
        let storage = Storage::new();
        let path = KPath::parse(".x").unwrap();
        storage.write_and_index(1, None, obj(vec![("x", string("old"))]), vec![path.clone()]).unwrap();
        let table = TxTable::new(storage.clone(), Duration::from_secs(5));
        let tx = table.new_tx(1, None, None);
        let patcher = tx
            .new_patcher(None, path, string("new"), Some(string("not-old")))
            .unwrap();
        let result = patcher.commit(&storage).await.unwrap();
        assert!(!result.committed);
        assert!(!result.matched);
        assert_eq!(storage.current_commit(), 1);
    }

    #[tokio::test]
    async fn commit_is_idempotent() {
        let storage = Storage::new();
        let table = TxTable::new(storage.clone(), Duration::from_secs(5));
        let tx = table.new_tx(1, None, None);
        let patcher = tx.new_patcher(None, KPath::parse(".x").unwrap(), string("v"), None).unwrap();
        let r1 = patcher.commit(&storage).await.unwrap();
        let r2 = patcher.commit(&storage).await.unwrap();
        assert_eq!(r1.commit, r2.commit);
        assert_eq!(storage.current_commit(), 1);
    }

    #[tokio::test]
    async fn unjoined_transaction_times_out() {
        let storage = Storage::new();
        let table = TxTable::new(storage.clone(), Duration::from_millis(20));
        let tx = table.new_tx(2, None, None);
        let patcher = tx.new_patcher(None, KPath::parse(".x").unwrap(), string("v"), None).unwrap();
        let result = patcher.commit(&storage).await;
        assert!(matches!(result, Err(TxError::Timeout)));
    }

    #[tokio::test]
    async fn auto_id_is_injected_for_missing_key_field() {
        let storage = Storage::new();
        storage
            .start_migration(Node::null())
            .unwrap_or(());
        let _ = storage.abort_migration();
        let schema = obj(vec![(
            "autoId",
            Node::new(Value::Array(vec![obj(vec![("path", string(".users")), ("field", string("id"))])])),
        )]);
        storage.start_migration(schema).unwrap();
        storage.complete_migration().unwrap();

        let table = TxTable::new(storage.clone(), Duration::from_secs(5));
        let tx = table.new_tx(1, None, None);
        let patch = obj(vec![("users", Node::new(Value::Array(vec![obj(vec![("name", string("Alice"))])])))]);
        let patcher = tx.new_patcher(None, KPath::root(), patch, None).unwrap();
        let result = patcher.commit(&storage).await.unwrap();
        assert!(result.committed);
        let users = result.data.get_path(&KPath::parse(".users").unwrap()).unwrap();
        let Value::Array(items) = &users.value else { panic!("expected array") };
        let id = items[0].value.object_get("id").unwrap();
        assert!(matches!(&id.value, Value::String(s) if !s.is_empty()));
    }
}
