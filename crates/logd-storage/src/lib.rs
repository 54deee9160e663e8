// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Append-only commit log, per-path index, snapshot compaction, scopes, and
//! schema/migration state (spec.md §2 component E, §4.C).
//!
//! `Storage` owns the log and per-path indexes for the process lifetime
//! (spec.md §3 "Ownership"). It does not itself coordinate transactions —
//! that's `logd-txn`'s job (spec.md §2 component F) — but exposes the
//! *write-and-index* primitive §4.C describes the coordinator calling after
//! a commit is ready, plus the read/snapshot/scope/schema surface every
//! other component needs.

mod index;
mod log;
mod schema;
mod segment;
mod snapshot;

pub use index::{Namespace, Segment};
pub use log::LogEntry;
pub use schema::{SchemaError, SchemaVersion};
pub use segment::SegmentError;
pub use snapshot::SnapshotError;

use index::IndexTable;
use log::CommitLog;
use logd_merge::MergeError;
use logd_node::{KPath, Node, Value};
use schema::SchemaState;
use segment::SegmentWriter;
use snapshot::SnapshotStore;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::info;

/// Errors from storage operations (spec.md §7 "Runtime failures" /
/// "State preconditions" subsets that originate here).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No snapshot or log data exists at or before the requested commit.
    #[error("commit not found: {0}")]
    CommitNotFound(i64),
    /// A scope name passed to a scope-scoped operation is unknown.
    #[error("scope not found: {0}")]
    ScopeNotFound(String),
    /// `SwitchAndSnapshot` was called while one was already running.
    #[error("snapshot in progress")]
    SnapshotInProgress,
    /// Applying a patch during reconstruction failed.
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),
    /// Snapshot encode/decode failed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    /// Schema/migration precondition violated.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    /// A sparse-array path segment was applied where the indexed state is an
    /// object, or vice versa (spec.md §4.C "Incompatible type mixes").
    #[error("type conflict reconstructing state at a path")]
    TypeConflict,
    /// Reading or appending the on-disk segment file failed.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),
}

/// `(commit, tx, scope, merged patch, touched kpaths)` — delivered to the
/// commit notifier after every successful write (spec.md §4.G).
#[derive(Debug, Clone)]
pub struct CommitNotification {
    /// The commit just written.
    pub commit: i64,
    /// The transaction that produced it.
    pub tx: i64,
    /// The scope it was written into, if any.
    pub scope: Option<String>,
    /// The merged patch rooted at the logical document root.
    pub patch: Node,
    /// Every path the patch touches.
    pub touched_paths: Vec<KPath>,
}

type Notifier = dyn Fn(&CommitNotification) + Send + Sync;

struct Inner {
    log: CommitLog,
    index: IndexTable,
    snapshots: SnapshotStore,
    schema: SchemaState,
    known_scopes: HashSet<String>,
    next_tx_seq: i64,
    active_log_start: i64,
    snapshot_in_progress: bool,
    notifier: Option<Arc<Notifier>>,
    /// Disk segment this store appends committed entries to. `None` for a
    /// purely in-memory store (spec.md §6 "Persistent state layout" is an
    /// opt-in mode, not a requirement of every `Storage`).
    log_writer: Option<SegmentWriter>,
}

/// The storage engine. Cheap to clone (an `Arc` around shared state);
/// every clone refers to the same log, index, and schema.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<RwLock<Inner>>,
}

impl Storage {
    /// A fresh, purely in-memory store: empty log, empty index, empty
    /// schema at commit 0. Nothing written through this handle survives the
    /// process — use [`Self::open`] for a disk-backed store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                log: CommitLog::new(),
                index: IndexTable::new(),
                snapshots: SnapshotStore::new(),
                schema: SchemaState::new(Node::new(Value::Object(vec![]))),
                known_scopes: HashSet::new(),
                next_tx_seq: 1,
                active_log_start: 0,
                snapshot_in_progress: false,
                notifier: None,
                log_writer: None,
            })),
        }
    }

    /// Open (or create) a disk-backed store rooted at `dir`: replays the
    /// segment file in commit order, rebuilding the in-memory index and
    /// `current_commit`, then keeps the segment open so future commits
    /// through [`Self::write_and_index`] append to it (spec.md §6
    /// "Persistent state layout", "replaying the active log and
    /// re-indexing yields the same per-path index and current commit as
    /// before the crash, excluding any commit whose log record is torn").
    ///
    /// Only the base commit log persists this way. Snapshot blobs, scope
    /// membership beyond what a replayed entry's `scope` field reveals, and
    /// in-progress schema migrations are not written to disk: a migration
    /// started before a crash must be restarted after recovery (spec.md §6
    /// names persistence as a requirement of the log; it is silent on
    /// migrations surviving a crash, and schema state changes rarely enough
    /// that requiring a restart of an interrupted one is the simpler
    /// defensible choice here).
    ///
    /// # Errors
    /// Returns [`StorageError::Segment`] if the directory or segment file
    /// cannot be created, read, or reopened for appending.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(SegmentError::from)?;
        let path = dir.join("log.segment");
        let entries = segment::read_segment(&path)?;

        let storage = Self::new();
        {
            let mut inner = storage.write();
            let replayed = entries.len();
            for entry in entries {
                apply_entry_in_memory(&mut inner, entry);
            }
            inner.log_writer = Some(SegmentWriter::create_or_append(&path)?);
            info!(replayed, commit = inner.log.current_commit(), "recovered storage from disk");
        }
        Ok(storage)
    }

    #[allow(clippy::unwrap_used)]
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap()
    }

    /// Allocate the next transaction sequence number. Advances whether or
    /// not the transaction ever commits (spec.md §3 "tx ids ... may advance
    /// without commits").
    pub fn next_tx_seq(&self) -> i64 {
        let mut inner = self.write();
        let id = inner.next_tx_seq;
        inner.next_tx_seq += 1;
        id
    }

    /// The highest commit written so far.
    #[must_use]
    pub fn current_commit(&self) -> i64 {
        self.read().log.current_commit()
    }

    /// Install the commit fan-out callback (spec.md §4.G). Typically wired
    /// to `WatchHub::broadcast`.
    pub fn set_commit_notifier<F>(&self, notifier: F)
    where
        F: Fn(&CommitNotification) + Send + Sync + 'static,
    {
        self.write().notifier = Some(Arc::new(notifier));
    }

    /// The write-and-index primitive the transaction coordinator calls once
    /// a commit is ready (spec.md §4.C "Append and indexing"). Atomically
    /// appends the log record, indexes every touched path *and its
    /// ancestors* (so a read at a parent path sees a child's write, per
    /// "aggregate child diffs hierarchically"), advances `currentCommit`,
    /// then — outside the write lock — invokes the commit notifier.
    pub fn write_and_index(
        &self,
        tx: i64,
        scope: Option<String>,
        patch: Node,
        touched_paths: Vec<KPath>,
    ) -> Result<i64, StorageError> {
        self.write_and_index_with(tx, scope, |_commit| (patch, touched_paths))
    }

    /// As [`Self::write_and_index`], but `build` receives the commit number
    /// *before* the patch is finalised — needed by the transaction
    /// coordinator's auto-ID injection, which must bake the real commit
    /// number into generated IDs (spec.md §4.D step 6) and therefore cannot
    /// run before a commit number is known, nor after (another writer could
    /// slip in between). `build` runs inside the write lock.
    pub fn write_and_index_with<F>(&self, tx: i64, scope: Option<String>, build: F) -> Result<i64, StorageError>
    where
        F: FnOnce(i64) -> (Node, Vec<KPath>),
    {
        let notification = {
            let mut inner = self.write();
            let commit = inner.log.current_commit() + 1;
            let (patch, touched_paths) = build(commit);
            if let Some(s) = &scope {
                inner.known_scopes.insert(s.clone());
            }
            let ns_list: Vec<index::Namespace> = if inner.schema.migration_in_progress() {
                vec![Namespace::Active, Namespace::Pending]
            } else {
                vec![Namespace::Active]
            };
            for path in &touched_paths {
                for ancestor in ancestors_of(path) {
                    for ns in &ns_list {
                        inner.index.append_point(*ns, scope.as_deref(), &ancestor, commit, tx);
                    }
                }
            }
            let entry = LogEntry {
                commit,
                tx,
                scope: scope.clone(),
                timestamp: SystemTime::now(),
                patch: patch.clone(),
                touched_paths: touched_paths.clone(),
            };
            if let Some(writer) = inner.log_writer.as_mut() {
                writer.append(&entry)?;
            }
            inner.log.append(entry);
            CommitNotification {
                commit,
                tx,
                scope,
                patch,
                touched_paths,
            }
        };
        if let Some(notifier) = self.read().notifier.clone() {
            notifier(&notification);
        }
        Ok(notification.commit)
    }

    /// Write a patch visible only in the pending index (spec.md §4.C
    /// `MigrationPatch`). `node` is the value to place at `path`; it is
    /// wrapped in a root-rooted skeleton before being logged, matching how
    /// every other log entry stores its patch (spec.md §3 "Log entry").
    ///
    /// Not written to the disk segment even on a disk-backed store: schema
    /// and migration state is in-memory only (see [`Self::open`]), so a
    /// crash mid-migration loses this entry along with the migration itself
    /// rather than replaying it into the wrong namespace.
    ///
    /// # Errors
    /// [`StorageError::Schema`] wrapping [`SchemaError::NoMigrationInProgress`]
    /// if no migration is running.
    pub fn migration_patch(&self, path: KPath, node: Node) -> Result<i64, StorageError> {
        let mut inner = self.write();
        if !inner.schema.migration_in_progress() {
            return Err(SchemaError::NoMigrationInProgress.into());
        }
        let commit = inner.log.current_commit() + 1;
        let tx = inner.next_tx_seq;
        inner.next_tx_seq += 1;
        for ancestor in ancestors_of(&path) {
            inner.index.append_point(Namespace::Pending, None, &ancestor, commit, tx);
        }
        let rooted_patch = wrap_at_path(&path, node);
        inner.log.append(LogEntry {
            commit,
            tx,
            scope: None,
            timestamp: SystemTime::now(),
            patch: rooted_patch,
            touched_paths: vec![path],
        });
        Ok(commit)
    }

    /// Reconstruct the state at `path` at `commit`, in `scope` if given
    /// (spec.md §4.C `ReadStateAt`). Baseline is always reconstructed first;
    /// a scope, if requested, overlays its own diffs on top.
    ///
    /// # Errors
    /// See [`StorageError`].
    pub fn read_state_at(&self, path: &KPath, commit: i64, scope: Option<&str>) -> Result<Node, StorageError> {
        self.read_state_at_ns(Namespace::Active, path, commit, scope)
    }

    /// As [`Self::read_state_at`] but against the pending schema's index.
    ///
    /// # Errors
    /// [`StorageError::Schema`] if no migration is in progress.
    pub fn read_pending_state_at(&self, path: &KPath, commit: i64) -> Result<Node, StorageError> {
        let has_pending = self.read().schema.migration_in_progress();
        if !has_pending {
            return Err(SchemaError::NoPendingMigration.into());
        }
        self.read_state_at_ns(Namespace::Pending, path, commit, None)
    }

    fn read_state_at_ns(
        &self,
        ns: Namespace,
        path: &KPath,
        commit: i64,
        scope: Option<&str>,
    ) -> Result<Node, StorageError> {
        let inner = self.read();
        let mut state = baseline_from_segments(&inner, ns, path, commit)?;
        if let Some(scope_name) = scope {
            if !inner.known_scopes.contains(scope_name) {
                return Err(StorageError::ScopeNotFound(scope_name.to_string()));
            }
            for segment in inner.index.list(ns, Some(scope_name), path) {
                if segment.commit() > commit {
                    continue;
                }
                if let Segment::Point { commit: c, .. } = segment {
                    if let Some(entry) = inner.log.get(*c) {
                        if let Some(sub_patch) = extract_patch_at(&entry.patch, path.segments()) {
                            state = logd_merge::patch(&state, &sub_patch)?;
                        }
                    }
                }
            }
        }
        Ok(state)
    }

    /// Ordered `(commit, patch)` pairs touching `path` in `(from, to]`
    /// (spec.md §4.C `ReadPatchesInRange`).
    ///
    /// # Errors
    /// See [`StorageError`].
    pub fn read_patches_in_range(
        &self,
        path: &KPath,
        from: i64,
        to: i64,
        scope: Option<&str>,
    ) -> Result<Vec<(i64, Node)>, StorageError> {
        let inner = self.read();
        let mut out = Vec::new();
        for segment in inner.index.list(Namespace::Active, scope, path) {
            let Segment::Point { commit, .. } = segment else { continue };
            if *commit <= from || *commit > to {
                continue;
            }
            if let Some(entry) = inner.log.get(*commit) {
                if let Some(sub_patch) = extract_patch_at(&entry.patch, path.segments()) {
                    out.push((*commit, sub_patch));
                }
            }
        }
        out.sort_by_key(|(c, _)| *c);
        Ok(out)
    }

    /// `(commit, tx)` pairs touching `path`, in order (spec.md §4.C `ListDiffs`).
    #[must_use]
    pub fn list_diffs(&self, path: &KPath) -> Vec<(i64, i64)> {
        self.read()
            .index
            .list(Namespace::Active, None, path)
            .iter()
            .filter_map(|s| match s {
                Segment::Point { commit, tx } => Some((*commit, *tx)),
                Segment::Range { .. } => None,
            })
            .collect()
    }

    /// Direct child paths of `path` with any indexed data (spec.md §4.C
    /// `ListChildPaths`).
    #[must_use]
    pub fn list_child_paths(&self, path: &KPath) -> Vec<KPath> {
        self.read().index.child_paths(Namespace::Active, None, path)
    }

    /// Number of commits written since the last `SwitchAndSnapshot`
    /// (spec.md §4.C `ActiveLogSize`).
    #[must_use]
    pub fn active_log_size(&self) -> i64 {
        let inner = self.read();
        inner.log.current_commit() - inner.active_log_start
    }

    /// Snapshot every path touched since the last snapshot, then rotate the
    /// active log marker (spec.md §4.C "Snapshots"). At most one snapshot
    /// runs at a time.
    ///
    /// # Errors
    /// [`StorageError::SnapshotInProgress`] if another snapshot is running.
    pub fn switch_and_snapshot(&self) -> Result<(), StorageError> {
        {
            let mut inner = self.write();
            if inner.snapshot_in_progress {
                return Err(StorageError::SnapshotInProgress);
            }
            inner.snapshot_in_progress = true;
        }
        let result = self.do_snapshot();
        self.write().snapshot_in_progress = false;
        result
    }

    fn do_snapshot(&self) -> Result<(), StorageError> {
        let frontier = self.current_commit();
        let dirty_paths = self.read().index.all_baseline_paths(Namespace::Active);
        for path in dirty_paths {
            let state = self.read_state_at_ns(Namespace::Active, &path, frontier, None)?;
            let hash = self.read().snapshots.put(&state)?;
            self.write().index.install_snapshot(Namespace::Active, &path, frontier, hash);
        }
        self.write().active_log_start = frontier;
        Ok(())
    }

    /// Remove every commit the scope holds, leaving baseline unchanged
    /// (spec.md §4.C `DeleteScope`).
    ///
    /// # Errors
    /// [`StorageError::ScopeNotFound`] if `scope` is unknown — the spec
    /// leaves this case unspecified and directs implementers to pick one
    /// (spec.md §9 "Open questions").
    pub fn delete_scope(&self, scope: &str) -> Result<(), StorageError> {
        let mut inner = self.write();
        if !inner.known_scopes.remove(scope) {
            return Err(StorageError::ScopeNotFound(scope.to_string()));
        }
        inner.index.remove_scope(scope);
        Ok(())
    }

    /// The schema currently serving reads, and the commit it was set at.
    #[must_use]
    pub fn get_active_schema(&self) -> SchemaVersion {
        self.read().schema.active().clone()
    }

    /// The pending schema, if a migration is in progress.
    #[must_use]
    pub fn get_pending_schema(&self) -> Option<SchemaVersion> {
        self.read().schema.pending().cloned()
    }

    /// Start a migration to `new_schema`, stamped at the current commit.
    ///
    /// # Errors
    /// See [`SchemaError`].
    pub fn start_migration(&self, new_schema: Node) -> Result<(), StorageError> {
        let mut inner = self.write();
        let commit = inner.log.current_commit();
        inner.schema.start_migration(new_schema, commit)?;
        Ok(())
    }

    /// Promote the pending schema to active.
    ///
    /// # Errors
    /// See [`SchemaError`].
    pub fn complete_migration(&self) -> Result<(), StorageError> {
        Ok(self.write().schema.complete_migration()?)
    }

    /// Discard the pending schema.
    ///
    /// # Errors
    /// See [`SchemaError`].
    pub fn abort_migration(&self) -> Result<(), StorageError> {
        Ok(self.write().schema.abort_migration()?)
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

fn baseline_from_segments(inner: &Inner, ns: Namespace, path: &KPath, commit: i64) -> Result<Node, StorageError> {
    let segments = inner.index.list(ns, None, path);
    let snapshot = segments
        .iter()
        .filter_map(|s| match s {
            Segment::Range { upto_commit, hash } if *upto_commit <= commit => Some((*upto_commit, *hash)),
            _ => None,
        })
        .max_by_key(|(c, _)| *c);
    let (start_commit, mut state) = match snapshot {
        Some((c, hash)) => (c, inner.snapshots.get(&hash)?),
        None => (0, Node::null()),
    };
    for segment in segments {
        let Segment::Point { commit: c, .. } = segment else { continue };
        if *c <= start_commit || *c > commit {
            continue;
        }
        let Some(entry) = inner.log.get(*c) else { continue };
        if let Some(sub_patch) = extract_patch_at(&entry.patch, path.segments()) {
            state = logd_merge::patch(&state, &sub_patch)?;
        }
    }
    Ok(state)
}

/// Fold one replayed [`LogEntry`] into a store's in-memory index, the way
/// [`Storage::write_and_index_with`] does for a live commit — used only by
/// [`Storage::open`]'s recovery path, always against [`Namespace::Active`]
/// since schema/migration state (and therefore any `Pending`-namespace
/// indexing a live write might also have done) is not itself persisted.
fn apply_entry_in_memory(inner: &mut Inner, entry: LogEntry) {
    if let Some(scope) = &entry.scope {
        inner.known_scopes.insert(scope.clone());
    }
    for path in &entry.touched_paths {
        for ancestor in ancestors_of(path) {
            inner.index.append_point(Namespace::Active, entry.scope.as_deref(), &ancestor, entry.commit, entry.tx);
        }
    }
    inner.next_tx_seq = inner.next_tx_seq.max(entry.tx + 1);
    inner.log.append(entry);
}

/// `path` itself, its parent, grandparent, ..., down to and including the
/// root. Used to index a commit at every ancestor of each path it touches,
/// so a read at an ancestor path sees writes to its descendants (spec.md
/// §4.C "aggregate child diffs hierarchically").
fn ancestors_of(path: &KPath) -> Vec<KPath> {
    let mut out = vec![path.clone()];
    let mut current = path.clone();
    while let Some((parent, _)) = current.split_last() {
        out.push(parent.clone());
        current = parent;
    }
    out
}

/// Nest `value` inside objects/arrays/sparse-arrays matching `path`, so the
/// result is a root-rooted patch with `value` sitting at `path` — the same
/// shape `write_and_index` callers build by hand (spec.md §4.D "building the
/// merged patch").
fn wrap_at_path(path: &KPath, value: Node) -> Node {
    use logd_node::path::Segment as PathSegment;
    let mut node = value;
    for seg in path.segments().iter().rev() {
        node = match seg {
            PathSegment::Key(k) => Node::new(Value::Object(vec![(k.clone(), node)])),
            PathSegment::Index(i) => {
                let mut items: Vec<Node> = (0..*i).map(|_| Node::null()).collect();
                items.push(node);
                Node::new(Value::Array(items))
            }
            PathSegment::Sparse(i) => {
                let mut map = BTreeMap::new();
                map.insert(*i, node);
                Node::new(Value::Sparse(map))
            }
        };
    }
    node
}

/// Navigate `patch` down `segments`, returning the sub-patch applicable at
/// that position. A patch node carrying an operation tag before `segments`
/// is exhausted is returned wholesale — the op applies to the whole subtree
/// from that point down, so there is nothing further to restrict (see
/// `DESIGN.md` for the trade-off this simplifies away).
fn extract_patch_at(patch: &Node, segments: &[logd_node::path::Segment]) -> Option<Node> {
    use logd_node::path::Segment as PathSegment;
    let Some((first, rest)) = segments.split_first() else {
        return Some(patch.clone());
    };
    if patch.tag.is_some() {
        return Some(patch.clone());
    }
    match (first, &patch.value) {
        (PathSegment::Key(k), Value::Object(pairs)) => {
            let child = pairs.iter().find(|(pk, _)| pk == k).map(|(_, v)| v)?;
            extract_patch_at(child, rest)
        }
        (PathSegment::Index(i), Value::Array(items)) => {
            let child = items.get(*i as usize)?;
            extract_patch_at(child, rest)
        }
        (PathSegment::Sparse(i), Value::Sparse(map)) => {
            let child = map.get(i)?;
            extract_patch_at(child, rest)
        }
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn obj(pairs: Vec<(&str, Node)>) -> Node {
        Node::new(Value::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()))
    }

    fn string(s: &str) -> Node {
        Node::new(Value::String(s.to_string()))
    }

    #[test]
    fn single_path_write_and_read() {
        let storage = Storage::new();
        let patch = obj(vec![("users", obj(vec![("alice", obj(vec![("name", string("Alice"))]))]))]);
        let commit = storage
            .write_and_index(1, None, patch, vec![KPath::parse(".users.alice.name").unwrap()])
            .unwrap();
        assert_eq!(commit, 1);
        assert_eq!(storage.current_commit(), 1);
        let users = storage.read_state_at(&KPath::parse(".users").unwrap(), 1, None).unwrap();
        assert_eq!(users, obj(vec![("alice", obj(vec![("name", string("Alice"))]))]));
    }

    #[test]
    fn two_participant_commit_touches_both_paths() {
        let storage = Storage::new();
        let patch = obj(vec![("a", obj(vec![("x", string("1"))])), ("b", obj(vec![("y", string("2"))]))]);
        let commit = storage
            .write_and_index(1, None, patch, vec![KPath::parse(".a").unwrap(), KPath::parse(".b").unwrap()])
            .unwrap();
        assert_eq!(commit, 1);
        let root = storage.read_state_at(&KPath::root(), 1, None).unwrap();
        assert_eq!(root, obj(vec![("a", obj(vec![("x", string("1"))])), ("b", obj(vec![("y", string("2"))]))]));
    }

    #[test]
    fn snapshot_and_time_travel_read() {
        let storage = Storage::new();
        let path = KPath::parse(".users.alice").unwrap();
        for i in 1..=10 {
            let patch = obj(vec![("users", obj(vec![("alice", obj(vec![("n", string(&i.to_string()))]))]))]);
            storage.write_and_index(i, None, patch, vec![path.clone()]).unwrap();
        }
        let before = storage.read_state_at(&path, 7, None).unwrap();
        storage.switch_and_snapshot().unwrap();
        let after = storage.read_state_at(&path, 7, None).unwrap();
        assert_eq!(before, after);
        let current = storage.read_state_at(&path, storage.current_commit(), None).unwrap();
        assert_eq!(current, obj(vec![("n", string("10"))]));
    }

    #[test]
    fn scope_overlay_and_delete() {
        let storage = Storage::new();
        let path = KPath::parse(".x").unwrap();
        let c1 = storage
            .write_and_index(1, None, obj(vec![("x", obj(vec![("k", string("1"))]))]), vec![path.clone()])
            .unwrap();
        let _c2 = storage
            .write_and_index(
                2,
                Some("s".to_string()),
                obj(vec![("x", obj(vec![("k", string("2"))]))]),
                vec![path.clone()],
            )
            .unwrap();
        let c2 = storage.current_commit();
        assert_eq!(storage.read_state_at(&path, c2, None).unwrap(), obj(vec![("k", string("1"))]));
        assert_eq!(storage.read_state_at(&path, c2, Some("s")).unwrap(), obj(vec![("k", string("2"))]));
        storage.delete_scope("s").unwrap();
        assert_eq!(storage.read_state_at(&path, c2, None).unwrap(), obj(vec![("k", string("1"))]));
        assert_eq!(storage.read_state_at(&path, c1, None).unwrap(), obj(vec![("k", string("1"))]));
        assert!(matches!(storage.read_state_at(&path, c2, Some("s")), Err(StorageError::ScopeNotFound(_))));
    }

    #[test]
    fn delete_scope_on_unknown_scope_errors() {
        let storage = Storage::new();
        assert!(matches!(storage.delete_scope("nope"), Err(StorageError::ScopeNotFound(_))));
    }

    #[test]
    fn second_concurrent_snapshot_reports_in_progress() {
        let storage = Storage::new();
        storage.write().snapshot_in_progress = true;
        assert!(matches!(storage.switch_and_snapshot(), Err(StorageError::SnapshotInProgress)));
    }

    #[test]
    fn migration_patch_is_invisible_to_active_reads() {
        let storage = Storage::new();
        let path = KPath::parse(".x").unwrap();
        storage.start_migration(Node::new(Value::Object(vec![]))).unwrap();
        storage.migration_patch(path.clone(), obj(vec![("k", string("pending"))])).unwrap();
        assert_eq!(storage.read_state_at(&path, storage.current_commit(), None).unwrap(), Node::null());
        assert_eq!(
            storage.read_pending_state_at(&path, storage.current_commit()).unwrap(),
            obj(vec![("k", string("pending"))])
        );
    }

    fn tempdir() -> std::path::PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let dir = std::env::temp_dir()
            .join(format!("logd-storage-test-{}", std::process::id()))
            .join(COUNTER.fetch_add(1, Ordering::Relaxed).to_string());
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn reopening_a_disk_backed_store_replays_prior_commits() {
        let dir = tempdir();
        let path = KPath::parse(".users.alice.name").unwrap();
        {
            let storage = Storage::open(&dir).unwrap();
            let patch = obj(vec![("users", obj(vec![("alice", obj(vec![("name", string("Alice"))]))]))]);
            storage.write_and_index(1, None, patch, vec![path.clone()]).unwrap();
        }
        // Drop and reopen against the same directory, simulating a restart.
        let reopened = Storage::open(&dir).unwrap();
        assert_eq!(reopened.current_commit(), 1);
        assert_eq!(reopened.read_state_at(&path, 1, None).unwrap(), string("Alice"));
    }

    #[test]
    fn reopening_an_empty_directory_starts_from_commit_zero() {
        let dir = tempdir();
        let storage = Storage::open(&dir).unwrap();
        assert_eq!(storage.current_commit(), 0);
    }

    #[test]
    fn recovery_continues_the_commit_and_tx_sequence() {
        let dir = tempdir();
        let path = KPath::parse(".x").unwrap();
        {
            let storage = Storage::open(&dir).unwrap();
            storage.write_and_index(1, None, obj(vec![("x", string("a"))]), vec![path.clone()]).unwrap();
            storage.write_and_index(2, None, obj(vec![("x", string("b"))]), vec![path.clone()]).unwrap();
        }
        let reopened = Storage::open(&dir).unwrap();
        let commit = reopened.write_and_index(3, None, obj(vec![("x", string("c"))]), vec![path.clone()]).unwrap();
        assert_eq!(commit, 3);
        assert_eq!(reopened.read_state_at(&path, 3, None).unwrap(), string("c"));
    }

    #[test]
    fn recovery_reinstates_scope_membership_from_replayed_entries() {
        let dir = tempdir();
        let path = KPath::parse(".x").unwrap();
        {
            let storage = Storage::open(&dir).unwrap();
            storage
                .write_and_index(1, Some("s".to_string()), obj(vec![("x", string("scoped"))]), vec![path.clone()])
                .unwrap();
        }
        let reopened = Storage::open(&dir).unwrap();
        assert_eq!(reopened.read_state_at(&path, 1, Some("s")).unwrap(), string("scoped"));
        assert!(reopened.delete_scope("s").is_ok());
    }
}
