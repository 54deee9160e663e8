// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-path index: point segments into the log, range segments into
//! snapshots (spec.md §3 "Index entry", §4.C).

use logd_cas::BlobHash;
use logd_node::KPath;
use std::collections::HashMap;

/// One entry in a path's ordered segment list.
#[derive(Debug, Clone, Copy)]
pub enum Segment {
    /// A single commit's contribution to this path, found by reading the
    /// log record `commit` and applying its patch restricted to this path.
    Point {
        /// The commit this segment points at.
        commit: i64,
        /// The transaction that produced it.
        tx: i64,
    },
    /// A snapshot covering every commit from the path's start up to
    /// `upto_commit`, materialised as blob `hash` in the CAS store.
    Range {
        /// The highest commit this snapshot covers.
        upto_commit: i64,
        /// The CAS blob holding the materialised state.
        hash: BlobHash,
    },
}

impl Segment {
    /// The highest commit this segment accounts for.
    #[must_use]
    pub fn commit(&self) -> i64 {
        match self {
            Segment::Point { commit, .. } | Segment::Range { upto_commit: commit, .. } => *commit,
        }
    }
}

/// Which schema-visibility namespace an index operation addresses (spec.md
/// §4.C "Schema and migration"): during a migration, ordinary writes are
/// indexed into both; `MigrationPatch` only into [`Namespace::Pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// The schema currently serving reads.
    Active,
    /// The schema being migrated to.
    Pending,
}

#[derive(Debug, Default)]
struct Table {
    segments: HashMap<(Option<String>, KPath), Vec<Segment>>,
}

impl Table {
    fn append(&mut self, scope: Option<&str>, path: &KPath, segment: Segment) {
        self.segments
            .entry((scope.map(str::to_string), path.clone()))
            .or_default()
            .push(segment);
    }

    fn list(&self, scope: Option<&str>, path: &KPath) -> &[Segment] {
        self.segments
            .get(&(scope.map(str::to_string), path.clone()))
            .map_or(&[], Vec::as_slice)
    }


    fn remove_scope(&mut self, scope: &str) {
        self.segments.retain(|(s, _), _| s.as_deref() != Some(scope));
    }

    fn child_paths(&self, scope: Option<&str>, parent: &KPath) -> Vec<KPath> {
        let mut children: Vec<KPath> = self
            .segments
            .keys()
            .filter(|(s, _)| s.as_deref() == scope)
            .filter_map(|(_, p)| direct_child(parent, p))
            .collect();
        children.sort();
        children.dedup();
        children
    }
}

fn direct_child(parent: &KPath, candidate: &KPath) -> Option<KPath> {
    if !parent.is_prefix_of(candidate) || parent == candidate {
        return None;
    }
    let extra = &candidate.segments()[parent.segments().len()..];
    let first = extra.first()?;
    Some(parent.child(first.clone()))
}

/// The full per-path index, split into active and pending namespaces.
#[derive(Debug, Default)]
pub struct IndexTable {
    active: Table,
    pending: Table,
}

impl IndexTable {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, ns: Namespace) -> &Table {
        match ns {
            Namespace::Active => &self.active,
            Namespace::Pending => &self.pending,
        }
    }

    fn table_mut(&mut self, ns: Namespace) -> &mut Table {
        match ns {
            Namespace::Active => &mut self.active,
            Namespace::Pending => &mut self.pending,
        }
    }

    /// Append a point segment for `path` in namespace `ns`.
    pub fn append_point(&mut self, ns: Namespace, scope: Option<&str>, path: &KPath, commit: i64, tx: i64) {
        self.table_mut(ns).append(scope, path, Segment::Point { commit, tx });
    }

    /// Ordered segments for `path` in namespace `ns`.
    #[must_use]
    pub fn list(&self, ns: Namespace, scope: Option<&str>, path: &KPath) -> &[Segment] {
        self.table(ns).list(scope, path)
    }

    /// Install a snapshot range segment for this baseline path (scopes are
    /// never snapshotted; see `DESIGN.md`). This *adds* the range alongside
    /// existing point segments rather than replacing them: a range segment
    /// only materialises state exactly at `upto_commit`, so point segments
    /// below that commit must be retained — a read asking for a commit
    /// short of the snapshot frontier still needs them to reconstruct state
    /// at that earlier point.
    pub fn install_snapshot(&mut self, ns: Namespace, path: &KPath, upto_commit: i64, hash: BlobHash) {
        self.table_mut(ns).append(None, path, Segment::Range { upto_commit, hash });
    }

    /// Remove every segment belonging to `scope`.
    pub fn remove_scope(&mut self, scope: &str) {
        self.active.remove_scope(scope);
        self.pending.remove_scope(scope);
    }

    /// Direct children of `parent` that have any indexed data, in namespace `ns`.
    #[must_use]
    pub fn child_paths(&self, ns: Namespace, scope: Option<&str>, parent: &KPath) -> Vec<KPath> {
        self.table(ns).child_paths(scope, parent)
    }

    /// Every distinct path with any segment in namespace `ns` (baseline only),
    /// used by `SwitchAndSnapshot` to find dirty paths.
    #[must_use]
    pub fn all_baseline_paths(&self, ns: Namespace) -> Vec<KPath> {
        self.table(ns)
            .segments
            .keys()
            .filter(|(s, _)| s.is_none())
            .map(|(_, p)| p.clone())
            .collect()
    }
}
