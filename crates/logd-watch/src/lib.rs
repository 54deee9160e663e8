// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Path-addressed watch hub and commit fan-out (spec.md §4.F, §4.G).
//!
//! A [`WatchHub`] holds every live [`Watcher`]; [`WatchHub::broadcast`] is
//! wired as a [`logd_storage::Storage`] commit notifier, so every successful
//! write reaches whichever watchers it overlaps.

use logd_node::{KPath, Node};
use logd_storage::CommitNotification;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Default per-broadcast enqueue timeout (spec.md §4.F step 2).
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);

/// An event delivered to a watcher (spec.md §6 "Watch events").
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// The commit this event reports.
    pub commit: i64,
    /// The path the notification touched (may differ from the watcher's
    /// own path — parent watchers see child writes and vice versa).
    pub path: KPath,
    /// The patch applicable at the watcher's own path, if any.
    pub patch: Option<Node>,
}

/// An opaque handle identifying one registered watch. Carried over the wire
/// as a bare `u64` (spec.md §6 `watch_id`); [`WatchId::as_u64`]/[`WatchId::from_u64`]
/// cross that boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl WatchId {
    /// The raw id, for sending over the wire.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Reconstruct a `WatchId` from a wire-carried raw id (e.g. an
    /// `unwatch` request's `watch_id`).
    #[must_use]
    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

struct Watcher {
    path: KPath,
    scope: Option<String>,
    sender: mpsc::Sender<WatchEvent>,
}

struct HubState {
    watchers: HashMap<u64, Watcher>,
}

/// The watch hub (spec.md §4.F). Cheap to clone: an `Arc` around shared
/// state, shared by every session and by `Storage::set_commit_notifier`.
#[derive(Clone)]
pub struct WatchHub {
    state: std::sync::Arc<RwLock<HubState>>,
    next_id: std::sync::Arc<AtomicU64>,
    broadcast_timeout: Duration,
}

impl WatchHub {
    /// A hub with the default broadcast timeout (spec.md §4.F "5s").
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_BROADCAST_TIMEOUT)
    }

    /// A hub using `broadcast_timeout` instead of the spec default —
    /// exposed for tests that need enqueue timeouts to fire quickly.
    #[must_use]
    pub fn with_timeout(broadcast_timeout: Duration) -> Self {
        Self {
            state: std::sync::Arc::new(RwLock::new(HubState { watchers: HashMap::new() })),
            next_id: std::sync::Arc::new(AtomicU64::new(1)),
            broadcast_timeout,
        }
    }

    #[allow(clippy::unwrap_used)]
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HubState> {
        self.state.read().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HubState> {
        self.state.write().unwrap()
    }

    /// Register a new watcher at `path`/`scope` with a bounded event queue
    /// of `buffer` events. Returns the id (used to `unregister`) and the
    /// receiving half of its channel — the owning session drains it, and
    /// the channel closing (no more senders) is this watch's "failed"
    /// signal, which is simpler than a dedicated flag and observed the same
    /// way by a `recv().await` returning `None` (spec.md §4.F "failed
    /// signal").
    pub fn register(&self, path: KPath, scope: Option<String>, buffer: usize) -> (WatchId, mpsc::Receiver<WatchEvent>) {
        let (sender, receiver) = mpsc::channel(buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write().watchers.insert(id, Watcher { path, scope, sender });
        (WatchId(id), receiver)
    }

    /// Remove a watcher (spec.md §6 `unwatch`, or session shutdown).
    pub fn unregister(&self, id: WatchId) {
        self.write().watchers.remove(&id.0);
    }

    /// Broadcast a commit notification to every matching, still-live
    /// watcher (spec.md §4.F `Broadcast`). A watcher matches if its path
    /// overlaps any of the notification's touched paths (parent/child
    /// boundaries only, via [`KPath::overlaps`]) and the scope rule holds:
    /// a baseline (`scope: None`) watcher only sees baseline events; a
    /// scoped watcher sees both its own scope's events and baseline ones.
    ///
    /// A watcher whose channel stays full for the hub's broadcast timeout
    /// is dropped — its sender is removed from the hub, which closes its
    /// receiver and surfaces as a "slow consumer" to the owning session.
    pub async fn broadcast(&self, notification: &CommitNotification) {
        let targets: Vec<(u64, KPath, mpsc::Sender<WatchEvent>)> = {
            let state = self.read();
            state
                .watchers
                .iter()
                .filter(|(_, w)| {
                    let scope_matches = match &w.scope {
                        None => notification.scope.is_none(),
                        Some(_) => notification.scope.is_none() || notification.scope == w.scope,
                    };
                    scope_matches && notification.touched_paths.iter().any(|p| w.path.overlaps(p))
                })
                .map(|(id, w)| (*id, w.path.clone(), w.sender.clone()))
                .collect()
        };

        let mut failed = Vec::new();
        for (id, watcher_path, sender) in targets {
            let patch = logd_storage_extract_for(&notification.patch, &watcher_path);
            let event = WatchEvent {
                commit: notification.commit,
                path: watcher_path,
                patch,
            };
            if tokio::time::timeout(self.broadcast_timeout, sender.send(event)).await.is_err() {
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut state = self.write();
            for id in failed {
                warn!(watch_id = id, commit = notification.commit, "dropping slow watcher after broadcast timeout");
                state.watchers.remove(&id);
            }
        }
    }
}

impl Default for WatchHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Restrict a root-rooted patch to `path`, the same navigation
/// `logd-storage` itself does internally — duplicated here rather than
/// exposed from that crate since it's a pure `Node` operation with no
/// storage dependency, and exposing it would widen `logd-storage`'s public
/// surface for a single caller.
fn logd_storage_extract_for(patch: &Node, path: &KPath) -> Option<Node> {
    use logd_node::path::Segment as PathSegment;
    use logd_node::Value;

    fn go(node: &Node, segments: &[PathSegment]) -> Option<Node> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(node.clone());
        };
        if node.tag.is_some() {
            return Some(node.clone());
        }
        match (first, &node.value) {
            (PathSegment::Key(k), Value::Object(pairs)) => {
                let child = pairs.iter().find(|(pk, _)| pk == k).map(|(_, v)| v)?;
                go(child, rest)
            }
            (PathSegment::Index(i), Value::Array(items)) => go(items.get(*i as usize)?, rest),
            (PathSegment::Sparse(i), Value::Sparse(map)) => go(map.get(i)?, rest),
            _ => None,
        }
    }
    go(patch, path.segments())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::Value;
    use std::time::Duration as StdDuration;

    fn notification(commit: i64, scope: Option<&str>, path: &str, value: Node) -> CommitNotification {
        let path = KPath::parse(path).unwrap();
        CommitNotification {
            commit,
            tx: commit,
            scope: scope.map(str::to_string),
            patch: value,
            touched_paths: vec![path],
        }
    }

    #[tokio::test]
    async fn watcher_receives_notification_on_exact_path() {
        let hub = WatchHub::new();
        let (_id, mut rx) = hub.register(KPath::parse(".users").unwrap(), None, 8);
        hub.broadcast(&notification(1, None, ".users", Node::new(Value::Bool(true)))).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.commit, 1);
    }

    #[tokio::test]
    async fn parent_watcher_sees_child_write_and_vice_versa() {
        let hub = WatchHub::new();
        let (_id, mut parent_rx) = hub.register(KPath::parse(".users").unwrap(), None, 8);
        let (_id2, mut child_rx) = hub.register(KPath::parse(".users.alice.name").unwrap(), None, 8);
        hub.broadcast(&notification(1, None, ".users.alice", Node::new(Value::Bool(true)))).await;
        assert!(parent_rx.recv().await.is_some());
        hub.broadcast(&notification(2, None, ".users", Node::new(Value::Bool(true)))).await;
        assert!(child_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn baseline_watcher_does_not_see_scoped_event() {
        let hub = WatchHub::new();
        let (_id, mut rx) = hub.register(KPath::parse(".x").unwrap(), None, 8);
        hub.broadcast(&notification(1, Some("s1"), ".x", Node::new(Value::Bool(true)))).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn scoped_watcher_sees_its_scope_and_baseline() {
        let hub = WatchHub::new();
        let (_id, mut rx) = hub.register(KPath::parse(".x").unwrap(), Some("s1".to_string()), 8);
        hub.broadcast(&notification(1, Some("s1"), ".x", Node::new(Value::Bool(true)))).await;
        assert!(rx.recv().await.is_some());
        hub.broadcast(&notification(2, None, ".x", Node::new(Value::Bool(true)))).await;
        assert!(rx.recv().await.is_some());
        hub.broadcast(&notification(3, Some("other"), ".x", Node::new(Value::Bool(true)))).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let hub = WatchHub::new();
        let (id, mut rx) = hub.register(KPath::parse(".x").unwrap(), None, 8);
        hub.unregister(id);
        hub.broadcast(&notification(1, None, ".x", Node::new(Value::Bool(true)))).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped_after_timeout() {
        let hub = WatchHub::with_timeout(StdDuration::from_millis(20));
        let (_id, rx) = hub.register(KPath::parse(".x").unwrap(), None, 1);
        // Fill the single buffer slot so the next send must wait on the timeout.
        hub.broadcast(&notification(1, None, ".x", Node::new(Value::Bool(true)))).await;
        hub.broadcast(&notification(2, None, ".x", Node::new(Value::Bool(true)))).await;
        assert_eq!(hub.read().watchers.len(), 0);
        drop(rx);
    }
}
