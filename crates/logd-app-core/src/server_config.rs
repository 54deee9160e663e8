// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The server's own configuration document (spec.md §6 "Configuration"):
//! snapshot policy, transaction timeout, and the initial schema.

use logd_node::Node;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default transaction timeout, in milliseconds (spec.md §6: "default 1s").
const DEFAULT_TX_TIMEOUT_MILLIS: u64 = 1_000;

/// Top-level server configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Snapshot cadence policy.
    pub snapshot: SnapshotConfig,
    /// Transaction-related settings.
    pub tx: TxConfig,
    /// Schema the store is initialized or validated against, if any.
    pub schema: Option<SchemaSource>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { snapshot: SnapshotConfig::default(), tx: TxConfig::default(), schema: None }
    }
}

/// Snapshot cadence policy. A `0` field disables that trigger
/// (spec.md §6: "0 = off").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotConfig {
    /// Take a snapshot after this many commits since the last one. `0` disables.
    pub max_commits: u64,
    /// Take a snapshot once the uncompacted log grows past this many bytes. `0` disables.
    pub max_bytes: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { max_commits: 0, max_bytes: 0 }
    }
}

impl SnapshotConfig {
    /// Whether the commit-count trigger is enabled.
    #[must_use]
    pub fn commits_trigger(&self) -> Option<u64> {
        (self.max_commits > 0).then_some(self.max_commits)
    }

    /// Whether the byte-size trigger is enabled.
    #[must_use]
    pub fn bytes_trigger(&self) -> Option<u64> {
        (self.max_bytes > 0).then_some(self.max_bytes)
    }
}

/// Transaction-related settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxConfig {
    /// How long an open transaction may sit idle before it is aborted, in
    /// milliseconds. Stored as a plain integer rather than a `Duration` so
    /// the document round-trips through JSON without a custom visitor.
    pub timeout_millis: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self { timeout_millis: DEFAULT_TX_TIMEOUT_MILLIS }
    }
}

impl TxConfig {
    /// The configured timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }
}

/// Where the server's schema document comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaSource {
    /// Schema document inlined in the config file.
    Embedded(Node),
    /// Schema document loaded from a separate file, relative to the config
    /// file's own directory.
    File(PathBuf),
}

/// Whether verbose logging was requested via the `DEBUG` environment
/// variable (any non-empty value other than `0`/`false`).
#[must_use]
pub fn debug_logging_enabled() -> bool {
    match std::env::var("DEBUG") {
        Ok(value) => !matches!(value.as_str(), "" | "0" | "false"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_policy_is_fully_disabled() {
        let cfg = SnapshotConfig::default();
        assert_eq!(cfg.commits_trigger(), None);
        assert_eq!(cfg.bytes_trigger(), None);
    }

    #[test]
    fn default_tx_timeout_is_one_second() {
        assert_eq!(TxConfig::default().timeout(), Duration::from_secs(1));
    }

    #[test]
    fn server_config_round_trips_through_json() {
        let cfg = ServerConfig {
            snapshot: SnapshotConfig { max_commits: 500, max_bytes: 0 },
            tx: TxConfig { timeout_millis: 2_000 },
            schema: Some(SchemaSource::File(PathBuf::from("schema.json"))),
        };
        let json = serde_json::to_string(&cfg).expect("serialize");
        let back: ServerConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.snapshot.max_commits, 500);
        assert_eq!(back.tx.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: ServerConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(cfg.snapshot.max_commits, 0);
        assert_eq!(cfg.tx.timeout_millis, DEFAULT_TX_TIMEOUT_MILLIS);
        assert!(cfg.schema.is_none());
    }
}
