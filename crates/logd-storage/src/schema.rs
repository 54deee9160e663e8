// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Active/pending schema state and online migration (spec.md §3 "Schema",
//! §4.C "Schema and migration").

use logd_node::Node;

/// A schema node paired with the commit it was set at.
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    /// The schema document itself (spec.md §3: field tags, auto-id fields).
    pub schema: Node,
    /// The commit `StartMigration`/server startup stamped this version at.
    pub commit: i64,
}

/// Errors from schema/migration operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// `StartMigration` called while one is already in progress.
    #[error("migration already in progress")]
    MigrationInProgress,
    /// `CompleteMigration`/`AbortMigration`/`MigrationPatch` called with no
    /// migration in progress.
    #[error("no migration in progress")]
    NoMigrationInProgress,
    /// A read explicitly asked for the pending schema/index but none exists.
    #[error("no pending migration")]
    NoPendingMigration,
}

/// Holds the active schema and, during a migration, the pending one.
#[derive(Debug)]
pub struct SchemaState {
    active: SchemaVersion,
    pending: Option<SchemaVersion>,
}

impl SchemaState {
    /// Start with an empty active schema at commit 0.
    #[must_use]
    pub fn new(initial: Node) -> Self {
        Self {
            active: SchemaVersion { schema: initial, commit: 0 },
            pending: None,
        }
    }

    /// The schema currently serving reads, and the commit it was set at.
    #[must_use]
    pub fn active(&self) -> &SchemaVersion {
        &self.active
    }

    /// The pending schema, if a migration is in progress.
    #[must_use]
    pub fn pending(&self) -> Option<&SchemaVersion> {
        self.pending.as_ref()
    }

    /// True while a migration is in progress.
    #[must_use]
    pub fn migration_in_progress(&self) -> bool {
        self.pending.is_some()
    }

    /// Stamp `new_schema` as pending at `commit`.
    ///
    /// # Errors
    /// [`SchemaError::MigrationInProgress`] if one is already running.
    pub fn start_migration(&mut self, new_schema: Node, commit: i64) -> Result<(), SchemaError> {
        if self.pending.is_some() {
            return Err(SchemaError::MigrationInProgress);
        }
        self.pending = Some(SchemaVersion { schema: new_schema, commit });
        Ok(())
    }

    /// Promote the pending schema to active.
    ///
    /// # Errors
    /// [`SchemaError::NoMigrationInProgress`] if none is running.
    pub fn complete_migration(&mut self) -> Result<(), SchemaError> {
        self.active = self.pending.take().ok_or(SchemaError::NoMigrationInProgress)?;
        Ok(())
    }

    /// Discard the pending schema, leaving active untouched.
    ///
    /// # Errors
    /// [`SchemaError::NoMigrationInProgress`] if none is running.
    pub fn abort_migration(&mut self) -> Result<(), SchemaError> {
        if self.pending.take().is_none() {
            return Err(SchemaError::NoMigrationInProgress);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::Value;

    fn node() -> Node {
        Node::new(Value::Object(vec![]))
    }

    #[test]
    fn starting_migration_twice_fails() {
        let mut s = SchemaState::new(node());
        s.start_migration(node(), 5).unwrap();
        assert_eq!(s.start_migration(node(), 6), Err(SchemaError::MigrationInProgress));
    }

    #[test]
    fn complete_promotes_pending() {
        let mut s = SchemaState::new(node());
        s.start_migration(node(), 5).unwrap();
        s.complete_migration().unwrap();
        assert_eq!(s.active().commit, 5);
        assert!(s.pending().is_none());
    }

    #[test]
    fn abort_discards_pending_leaves_active() {
        let mut s = SchemaState::new(node());
        let original_commit = s.active().commit;
        s.start_migration(node(), 5).unwrap();
        s.abort_migration().unwrap();
        assert!(s.pending().is_none());
        assert_eq!(s.active().commit, original_commit);
    }

    #[test]
    fn complete_without_migration_errors() {
        let mut s = SchemaState::new(node());
        assert_eq!(s.complete_migration(), Err(SchemaError::NoMigrationInProgress));
    }
}
