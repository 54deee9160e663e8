// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed document tree for logd.
//!
//! A [`Node`] is the unit every other crate in this workspace operates on:
//! [`logd-merge`](../logd_merge/index.html) patches and matches them,
//! `logd-storage` persists them, `logd-txn` merges per-participant patches
//! into one, and `logd-session`/`logd-http` serialise them to clients.
//!
//! The surface text syntax clients use to write a `Node` on the wire (the
//! "tony" document format) is out of scope for this workspace — see
//! `SPEC_FULL.md` §1. This crate only defines the in-memory value, its tag,
//! and the two path languages used to navigate it ([`path::KPath`] for
//! storage addressing, [`query`] for read-only `get`/`list` lookups).

pub mod number;
pub mod path;
pub mod query;
pub mod tag;
pub mod value;

pub use number::Number;
pub use path::KPath;
pub use tag::{Tag, TagSegment};
pub use value::Value;

use serde::{Deserialize, Serialize};

/// A value in the document tree, with an optional operation/type tag.
///
/// Equality is structural *and* tag-preserving: two nodes with identical
/// values but different tags (or one tagged, one not) are unequal. This
/// matters because the same [`Value`] shape can mean different things to the
/// merge algebra depending on its tag (a plain object vs. an `!insert`
/// wrapping one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// The node's value.
    pub value: Value,
    /// Operation/type tag, if any.
    pub tag: Option<Tag>,
}

impl Node {
    /// Build an untagged node from a value.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self { value, tag: None }
    }

    /// The untagged `null` node.
    #[must_use]
    pub fn null() -> Self {
        Self::new(Value::Null)
    }

    /// Returns a clone of this node with `tag` attached, replacing any
    /// existing tag.
    #[must_use]
    pub fn with_tag(&self, tag: Tag) -> Self {
        Self {
            value: self.value.clone(),
            tag: Some(tag),
        }
    }

    /// Returns a clone of this node with no tag.
    #[must_use]
    pub fn without_tag(&self) -> Self {
        Self {
            value: self.value.clone(),
            tag: None,
        }
    }

    /// True if this node's tag has a segment named `name` anywhere in its
    /// dotted chain (e.g. `tag_has("glob")` matches `!not.glob`).
    #[must_use]
    pub fn tag_has(&self, name: &str) -> bool {
        self.tag
            .as_ref()
            .is_some_and(|t| t.segments().iter().any(|s| s.name == name))
    }

    /// The first segment name of this node's tag, if any. The merge
    /// registry dispatches on this (spec.md §4.B).
    #[must_use]
    pub fn tag_head(&self) -> Option<&str> {
        self.tag.as_ref().and_then(|t| t.segments().first()).map(|s| s.name.as_str())
    }

    /// Look up a node by [`KPath`], the storage addressing language.
    /// Returns `None` if any segment fails to resolve (wrong container kind,
    /// missing key/index).
    #[must_use]
    pub fn get_path(&self, path: &KPath) -> Option<&Node> {
        path::navigate(self, path.segments())
    }

    /// Deep clone. `Node` already derives `Clone`; this exists to make the
    /// "clone (deep)" operation named in spec.md §4.A discoverable by name.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }

    /// `get` in the restricted JSONPath dialect (spec.md §4.A): returns the
    /// first match, or `None` if the query has no matches.
    ///
    /// # Errors
    /// Returns `Err` if `query` is not valid query syntax.
    pub fn get(&self, query: &str) -> Result<Option<&Node>, query::QueryError> {
        Ok(query::Query::parse(query)?.eval(self).into_iter().next())
    }

    /// `list` in the restricted JSONPath dialect (spec.md §4.A): returns
    /// every match, in document order.
    ///
    /// # Errors
    /// Returns `Err` if `query` is not valid query syntax.
    pub fn list(&self, query: &str) -> Result<Vec<&Node>, query::QueryError> {
        Ok(query::Query::parse(query)?.eval(self))
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}
