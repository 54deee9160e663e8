// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The tag-name → operation registry (spec.md §4.B, §9).
//!
//! Built-ins are seeded once at process start. The registry stays open for
//! `!pipe`-style user extension; spec.md §9 documents that registration
//! after server start is undefined, so [`register`] is a startup-time API,
//! not a runtime one.

use crate::{ops, MergeError};
use logd_node::Node;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::RwLock;

/// A patch operation: `(target, patch-node) -> new document`.
pub type PatchOp = fn(&Node, &Node) -> Result<Node, MergeError>;
/// A match operation: `(document, match-node) -> bool`.
pub type MatchOp = fn(&Node, &Node) -> Result<bool, MergeError>;

/// A registered tag's operation pair. Most tags implement only one of
/// `match`/`patch` (spec.md §4.B table); both fields are `Option` so the
/// registry can represent that without a sentinel "always fails" function.
#[derive(Clone, Copy)]
pub struct MergeOp {
    /// The patch implementation, if this tag is a patch operation.
    pub patch: Option<PatchOp>,
    /// The match implementation, if this tag is a match operation.
    pub r#match: Option<MatchOp>,
}

static REGISTRY: Lazy<RwLock<HashMap<&'static str, MergeOp>>> = Lazy::new(|| RwLock::new(builtins()));

fn builtins() -> HashMap<&'static str, MergeOp> {
    let mut m = HashMap::new();
    m.insert("insert", MergeOp { patch: Some(ops::insert::patch), r#match: None });
    m.insert("delete", MergeOp { patch: Some(ops::delete::patch), r#match: None });
    m.insert("replace", MergeOp { patch: Some(ops::replace::patch), r#match: None });
    m.insert("arraydiff", MergeOp { patch: Some(ops::arraydiff::patch), r#match: None });
    m.insert("key", MergeOp { patch: Some(ops::key::patch), r#match: None });
    m.insert("dive", MergeOp { patch: Some(ops::dive::patch), r#match: None });
    m.insert("pipe", MergeOp { patch: Some(ops::pipe::patch), r#match: None });
    m.insert("strdiff", MergeOp { patch: Some(ops::strdiff::patch), r#match: None });
    m.insert("unquote", MergeOp { patch: Some(ops::unquote::patch), r#match: None });
    m.insert("pass", MergeOp { patch: Some(ops::pass::patch), r#match: Some(ops::pass::match_doc) });
    m.insert("and", MergeOp { patch: None, r#match: Some(ops::combinators::match_and) });
    m.insert("or", MergeOp { patch: None, r#match: Some(ops::combinators::match_or) });
    m.insert("not", MergeOp { patch: None, r#match: Some(ops::combinators::match_not) });
    m.insert("glob", MergeOp { patch: None, r#match: Some(ops::glob::match_doc) });
    m.insert("tag", MergeOp { patch: None, r#match: Some(ops::combinators::match_tag) });
    m.insert("subtree", MergeOp { patch: None, r#match: Some(ops::combinators::match_subtree) });
    m.insert("let", MergeOp { patch: None, r#match: Some(ops::let_binding::match_doc) });
    m
}

/// Look up the operation registered for tag head `name`.
#[must_use]
pub fn lookup(name: &str) -> Option<MergeOp> {
    #[allow(clippy::expect_used)]
    REGISTRY.read().expect("registry lock poisoned").get(name).copied()
}

/// Register (or replace) the operation for tag head `name`.
///
/// Intended for startup-time extension only (spec.md §9); calling this
/// concurrently with in-flight `patch`/`match_doc` calls is unsupported.
pub fn register(name: &'static str, op: MergeOp) {
    #[allow(clippy::expect_used)]
    REGISTRY.write().expect("registry lock poisoned").insert(name, op);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        for name in ["insert", "delete", "replace", "pass", "glob", "and"] {
            assert!(lookup(name).is_some(), "{name} should be registered");
        }
    }

    #[test]
    fn unregistered_tag_is_none() {
        assert!(lookup("definitely-not-a-tag").is_none());
    }
}
