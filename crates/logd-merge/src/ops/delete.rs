// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!delete`: remove a value from its container (spec.md §4.B).
//!
//! Structural patch already knows how to insert/merge into a container but
//! has no notion of absence, so deletion is driven from the parent: when
//! [`crate::patch`] recurses into an object/sparse-array child and finds the
//! child patch tagged `!delete`, the parent removes that key/index instead of
//! recursing further. This module holds the leaf-level no-op — it exists so
//! `!delete` is a registrable tag at all, and the registry's `structural`
//! module special-cases it before calling here.

use crate::MergeError;
use logd_node::Node;

/// A bare `!delete` applied directly to the document root has no container to
/// remove itself from; spec.md §4.B only defines `!delete` as removing a
/// *key/index* from its parent container. Reaching this function (rather
/// than the parent-level removal in `structural::patch`) is always a
/// type-mismatch.
pub fn patch(_target: &Node, _patch_node: &Node) -> Result<Node, MergeError> {
    Err(MergeError::TypeMismatch {
        expected: "container key or array index",
        found: "document root",
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::{Tag, Value};

    #[test]
    fn bare_delete_at_root_errors() {
        let target = Node::new(Value::Bool(true));
        let del = Node::null().with_tag(Tag::single("delete"));
        assert!(patch(&target, &del).is_err());
    }
}
