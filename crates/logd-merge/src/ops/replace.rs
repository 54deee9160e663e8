// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!replace`: patch child is `{from, to}`; require `target == from`, set `to`
//! (spec.md §4.B).

use crate::MergeError;
use logd_node::{Node, Value};

/// Require the current value to equal `from` before replacing it with `to`.
/// This is the precondition primitive every compare-and-swap-style write in
/// the transaction layer (`logd-txn`) builds on.
///
/// # Errors
/// [`MergeError::MissingField`] if either key is absent; [`MergeError::PreconditionFailed`]
/// if `target != from`.
pub fn patch(target: &Node, patch_node: &Node) -> Result<Node, MergeError> {
    let from = patch_node
        .value
        .object_get("from")
        .ok_or(MergeError::MissingField("from"))?;
    let to = patch_node
        .value
        .object_get("to")
        .ok_or(MergeError::MissingField("to"))?;
    if target != from {
        return Err(MergeError::PreconditionFailed(format!(
            "expected {from:?}, found {target:?}"
        )));
    }
    Ok(to.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::Tag;

    fn replace_node(from: Node, to: Node) -> Node {
        Node::new(Value::Object(vec![("from".into(), from), ("to".into(), to)])).with_tag(Tag::single("replace"))
    }

    #[test]
    fn matching_from_replaces() {
        let target = Node::new(Value::Bool(true));
        let p = replace_node(Node::new(Value::Bool(true)), Node::new(Value::Bool(false)));
        assert_eq!(patch(&target, &p).unwrap(), Node::new(Value::Bool(false)));
    }

    #[test]
    fn mismatched_from_fails() {
        let target = Node::new(Value::Bool(true));
        let p = replace_node(Node::new(Value::Bool(false)), Node::new(Value::Bool(false)));
        assert!(matches!(patch(&target, &p), Err(MergeError::PreconditionFailed(_))));
    }

    #[test]
    fn missing_field_errors() {
        let target = Node::null();
        let p = Node::new(Value::Object(vec![("from".into(), Node::null())])).with_tag(Tag::single("replace"));
        assert!(matches!(patch(&target, &p), Err(MergeError::MissingField("to"))));
    }
}
