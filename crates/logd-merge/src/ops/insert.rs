// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!insert(tag?)`: replace target with the patch child wholesale (spec.md §4.B).

use crate::MergeError;
use logd_node::{Node, Tag};

/// Replace `target` with this node's wrapped value. If the tag carries an
/// argument (`!insert(foo)`), the result is tagged `foo` instead of left
/// untagged.
pub fn patch(_target: &Node, patch_node: &Node) -> Result<Node, MergeError> {
    let inner = patch_node.without_tag();
    let Some(tag) = &patch_node.tag else {
        return Ok(inner);
    };
    let args = &tag.segments()[0].args;
    match args.first() {
        Some(result_tag) => Ok(inner.with_tag(Tag::single(result_tag.clone()))),
        None => Ok(inner),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::Value;

    #[test]
    fn replaces_target_ignoring_its_value() {
        let target = Node::new(Value::Bool(true));
        let replacement = Node::new(Value::String("new".into())).with_tag(Tag::single("insert"));
        let result = patch(&target, &replacement).unwrap();
        assert_eq!(result, Node::new(Value::String("new".into())));
    }

    #[test]
    fn arg_sets_result_tag() {
        let target = Node::null();
        let replacement =
            Node::new(Value::Bool(false)).with_tag(Tag::new(vec![logd_node::TagSegment::with_args(
                "insert",
                vec!["flagged".into()],
            )])
            .unwrap());
        let result = patch(&target, &replacement).unwrap();
        assert_eq!(result.tag_head(), Some("flagged"));
    }
}
