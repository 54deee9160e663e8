// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!pass`: identity patch, always-true match (spec.md §4.B).

use crate::MergeError;
use logd_node::Node;

/// Returns `target` unchanged.
pub fn patch(target: &Node, _patch_node: &Node) -> Result<Node, MergeError> {
    Ok(target.clone())
}

/// Always matches.
pub fn match_doc(_doc: &Node, _match_node: &Node) -> Result<bool, MergeError> {
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::{Tag, Value};

    #[test]
    fn pass_leaves_target_unchanged() {
        let target = Node::new(Value::String("unchanged".into()));
        let p = Node::null().with_tag(Tag::single("pass"));
        assert_eq!(patch(&target, &p).unwrap(), target);
    }

    #[test]
    fn pass_always_matches() {
        assert!(match_doc(&Node::null(), &Node::null()).unwrap());
        assert!(match_doc(&Node::new(Value::Bool(false)), &Node::new(Value::Bool(true))).unwrap());
    }
}
