// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!dive`: apply an inner match/patch pair to every leaf of the target tree
//! (spec.md §4.B).

use crate::MergeError;
use logd_node::{Node, Value};

/// The patch child is `{match, patch}`: for every leaf (a node with no
/// object/array/sparse children) at or under `target`, if `match` matches it,
/// `patch` is applied in its place. Non-leaves recurse untouched aside from
/// their matched descendants.
pub fn patch(target: &Node, patch_node: &Node) -> Result<Node, MergeError> {
    let match_node = patch_node.value.object_get("match").ok_or(MergeError::MissingField("match"))?;
    let inner_patch = patch_node.value.object_get("patch").ok_or(MergeError::MissingField("patch"))?;
    dive(target, match_node, inner_patch)
}

fn dive(target: &Node, match_node: &Node, inner_patch: &Node) -> Result<Node, MergeError> {
    let is_leaf = !matches!(target.value, Value::Object(_) | Value::Array(_) | Value::Sparse(_));
    if is_leaf {
        return if crate::match_doc(target, match_node)? {
            crate::patch(target, inner_patch)
        } else {
            Ok(target.clone())
        };
    }
    match &target.value {
        Value::Object(pairs) => {
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                out.push((k.clone(), dive(v, match_node, inner_patch)?));
            }
            Ok(Node {
                value: Value::Object(out),
                tag: target.tag.clone(),
            })
        }
        Value::Array(items) => {
            let out = items
                .iter()
                .map(|v| dive(v, match_node, inner_patch))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node {
                value: Value::Array(out),
                tag: target.tag.clone(),
            })
        }
        Value::Sparse(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(*k, dive(v, match_node, inner_patch)?);
            }
            Ok(Node {
                value: Value::Sparse(out),
                tag: target.tag.clone(),
            })
        }
        _ => unreachable!("leaf case handled above"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::{Tag, TagSegment};

    #[test]
    fn patches_matching_leaves_only() {
        let target = Node::new(Value::Object(vec![
            ("a".into(), Node::new(Value::Number(logd_node::Number::from_i64(1)))),
            ("b".into(), Node::new(Value::Number(logd_node::Number::from_i64(2)))),
        ]));
        let match_one = Node::new(Value::Number(logd_node::Number::from_i64(1)));
        let insert_zero =
            Node::new(Value::Number(logd_node::Number::from_i64(0))).with_tag(Tag::single("insert"));
        let dive_patch = Node::new(Value::Object(vec![
            ("match".into(), match_one),
            ("patch".into(), insert_zero),
        ]))
        .with_tag(Tag::new(vec![TagSegment::bare("dive")]).unwrap());
        let result = patch(&target, &dive_patch).unwrap();
        assert_eq!(result.value.object_get("a"), Some(&Node::new(Value::Number(logd_node::Number::from_i64(0)))));
        assert_eq!(result.value.object_get("b"), Some(&Node::new(Value::Number(logd_node::Number::from_i64(2)))));
    }
}
