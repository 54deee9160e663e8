// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Structural match/patch for untagged nodes (spec.md §4.B).

use crate::MergeError;
use logd_node::{Node, Value};

/// Structural patch: recursive merge for untagged patch nodes.
///
/// Objects and sparse arrays merge key-wise, inserting keys absent from the
/// target; dense arrays merge element-wise and require equal length (an
/// explicit `!arraydiff` or `!key(...)` is required otherwise, per spec.md
/// §4.B). A scalar (or type-mismatched) patch child simply replaces the
/// target wholesale — the base case every recursive merge bottoms out at.
pub fn patch(target: &Node, patch_node: &Node) -> Result<Node, MergeError> {
    match (&target.value, &patch_node.value) {
        (Value::Object(_), Value::Object(patch_pairs)) => {
            let mut result = target.clone();
            for (key, child_patch) in patch_pairs {
                if child_patch.tag_head() == Some("delete") {
                    result.value.object_remove(key);
                    continue;
                }
                let current = result.value.object_get(key).cloned().unwrap_or_else(Node::null);
                let new_child = crate::patch(&current, child_patch)?;
                result.value.object_set(key, new_child);
            }
            Ok(result)
        }
        (Value::Array(target_items), Value::Array(patch_items)) => {
            if target_items.len() != patch_items.len() {
                return Err(MergeError::TypeMismatch {
                    expected: "array of matching length",
                    found: "array of different length",
                });
            }
            let merged = target_items
                .iter()
                .zip(patch_items)
                .map(|(t, p)| crate::patch(t, p))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node::new(Value::Array(merged)))
        }
        (Value::Sparse(target_map), Value::Sparse(patch_map)) => {
            let mut result = target_map.clone();
            for (key, child_patch) in patch_map {
                if child_patch.tag_head() == Some("delete") {
                    result.remove(key);
                    continue;
                }
                let current = result.get(key).cloned().unwrap_or_else(Node::null);
                let new_child = crate::patch(&current, child_patch)?;
                result.insert(*key, new_child);
            }
            Ok(Node::new(Value::Sparse(result)))
        }
        // Scalars, `null`, or a type-changing patch: wholesale replace.
        _ => Ok(patch_node.clone()),
    }
}

/// Structural match: partial for objects, pairwise-equal for arrays, `null`
/// matches anything (spec.md §4.B "Structural match").
pub fn match_doc(doc: &Node, match_node: &Node) -> Result<bool, MergeError> {
    if matches!(match_node.value, Value::Null) {
        return Ok(true);
    }
    match (&doc.value, &match_node.value) {
        (_, Value::Null) => Ok(true),
        (Value::Object(_), Value::Object(match_pairs)) => {
            for (key, sub_match) in match_pairs {
                let Some(sub_doc) = doc.value.object_get(key) else {
                    return Ok(false);
                };
                if !crate::match_doc(sub_doc, sub_match)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Array(doc_items), Value::Array(match_items)) => {
            if doc_items.len() != match_items.len() {
                return Ok(false);
            }
            for (d, m) in doc_items.iter().zip(match_items) {
                if !crate::match_doc(d, m)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Sparse(doc_map), Value::Sparse(match_map)) => {
            for (key, sub_match) in match_map {
                let Some(sub_doc) = doc_map.get(key) else {
                    return Ok(false);
                };
                if !crate::match_doc(sub_doc, sub_match)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (doc_val, match_val) => Ok(doc_val.kind_name() == match_val.kind_name() && doc.value == match_node.value),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn object_patch_inserts_absent_key() {
        let target = Node::new(Value::Object(vec![("a".into(), Node::new(Value::Bool(true)))]));
        let patch_node = Node::new(Value::Object(vec![("b".into(), Node::new(Value::Bool(false)))]));
        let result = patch(&target, &patch_node).unwrap();
        assert_eq!(result.value.object_get("a"), Some(&Node::new(Value::Bool(true))));
        assert_eq!(result.value.object_get("b"), Some(&Node::new(Value::Bool(false))));
    }

    #[test]
    fn delete_tagged_child_removes_key() {
        use logd_node::Tag;
        let target = Node::new(Value::Object(vec![
            ("a".into(), Node::new(Value::Bool(true))),
            ("b".into(), Node::new(Value::Bool(false))),
        ]));
        let patch_node = Node::new(Value::Object(vec![("a".into(), Node::null().with_tag(Tag::single("delete")))]));
        let result = patch(&target, &patch_node).unwrap();
        assert_eq!(result.value.object_get("a"), None);
        assert_eq!(result.value.object_get("b"), Some(&Node::new(Value::Bool(false))));
    }

    #[test]
    fn array_patch_requires_equal_length() {
        let target = Node::new(Value::Array(vec![Node::null()]));
        let patch_node = Node::new(Value::Array(vec![Node::null(), Node::null()]));
        assert!(patch(&target, &patch_node).is_err());
    }

    #[test]
    fn null_in_match_matches_anything() {
        let doc = Node::new(Value::Bool(true));
        assert!(match_doc(&doc, &Node::null()).unwrap());
    }

    #[test]
    fn object_match_is_partial() {
        let doc = Node::new(Value::Object(vec![
            ("a".into(), Node::new(Value::Bool(true))),
            ("b".into(), Node::new(Value::Bool(false))),
        ]));
        let m = Node::new(Value::Object(vec![("a".into(), Node::new(Value::Bool(true)))]));
        assert!(match_doc(&doc, &m).unwrap());
    }

    #[test]
    fn array_match_requires_equal_length() {
        let doc = Node::new(Value::Array(vec![Node::null()]));
        let m = Node::new(Value::Array(vec![Node::null(), Node::null()]));
        assert!(!match_doc(&doc, &m).unwrap());
    }
}
