// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Computing a patch from two documents, and reversing one (spec.md §4.B,
//! §8 "round-trip/invertibility laws").
//!
//! `diff(a, b)` must satisfy `patch(a, diff(a, b)) == b`, and `reverse` must
//! satisfy `patch(b, reverse(diff(a, b))) == a`. The simplest patch tree that
//! guarantees both laws unconditionally is also the least minimal one: any
//! object/array/sparse node whose *shape* or *key set* differs between `a`
//! and `b` is diffed as a single `!replace{from: a, to: b}` subtree rather
//! than a minimal per-key diff, because `!replace` is the one operation
//! whose reverse (swap `from`/`to`) is self-contained without consulting the
//! original document. Object keys present in both `a` and `b` with the same
//! shape recurse structurally, so the common case (a handful of changed
//! leaves in an otherwise-stable object) still produces a small, readable
//! patch; only the genuinely-reshaped subtrees fall back to whole-subtree
//! replacement.

use logd_node::{Node, Tag, Value};

fn replace_node(from: &Node, to: &Node) -> Node {
    Node::new(Value::Object(vec![("from".into(), from.clone()), ("to".into(), to.clone())]))
        .with_tag(Tag::single("replace"))
}

/// Compute a patch that turns `a` into `b` when applied via [`crate::patch`].
#[must_use]
pub fn diff(a: &Node, b: &Node) -> Node {
    if a == b {
        return Node::null().with_tag(Tag::single("pass"));
    }
    match (&a.value, &b.value) {
        (Value::Object(a_pairs), Value::Object(b_pairs)) if same_key_set(a_pairs, b_pairs) => {
            let mut out = Vec::with_capacity(b_pairs.len());
            for (key, b_child) in b_pairs {
                let a_child = a_pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v).expect("same key set");
                if a_child != b_child {
                    out.push((key.clone(), diff(a_child, b_child)));
                }
            }
            Node::new(Value::Object(out))
        }
        (Value::Array(a_items), Value::Array(b_items)) if a_items.len() == b_items.len() => {
            let out = a_items.iter().zip(b_items).map(|(ai, bi)| diff(ai, bi)).collect();
            Node::new(Value::Array(out))
        }
        (Value::Sparse(a_map), Value::Sparse(b_map)) if a_map.keys().eq(b_map.keys()) => {
            let mut out = std::collections::BTreeMap::new();
            for (key, b_child) in b_map {
                let a_child = &a_map[key];
                if a_child != b_child {
                    out.insert(*key, diff(a_child, b_child));
                }
            }
            Node::new(Value::Sparse(out))
        }
        _ => replace_node(a, b),
    }
}

fn same_key_set(a: &[(String, Node)], b: &[(String, Node)]) -> bool {
    a.len() == b.len() && a.iter().all(|(k, _)| b.iter().any(|(k2, _)| k2 == k))
}

/// Reverse a patch previously produced by [`diff`] (or any patch built the
/// same way), so that applying it undoes the original.
///
/// Only understands the shapes [`diff`] itself produces: untagged
/// object/array/sparse containers (recursed into) and `!replace{from,to}`
/// leaves/subtrees (from/to swapped). A patch containing any other tag is
/// returned unchanged — reversing an arbitrary hand-written patch is outside
/// this function's contract.
#[must_use]
pub fn reverse(patch_node: &Node) -> Node {
    if patch_node.tag_head() == Some("replace") {
        let from = patch_node.value.object_get("from").cloned().unwrap_or_else(Node::null);
        let to = patch_node.value.object_get("to").cloned().unwrap_or_else(Node::null);
        return replace_node(&to, &from);
    }
    if patch_node.tag.is_some() {
        return patch_node.clone();
    }
    match &patch_node.value {
        Value::Object(pairs) => {
            Node::new(Value::Object(pairs.iter().map(|(k, v)| (k.clone(), reverse(v))).collect()))
        }
        Value::Array(items) => Node::new(Value::Array(items.iter().map(reverse).collect())),
        Value::Sparse(map) => Node::new(Value::Sparse(map.iter().map(|(k, v)| (*k, reverse(v))).collect())),
        _ => patch_node.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn obj(pairs: Vec<(&str, Node)>) -> Node {
        Node::new(Value::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()))
    }

    #[test]
    fn identical_documents_diff_to_a_no_op() {
        let a = Node::new(Value::Bool(true));
        let d = diff(&a, &a);
        assert_eq!(crate::patch(&a, &d).unwrap(), a);
    }

    #[test]
    fn scalar_change_round_trips() {
        let a = Node::new(Value::Bool(true));
        let b = Node::new(Value::Bool(false));
        let d = diff(&a, &b);
        assert_eq!(crate::patch(&a, &d).unwrap(), b);
        assert_eq!(crate::patch(&b, &reverse(&d)).unwrap(), a);
    }

    #[test]
    fn object_diff_touches_only_changed_keys() {
        let a = obj(vec![("x", Node::new(Value::Bool(true))), ("y", Node::new(Value::Bool(true)))]);
        let b = obj(vec![("x", Node::new(Value::Bool(true))), ("y", Node::new(Value::Bool(false)))]);
        let d = diff(&a, &b);
        let Value::Object(pairs) = &d.value else { unreachable!() };
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "y");
        assert_eq!(crate::patch(&a, &d).unwrap(), b);
    }

    #[test]
    fn key_set_change_falls_back_to_replace() {
        let a = obj(vec![("x", Node::new(Value::Bool(true)))]);
        let b = obj(vec![("x", Node::new(Value::Bool(true))), ("y", Node::new(Value::Bool(true)))]);
        let d = diff(&a, &b);
        assert_eq!(d.tag_head(), Some("replace"));
        assert_eq!(crate::patch(&a, &d).unwrap(), b);
        assert_eq!(crate::patch(&b, &reverse(&d)).unwrap(), a);
    }

    #[test]
    fn nested_object_diff_recurses() {
        let a = obj(vec![("outer", obj(vec![("inner", Node::new(Value::Bool(true)))]))]);
        let b = obj(vec![("outer", obj(vec![("inner", Node::new(Value::Bool(false)))]))]);
        let d = diff(&a, &b);
        assert_eq!(crate::patch(&a, &d).unwrap(), b);
        assert_eq!(crate::patch(&b, &reverse(&d)).unwrap(), a);
    }
}
