// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!let {let:[{name:value}…], in: m}`: substitute `.name` references in `m`
//! with bound values, then match (spec.md §4.B).
//!
//! A reference is a string scalar of the form `.name`; substitution walks
//! `m` depth-first and replaces each such string wholesale with the bound
//! value, leaving everything else untouched. This is a deliberately minimal
//! reading of "substitute `.name` in `m`" — there is no richer expression
//! grammar defined for match nodes elsewhere in this workspace.

use crate::MergeError;
use logd_node::{Node, Value};

/// Bind each `{name: value}` pair from `let` into scope, substitute every
/// `.name` reference found in `in`, then match the result against `doc`.
pub fn match_doc(doc: &Node, match_node: &Node) -> Result<bool, MergeError> {
    let bindings_node = match_node.value.object_get("let").ok_or(MergeError::MissingField("let"))?;
    let Value::Array(bindings) = &bindings_node.value else {
        return Err(MergeError::TypeMismatch {
            expected: "array of bindings",
            found: bindings_node.value.kind_name(),
        });
    };
    let template = match_node.value.object_get("in").ok_or(MergeError::MissingField("in"))?;

    let mut scope = Vec::new();
    for binding in bindings {
        let Value::Object(pairs) = &binding.value else {
            return Err(MergeError::TypeMismatch {
                expected: "single-key binding object",
                found: binding.value.kind_name(),
            });
        };
        for (name, value) in pairs {
            scope.push((name.clone(), value.clone()));
        }
    }

    let substituted = substitute(template, &scope);
    crate::match_doc(doc, &substituted)
}

fn substitute(node: &Node, scope: &[(String, Node)]) -> Node {
    if let Value::String(text) = &node.value {
        if let Some(name) = text.strip_prefix('.') {
            if let Some((_, bound)) = scope.iter().find(|(n, _)| n == name) {
                return bound.clone();
            }
        }
    }
    match &node.value {
        Value::Object(pairs) => Node {
            value: Value::Object(pairs.iter().map(|(k, v)| (k.clone(), substitute(v, scope))).collect()),
            tag: node.tag.clone(),
        },
        Value::Array(items) => Node {
            value: Value::Array(items.iter().map(|v| substitute(v, scope)).collect()),
            tag: node.tag.clone(),
        },
        Value::Sparse(map) => Node {
            value: Value::Sparse(map.iter().map(|(k, v)| (*k, substitute(v, scope))).collect()),
            tag: node.tag.clone(),
        },
        _ => node.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::Tag;

    fn binding(name: &str, value: Node) -> Node {
        Node::new(Value::Object(vec![(name.into(), value)]))
    }

    #[test]
    fn substitutes_reference_before_matching() {
        let doc = Node::new(Value::Bool(true));
        let let_node = Node::new(Value::Object(vec![
            ("let".into(), Node::new(Value::Array(vec![binding("x", Node::new(Value::Bool(true)))]))),
            ("in".into(), Node::new(Value::String(".x".into()))),
        ]))
        .with_tag(Tag::single("let"));
        assert!(match_doc(&doc, &let_node).unwrap());
    }

    #[test]
    fn unbound_reference_is_left_as_string() {
        let doc = Node::new(Value::String(".y".into()));
        let let_node = Node::new(Value::Object(vec![
            ("let".into(), Node::new(Value::Array(vec![]))),
            ("in".into(), Node::new(Value::String(".y".into()))),
        ]))
        .with_tag(Tag::single("let"));
        assert!(match_doc(&doc, &let_node).unwrap());
    }
}
