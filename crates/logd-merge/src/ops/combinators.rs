// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!and` / `!or` / `!not.<tag>`, `!tag.<match>`, `!subtree.<match>`: boolean
//! and structural combinators over sub-matches (spec.md §4.B).

use crate::MergeError;
use logd_node::{Node, Value};

/// `!and`: the patch child is an array of sub-matches, all of which must
/// match `doc`.
pub fn match_and(doc: &Node, match_node: &Node) -> Result<bool, MergeError> {
    for sub in sub_matches(match_node)? {
        if !crate::match_doc(doc, sub)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `!or`: the patch child is an array of sub-matches, at least one of which
/// must match `doc`.
pub fn match_or(doc: &Node, match_node: &Node) -> Result<bool, MergeError> {
    for sub in sub_matches(match_node)? {
        if crate::match_doc(doc, sub)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `!not.<tag>`: the remainder of the dotted tag chain (after `not`) names
/// the sub-match to negate, carried by the same wrapped value.
pub fn match_not(doc: &Node, match_node: &Node) -> Result<bool, MergeError> {
    let rest = rest_of_chain(match_node)?;
    Ok(!crate::match_doc(doc, &rest)?)
}

/// `!tag.<match>`: apply the remainder of the chain as a match against the
/// target's own tag, rendered as a string (`Display`), or the empty string
/// if untagged.
pub fn match_tag(doc: &Node, match_node: &Node) -> Result<bool, MergeError> {
    let rest = rest_of_chain(match_node)?;
    let tag_text = doc.tag.as_ref().map_or_else(String::new, ToString::to_string);
    crate::match_doc(&Node::new(Value::String(tag_text)), &rest)
}

/// `!subtree.<match>`: true iff `<match>` matches at any descendant position
/// of `doc` (including `doc` itself).
pub fn match_subtree(doc: &Node, match_node: &Node) -> Result<bool, MergeError> {
    let rest = rest_of_chain(match_node)?;
    subtree_match(doc, &rest)
}

fn subtree_match(doc: &Node, rest: &Node) -> Result<bool, MergeError> {
    if crate::match_doc(doc, rest)? {
        return Ok(true);
    }
    match &doc.value {
        Value::Object(pairs) => {
            for (_, child) in pairs {
                if subtree_match(child, rest)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Array(items) => {
            for child in items {
                if subtree_match(child, rest)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Sparse(map) => {
            for child in map.values() {
                if subtree_match(child, rest)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

fn sub_matches(match_node: &Node) -> Result<&[Node], MergeError> {
    match &match_node.value {
        Value::Array(items) => Ok(items),
        other => Err(MergeError::TypeMismatch {
            expected: "array of sub-matches",
            found: other.kind_name(),
        }),
    }
}

/// Strip the leading tag segment (`not`/`tag`/`subtree`) and re-tag the
/// wrapped value with whatever remains of the dotted chain, so the recursive
/// call dispatches on the next segment.
fn rest_of_chain(match_node: &Node) -> Result<Node, MergeError> {
    let tag = match_node.tag.as_ref().ok_or(MergeError::MissingField("tag chain"))?;
    let remaining = &tag.segments()[1..];
    if remaining.is_empty() {
        return Err(MergeError::ArgError("combinator requires a following tag segment".into()));
    }
    let rest_tag = logd_node::Tag::new(remaining.to_vec()).map_err(|e| MergeError::ArgError(e.to_string()))?;
    Ok(match_node.without_tag().with_tag(rest_tag))
}
