// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!strdiff(multiline)`: apply a line-or-rune diff to a string (spec.md §4.B).
//!
//! The diff format is a flat list of `{op, text}` hunks (`op` one of
//! `"equal"`, `"insert"`, `"delete"`), applied left to right against the
//! target string split into lines (when the tag carries `multiline`) or
//! Unicode scalar values (otherwise). This is a self-contained choice — the
//! document text surface syntax is out of scope, so no pre-existing textual
//! diff format is mandated by the rest of the workspace.

use crate::MergeError;
use logd_node::{Node, Value};

/// Apply the hunk list to `target`'s string value.
///
/// # Errors
/// [`MergeError::TypeMismatch`] if `target` is not a string or the patch
/// child is not an array of well-formed hunks.
pub fn patch(target: &Node, patch_node: &Node) -> Result<Node, MergeError> {
    let Value::String(original) = &target.value else {
        return Err(MergeError::TypeMismatch {
            expected: "string",
            found: target.value.kind_name(),
        });
    };
    let Value::Array(hunks) = &patch_node.value else {
        return Err(MergeError::TypeMismatch {
            expected: "array of hunks",
            found: patch_node.value.kind_name(),
        });
    };
    let multiline = patch_node.tag_has("multiline") || tag_arg_is_multiline(patch_node);

    let units: Vec<String> = if multiline {
        original.split_inclusive('\n').map(str::to_string).collect()
    } else {
        original.chars().map(String::from).collect()
    };
    let mut cursor = 0usize;
    let mut out = String::new();
    for hunk in hunks {
        let Value::Object(fields) = &hunk.value else {
            return Err(MergeError::TypeMismatch {
                expected: "hunk object",
                found: hunk.value.kind_name(),
            });
        };
        let op = field_str(fields, "op")?;
        let text = field_str(fields, "text")?;
        match op.as_str() {
            "equal" => {
                let count = unit_count(&text, multiline);
                for unit in units.iter().skip(cursor).take(count) {
                    out.push_str(unit);
                }
                cursor += count;
            }
            "delete" => {
                cursor += unit_count(&text, multiline);
            }
            "insert" => out.push_str(&text),
            other => return Err(MergeError::ArgError(format!("unknown strdiff op: {other}"))),
        }
    }
    Ok(Node::new(Value::String(out)))
}

fn tag_arg_is_multiline(node: &Node) -> bool {
    node.tag
        .as_ref()
        .and_then(|t| t.segments().first())
        .is_some_and(|s| s.args.iter().any(|a| a == "multiline"))
}

fn unit_count(text: &str, multiline: bool) -> usize {
    if multiline {
        text.split_inclusive('\n').count()
    } else {
        text.chars().count()
    }
}

fn field_str(fields: &[(String, Node)], name: &'static str) -> Result<String, MergeError> {
    let node = fields.iter().find(|(k, _)| k == name).map(|(_, v)| v).ok_or(MergeError::MissingField(name))?;
    match &node.value {
        Value::String(s) => Ok(s.clone()),
        _ => Err(MergeError::TypeMismatch {
            expected: "string",
            found: node.value.kind_name(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::{Tag, TagSegment};

    fn hunk(op: &str, text: &str) -> Node {
        Node::new(Value::Object(vec![
            ("op".into(), Node::new(Value::String(op.into()))),
            ("text".into(), Node::new(Value::String(text.into()))),
        ]))
    }

    #[test]
    fn applies_rune_hunks() {
        let target = Node::new(Value::String("abc".into()));
        let p = Node::new(Value::Array(vec![hunk("equal", "a"), hunk("delete", "b"), hunk("insert", "X")]));
        let result = patch(&target, &p).unwrap();
        assert_eq!(result, Node::new(Value::String("aXc".into())));
    }

    #[test]
    fn multiline_tag_operates_on_lines() {
        let target = Node::new(Value::String("one\ntwo\n".into()));
        let p = Node::new(Value::Array(vec![hunk("delete", "one\n"), hunk("equal", "two\n")]))
            .with_tag(Tag::new(vec![TagSegment::with_args("strdiff", vec!["multiline".into()])]).unwrap());
        let result = patch(&target, &p).unwrap();
        assert_eq!(result, Node::new(Value::String("two\n".into())));
    }
}
