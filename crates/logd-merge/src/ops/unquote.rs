// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!unquote`: parse the patched string as a document (spec.md §4.B).
//!
//! As with [`crate::ops::pipe`], the document text surface syntax is out of
//! scope, so "parse as a document" here means "parse as JSON" — the closest
//! stand-in available that round-trips every [`logd_node::Value`] shape.

use crate::MergeError;
use logd_node::{Node, Value};

/// First patches `target` structurally with `patch_node`'s inner child (the
/// node wrapped by the `!unquote` tag), then parses the resulting string as
/// JSON into a [`Node`].
///
/// # Errors
/// [`MergeError::TypeMismatch`] if the patched value isn't a string;
/// [`MergeError::ArgError`] if it isn't valid JSON.
pub fn patch(target: &Node, patch_node: &Node) -> Result<Node, MergeError> {
    let inner = patch_node.without_tag();
    let patched = crate::patch(target, &inner)?;
    let Value::String(text) = &patched.value else {
        return Err(MergeError::TypeMismatch {
            expected: "string",
            found: patched.value.kind_name(),
        });
    };
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| MergeError::ArgError(e.to_string()))?;
    Ok(from_serde_value(&value))
}

fn from_serde_value(value: &serde_json::Value) -> Node {
    match value {
        serde_json::Value::Null => Node::null(),
        serde_json::Value::Bool(b) => Node::new(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            Node::new(Value::Number(logd_node::Number::from_f64(n.as_f64().unwrap_or_default())))
        }
        serde_json::Value::String(s) => Node::new(Value::String(s.clone())),
        serde_json::Value::Array(items) => Node::new(Value::Array(items.iter().map(from_serde_value).collect())),
        serde_json::Value::Object(pairs) => {
            Node::new(Value::Object(pairs.iter().map(|(k, v)| (k.clone(), from_serde_value(v))).collect()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::Tag;

    #[test]
    fn parses_patched_string_as_json() {
        let target = Node::null();
        let replacement = Node::new(Value::String("{\"a\":1}".into())).with_tag(Tag::single("insert"));
        let p = replacement.with_tag(Tag::single("unquote"));
        let result = patch(&target, &p).unwrap();
        assert_eq!(
            result.value.object_get("a"),
            Some(&Node::new(Value::Number(logd_node::Number::from_f64(1.0))))
        );
    }

    #[test]
    fn non_string_after_patch_errors() {
        let target = Node::null();
        let p = Node::new(Value::Bool(true)).with_tag(Tag::single("unquote"));
        assert!(patch(&target, &p).is_err());
    }
}
