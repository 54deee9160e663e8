// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!pipe`: send the document's textual form to an external command, replace
//! with its output (spec.md §4.B).
//!
//! The document text surface syntax ("tony") is out of scope for this
//! workspace (see `logd-node`'s crate doc), so the textual form piped to and
//! from the external command is JSON via `serde_json` — a stand-in chosen
//! because every built-in [`logd_node::Value`] shape maps onto it without
//! loss of the information `!pipe`'s contract (spec.md §4.B) actually needs.

use crate::MergeError;
use logd_node::{Node, Value};
use std::io::Write as _;
use std::process::{Command, Stdio};

/// The patch child names the command to run (`{command: "..."}`). The
/// target's JSON form is written to the command's stdin; its stdout is
/// first attempted as JSON (yielding a structured [`Node`]), falling back to
/// a raw string node if that fails, per "string in, string or parsed Node
/// out" (spec.md §4.B).
///
/// # Errors
/// [`MergeError::MissingField`] if `command` is absent; [`MergeError::PipeFailed`]
/// if the process cannot be spawned, exits non-zero, or its output is not
/// valid UTF-8.
pub fn patch(target: &Node, patch_node: &Node) -> Result<Node, MergeError> {
    let command_value = patch_node
        .value
        .object_get("command")
        .ok_or(MergeError::MissingField("command"))?;
    let Value::String(command) = &command_value.value else {
        return Err(MergeError::TypeMismatch {
            expected: "string",
            found: command_value.value.kind_name(),
        });
    };

    let input = node_to_json(target).map_err(|e| MergeError::PipeFailed(e.to_string()))?;

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| MergeError::PipeFailed(e.to_string()))?;

    child
        .stdin
        .take()
        .ok_or_else(|| MergeError::PipeFailed("no stdin handle".into()))?
        .write_all(input.as_bytes())
        .map_err(|e| MergeError::PipeFailed(e.to_string()))?;

    let output = child.wait_with_output().map_err(|e| MergeError::PipeFailed(e.to_string()))?;
    if !output.status.success() {
        return Err(MergeError::PipeFailed(format!("command exited with {}", output.status)));
    }
    let stdout = String::from_utf8(output.stdout).map_err(|e| MergeError::PipeFailed(e.to_string()))?;

    Ok(json_to_node(&stdout).unwrap_or_else(|| Node::new(Value::String(stdout.trim_end().to_string()))))
}

fn node_to_json(node: &Node) -> Result<String, serde_json::Error> {
    serde_json::to_string(&to_serde_value(node))
}

fn json_to_node(text: &str) -> Option<Node> {
    let value: serde_json::Value = serde_json::from_str(text.trim()).ok()?;
    Some(from_serde_value(&value))
}

fn to_serde_value(node: &Node) -> serde_json::Value {
    match &node.value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(n.float.unwrap_or_default())
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Object(pairs) => {
            serde_json::Value::Object(pairs.iter().map(|(k, v)| (k.clone(), to_serde_value(v))).collect())
        }
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_serde_value).collect()),
        Value::Sparse(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.to_string(), to_serde_value(v))).collect(),
        ),
    }
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
    fn pipes_through_cat_unchanged() {
        let target = Node::new(Value::String("hello".into()));
        let p = Node::new(Value::Object(vec![("command".into(), Node::new(Value::String("cat".into())))]))
            .with_tag(Tag::single("pipe"));
        let result = patch(&target, &p).unwrap();
        assert_eq!(result, target);
    }

    #[test]
    fn missing_command_errors() {
        let target = Node::null();
        let p = Node::new(Value::Object(vec![])).with_tag(Tag::single("pipe"));
        assert!(matches!(patch(&target, &p), Err(MergeError::MissingField("command"))));
    }
}
