// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!glob`: shell-glob match on string values (spec.md §4.B).

use crate::MergeError;
use logd_node::{Node, Value};

/// `doc` must be a string; `match_node`'s wrapped value must also be a
/// string, interpreted as a shell-glob pattern (`*`, `?`, `[...]`, `{...}`)
/// against it.
pub fn match_doc(doc: &Node, match_node: &Node) -> Result<bool, MergeError> {
    let Value::String(subject) = &doc.value else {
        return Ok(false);
    };
    let Value::String(pattern) = &match_node.value else {
        return Err(MergeError::TypeMismatch {
            expected: "string pattern",
            found: match_node.value.kind_name(),
        });
    };
    Ok(glob_match::glob_match(pattern, subject))
}
