// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!arraydiff`: patch child is a sparse-index map; apply a sub-patch at each
//! index, leaving untouched indices alone (spec.md §4.B).

use crate::MergeError;
use logd_node::{Node, Value};

/// `target` must be a dense array; `patch_node`'s value must be a sparse
/// array whose keys are treated as indices into `target`. Indices
/// out-of-range (negative is unrepresentable in `u32`, so "negative" reduces
/// to "unknown" here) fail, matching spec.md's "negative or unknown indices
/// fail".
pub fn patch(target: &Node, patch_node: &Node) -> Result<Node, MergeError> {
    let Value::Array(items) = &target.value else {
        return Err(MergeError::TypeMismatch {
            expected: "array",
            found: target.value.kind_name(),
        });
    };
    let Value::Sparse(edits) = &patch_node.value else {
        return Err(MergeError::TypeMismatch {
            expected: "sparse index map",
            found: patch_node.value.kind_name(),
        });
    };
    // Indices in `edits` address `items` in its original shape, but removing
    // an element shifts every later index. Apply in-place patches first,
    // then deletions in descending order so earlier indices stay valid.
    let mut result = items.clone();
    for (index, sub_patch) in edits {
        let idx = *index as usize;
        if idx >= result.len() {
            return Err(MergeError::ArgError(format!("index {index} out of range")));
        }
        if sub_patch.tag_head() != Some("delete") {
            result[idx] = crate::patch(&result[idx], sub_patch)?;
        }
    }
    for (index, sub_patch) in edits.iter().rev() {
        if sub_patch.tag_head() == Some("delete") {
            result.remove(*index as usize);
        }
    }
    Ok(Node::new(Value::Array(result)))
}
