// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tag-driven diff/match/patch algebra over [`logd_node::Node`] (spec.md §4.B).
//!
//! The registry dispatches on a node's tag head (spec.md §9's redesign flag:
//! a tagged-variant enumeration of built-ins, with the open-ended registry
//! kept only for `!pipe` and any future user-registered tag). [`patch`] and
//! [`match_doc`] are the two public entry points every built-in operation
//! recurses back through, so nested tags compose without each operation
//! needing to know about the others.

mod diff;
mod ops;
mod registry;

pub use diff::{diff, reverse};
pub use registry::{register, MatchOp, MergeOp, PatchOp};

use logd_node::Node;
use thiserror::Error;

/// Failure kinds for merge operations (spec.md §4.B "Failure modes").
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MergeError {
    /// The patch/match node's tag head names no registered operation.
    #[error("unknown tag: {0}")]
    UnknownTag(String),
    /// A value had the wrong shape for the operation applied to it.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The kind the operation required.
        expected: &'static str,
        /// The kind actually present.
        found: &'static str,
    },
    /// A required field was absent from an operation's argument node.
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// `!replace`'s `from` did not match the current value.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    /// A tag argument was malformed or out of range.
    #[error("argument error: {0}")]
    ArgError(String),
    /// An external `!pipe` command failed to run or returned non-UTF-8.
    #[error("pipe command failed: {0}")]
    PipeFailed(String),
}

/// Apply `patch_node` to `target`, returning the new document.
///
/// Dispatches on `patch_node`'s tag head via the registry; an untagged
/// `patch_node` uses structural merge (spec.md §4.B "Structural patch").
/// Failures never leak partial mutation — each operation builds its result
/// independently and only replaces `target` on success.
///
/// # Errors
/// See [`MergeError`].
pub fn patch(target: &Node, patch_node: &Node) -> Result<Node, MergeError> {
    match patch_node.tag_head() {
        Some(name) => {
            let op = registry::lookup(name).ok_or_else(|| MergeError::UnknownTag(name.to_string()))?;
            let patch_fn = op.patch.ok_or_else(|| MergeError::UnknownTag(name.to_string()))?;
            patch_fn(target, patch_node)
        }
        None => ops::structural::patch(target, patch_node),
    }
}

/// Test `match_node` against `doc`.
///
/// Dispatches on `match_node`'s tag head via the registry; an untagged
/// `match_node` uses structural match (spec.md §4.B "Structural match").
/// Pure: never mutates `doc`, and calling twice yields the same result
/// (spec.md §8 "Idempotence of match").
///
/// # Errors
/// See [`MergeError`].
pub fn match_doc(doc: &Node, match_node: &Node) -> Result<bool, MergeError> {
    match match_node.tag_head() {
        Some(name) => {
            let op = registry::lookup(name).ok_or_else(|| MergeError::UnknownTag(name.to_string()))?;
            let match_fn = op.r#match.ok_or_else(|| MergeError::UnknownTag(name.to_string()))?;
            match_fn(doc, match_node)
        }
        None => ops::structural::match_doc(doc, match_node),
    }
}
