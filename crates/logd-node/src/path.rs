// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! KPath: the path language used to address storage, indexes, and
//! transaction participants (spec.md §3 "KPath").

use crate::{Node, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a [`KPath`]. The variant names the *kind of container* the
/// step enters, per spec.md §3: `.key` enters an object, `[i]` a dense
/// array, `{i}` a sparse array.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// `.key` — enters an object.
    Key(String),
    /// `[i]` — enters a dense array at index `i`.
    Index(u32),
    /// `{i}` — enters a sparse array at key `i`.
    Sparse(u32),
}

/// A sequence of [`Segment`]s from the document root. An empty path denotes
/// the root itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct KPath(Vec<Segment>);

impl KPath {
    /// The root path (empty segment list).
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from an explicit segment list.
    #[must_use]
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// This path's segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// True if this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new path with `segment` appended.
    #[must_use]
    pub fn child(&self, segment: Segment) -> Self {
        let mut segs = self.0.clone();
        segs.push(segment);
        Self(segs)
    }

    /// Returns the parent path and the final segment, or `None` at the root.
    #[must_use]
    pub fn split_last(&self) -> Option<(Self, &Segment)> {
        let (last, rest) = self.0.split_last()?;
        Some((Self(rest.to_vec()), last))
    }

    /// True if `self` is a prefix of `other` — either equal, or `other`
    /// extends `self` by one or more segments. This is the KPath-aware
    /// boundary the watch hub uses (spec.md §4.F): prefixes only align on
    /// segment boundaries, never mid-key.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// True if `self` and `other` are the same path, or either contains the
    /// other as a prefix. Used for the watch hub's "notifications on
    /// parents affect children and vice versa" rule (spec.md §4.F).
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    /// Parse a KPath from its textual form.
    ///
    /// # Errors
    /// Returns `Err` on malformed syntax (unterminated quote, unclosed
    /// bracket, non-numeric index).
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let mut segments = Vec::new();
        let mut chars = text.char_indices().peekable();
        while let Some((i, c)) = chars.peek().copied() {
            match c {
                '.' => {
                    chars.next();
                    let key = read_key(text, &mut chars)?;
                    segments.push(Segment::Key(key));
                }
                '[' => {
                    chars.next();
                    let idx = read_numeric(text, &mut chars, ']')?;
                    segments.push(Segment::Index(idx));
                }
                '{' => {
                    chars.next();
                    let idx = read_numeric(text, &mut chars, '}')?;
                    segments.push(Segment::Sparse(idx));
                }
                _ => return Err(PathError::UnexpectedChar(i, c)),
            }
        }
        Ok(Self(segments))
    }
}

fn read_key(
    text: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> Result<String, PathError> {
    match chars.peek().copied() {
        Some((_, '\'' | '"')) => {
            let (_, quote) = chars.next().unwrap();
            let mut out = String::new();
            loop {
                match chars.next() {
                    Some((_, '\\')) => match chars.next() {
                        Some((_, c)) => out.push(c),
                        None => return Err(PathError::UnterminatedQuote),
                    },
                    Some((_, c)) if c == quote => return Ok(out),
                    Some((_, c)) => out.push(c),
                    None => return Err(PathError::UnterminatedQuote),
                }
            }
        }
        _ => {
            let start = chars.peek().map_or(text.len(), |(i, _)| *i);
            let mut end = start;
            while let Some((i, c)) = chars.peek().copied() {
                if c == '.' || c == '[' || c == '{' {
                    break;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            if start == end {
                return Err(PathError::EmptyKey);
            }
            Ok(text[start..end].to_string())
        }
    }
}

fn read_numeric(
    text: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    close: char,
) -> Result<u32, PathError> {
    let start = chars.peek().map_or(text.len(), |(i, _)| *i);
    let mut end = start;
    while let Some((i, c)) = chars.peek().copied() {
        if c == close {
            end = i;
            chars.next();
            let digits = &text[start..end];
            return digits.parse::<u32>().map_err(|_| PathError::BadIndex(digits.to_string()));
        }
        end = i + c.len_utf8();
        chars.next();
    }
    Err(PathError::UnclosedBracket(close))
}

fn needs_quoting(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return true,
    }
    !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for KPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.0 {
            match seg {
                Segment::Key(k) if needs_quoting(k) => {
                    write!(f, ".\"")?;
                    for c in k.chars() {
                        if c == '"' || c == '\\' {
                            write!(f, "\\")?;
                        }
                        write!(f, "{c}")?;
                    }
                    write!(f, "\"")?;
                }
                Segment::Key(k) => write!(f, ".{k}")?,
                Segment::Index(i) => write!(f, "[{i}]")?,
                Segment::Sparse(i) => write!(f, "{{{i}}}")?,
            }
        }
        Ok(())
    }
}

/// Errors parsing a [`KPath`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// An unexpected character started a segment (must be `.`, `[`, or `{`).
    #[error("unexpected character {1:?} at byte {0}")]
    UnexpectedChar(usize, char),
    /// A quoted key was never closed.
    #[error("unterminated quoted key")]
    UnterminatedQuote,
    /// An unquoted key had zero characters (e.g. two dots in a row).
    #[error("empty key segment")]
    EmptyKey,
    /// `[` or `{` was never closed.
    #[error("unclosed bracket, expected {0:?}")]
    UnclosedBracket(char),
    /// The text inside `[...]`/`{...}` was not a valid `u32`.
    #[error("invalid numeric index: {0}")]
    BadIndex(String),
}

/// Resolve `segments` against `node`, failing (returning `None`) if any
/// step's container kind does not match the node actually present.
pub(crate) fn navigate<'a>(node: &'a Node, segments: &[Segment]) -> Option<&'a Node> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(node);
    };
    let next = match (first, &node.value) {
        (Segment::Key(k), Value::Object(_)) => node.value.object_get(k)?,
        (Segment::Index(i), Value::Array(items)) => items.get(*i as usize)?,
        (Segment::Sparse(i), Value::Sparse(map)) => map.get(i)?,
        _ => return None,
    };
    navigate(next, rest)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_segments() {
        let p = KPath::parse(".users[0]{7}").unwrap();
        assert_eq!(
            p.segments(),
            &[
                Segment::Key("users".into()),
                Segment::Index(0),
                Segment::Sparse(7),
            ]
        );
    }

    #[test]
    fn parses_quoted_key_with_escape() {
        let p = KPath::parse(".\"a\\\"b\"").unwrap();
        assert_eq!(p.segments(), &[Segment::Key("a\"b".into())]);
    }

    #[test]
    fn empty_path_is_root() {
        let p = KPath::parse("").unwrap();
        assert!(p.is_root());
    }

    #[test]
    fn roundtrips_through_display() {
        let p = KPath::parse(".users[3]").unwrap();
        assert_eq!(p.to_string(), ".users[3]");
    }

    #[test]
    fn quotes_keys_needing_it() {
        let p = KPath::from_segments(vec![Segment::Key("has space".into())]);
        assert_eq!(p.to_string(), ".\"has space\"");
    }

    #[test]
    fn prefix_and_overlap() {
        let root = KPath::root();
        let users = KPath::parse(".users").unwrap();
        let alice = KPath::parse(".users.alice").unwrap();
        assert!(root.is_prefix_of(&alice));
        assert!(users.is_prefix_of(&alice));
        assert!(!alice.is_prefix_of(&users));
        assert!(users.overlaps(&alice));
        assert!(alice.overlaps(&users));
    }

    #[test]
    fn rejects_unclosed_bracket() {
        assert!(KPath::parse(".a[0").is_err());
    }

    #[test]
    fn navigate_respects_container_kind() {
        let doc = Node::new(Value::Object(vec![(
            "a".into(),
            Node::new(Value::Array(vec![Node::new(Value::Bool(true))])),
        )]));
        let hit = KPath::parse(".a[0]").unwrap();
        assert_eq!(doc.get_path(&hit), Some(&Node::new(Value::Bool(true))));
        let wrong_kind = KPath::parse(".a.b").unwrap();
        assert_eq!(doc.get_path(&wrong_kind), None);
    }
}
