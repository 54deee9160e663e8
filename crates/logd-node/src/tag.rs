// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tag parsing/printing: `!name(arg,arg).name2(arg)` dotted chains.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One segment of a dotted tag chain: a name plus its argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSegment {
    /// Segment name (e.g. `insert`, `key`, `not`).
    pub name: String,
    /// Argument list, parsed but not interpreted (e.g. `key(id)` has
    /// `args: ["id"]`).
    pub args: Vec<String>,
}

impl TagSegment {
    /// Build a segment with no arguments.
    #[must_use]
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Build a segment with arguments.
    #[must_use]
    pub fn with_args(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl fmt::Display for TagSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "({})", self.args.join(","))?;
        }
        Ok(())
    }
}

/// A non-empty dotted chain of [`TagSegment`]s, e.g. `!not.tag.glob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag(Vec<TagSegment>);

impl Tag {
    /// Build a tag from a non-empty segment list.
    ///
    /// # Errors
    /// Returns `Err` if `segments` is empty.
    pub fn new(segments: Vec<TagSegment>) -> Result<Self, TagError> {
        if segments.is_empty() {
            return Err(TagError::Empty);
        }
        Ok(Self(segments))
    }

    /// Build a single-segment tag with no arguments.
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        Self(vec![TagSegment::bare(name)])
    }

    /// The segments making up this tag, in chain order.
    #[must_use]
    pub fn segments(&self) -> &[TagSegment] {
        &self.0
    }

    /// Parse a tag from its textual form (leading `!` optional).
    ///
    /// Grammar: `segment ('.' segment)*`, `segment := name ('(' arg (',' arg)* ')')?`.
    /// Names match `[A-Za-z_][A-Za-z0-9_]*`; args are comma-separated and may
    /// not themselves contain `,`, `(`, or `)` (nested structure is carried
    /// by the merge op's own child node, not by tag args).
    ///
    /// # Errors
    /// Returns `Err` on malformed syntax or an empty chain.
    pub fn parse(text: &str) -> Result<Self, TagError> {
        let text = text.strip_prefix('!').unwrap_or(text);
        if text.is_empty() {
            return Err(TagError::Empty);
        }
        let mut segments = Vec::new();
        for part in text.split('.') {
            segments.push(parse_segment(part)?);
        }
        Self::new(segments)
    }
}

fn parse_segment(part: &str) -> Result<TagSegment, TagError> {
    if let Some(open) = part.find('(') {
        let close = part
            .strip_suffix(')')
            .ok_or_else(|| TagError::Malformed(part.to_string()))?;
        let _ = close;
        let name = &part[..open];
        let args_str = &part[open + 1..part.len() - 1];
        validate_name(name)?;
        let args = if args_str.is_empty() {
            Vec::new()
        } else {
            args_str.split(',').map(str::to_string).collect()
        };
        Ok(TagSegment::with_args(name, args))
    } else {
        validate_name(part)?;
        Ok(TagSegment::bare(part))
    }
}

fn validate_name(name: &str) -> Result<(), TagError> {
    let mut chars = name.chars();
    let ok_first = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let ok_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if name.is_empty() || !ok_first || !ok_rest {
        return Err(TagError::Malformed(name.to_string()));
    }
    Ok(())
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!")?;
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

/// Errors parsing or constructing a [`Tag`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    /// The tag chain had no segments.
    #[error("empty tag")]
    Empty,
    /// A segment was not valid tag syntax.
    #[error("malformed tag segment: {0}")]
    Malformed(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_name() {
        let t = Tag::parse("!insert").unwrap();
        assert_eq!(t.segments(), &[TagSegment::bare("insert")]);
    }

    #[test]
    fn parses_args() {
        let t = Tag::parse("!key(id)").unwrap();
        assert_eq!(t.segments(), &[TagSegment::with_args("key", vec!["id".into()])]);
    }

    #[test]
    fn parses_dotted_chain() {
        let t = Tag::parse("!not.tag.glob").unwrap();
        assert_eq!(
            t.segments(),
            &[
                TagSegment::bare("not"),
                TagSegment::bare("tag"),
                TagSegment::bare("glob"),
            ]
        );
    }

    #[test]
    fn multi_arg_list() {
        let t = Tag::parse("!arg(a,b,c)").unwrap();
        assert_eq!(t.segments()[0].args, vec!["a", "b", "c"]);
    }

    #[test]
    fn roundtrips_through_display() {
        let t = Tag::parse("!key(id).replace").unwrap();
        assert_eq!(t.to_string(), "!key(id).replace");
    }

    #[test]
    fn rejects_empty() {
        assert!(Tag::parse("!").is_err());
        assert!(Tag::parse("").is_err());
    }

    #[test]
    fn rejects_malformed_name() {
        assert!(Tag::parse("!1bad").is_err());
    }
}
