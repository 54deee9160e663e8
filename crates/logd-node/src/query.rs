// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The restricted JSONPath dialect `Node::get`/`Node::list` accept
//! (spec.md §4.A): `$`, `.key`, `'quoted'`, `[i]`, `[*]`, `..key`.
//!
//! This is deliberately a different, smaller language than [`crate::KPath`]
//! (spec.md §3): KPath addresses exactly one container step at a time for
//! storage/transaction use; `Query` additionally supports wildcards and
//! recursive descent for read-only lookups over an in-memory [`crate::Node`].

use crate::{Node, Value};
use std::fmt;

/// One step of a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    /// `.key` or `['key']` — a named child.
    Child(String),
    /// `[i]` — a dense array index.
    Index(usize),
    /// `[*]` — every element of an array/sparse array, or every value of an
    /// object.
    Wildcard,
    /// `..key` — recursive descent: `key` matched at any depth.
    Descendant(String),
}

/// A compiled restricted-JSONPath query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(Vec<Step>);

impl Query {
    /// Parse a query string. A leading `$` is optional and consumed if
    /// present.
    ///
    /// # Errors
    /// Returns `Err` on malformed syntax.
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let text = text.strip_prefix('$').unwrap_or(text);
        let bytes = text.as_bytes();
        let mut steps = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'.' if bytes.get(i + 1) == Some(&b'.') => {
                    i += 2;
                    let (name, next) = read_ident(text, i)?;
                    steps.push(Step::Descendant(name));
                    i = next;
                }
                b'.' => {
                    i += 1;
                    let (name, next) = read_ident(text, i)?;
                    steps.push(Step::Child(name));
                    i = next;
                }
                b'[' => {
                    let close = text[i..]
                        .find(']')
                        .map(|off| i + off)
                        .ok_or(QueryError::UnclosedBracket)?;
                    let inner = &text[i + 1..close];
                    steps.push(parse_bracket(inner)?);
                    i = close + 1;
                }
                _ => return Err(QueryError::UnexpectedChar(i)),
            }
        }
        Ok(Self(steps))
    }

    /// Evaluate against `root`, returning matches in document order.
    #[must_use]
    pub fn eval<'a>(&self, root: &'a Node) -> Vec<&'a Node> {
        let mut current = vec![root];
        for step in &self.0 {
            let mut next = Vec::new();
            for node in current {
                apply_step(step, node, &mut next);
            }
            current = next;
        }
        current
    }
}

fn parse_bracket(inner: &str) -> Result<Step, QueryError> {
    if inner == "*" {
        return Ok(Step::Wildcard);
    }
    if let Some(quoted) = strip_quotes(inner) {
        return Ok(Step::Child(quoted));
    }
    inner
        .parse::<usize>()
        .map(Step::Index)
        .map_err(|_| QueryError::BadBracket(inner.to_string()))
}

fn strip_quotes(inner: &str) -> Option<String> {
    let bytes = inner.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'\'' || bytes[0] == b'"') && bytes[bytes.len() - 1] == bytes[0] {
        Some(inner[1..inner.len() - 1].to_string())
    } else {
        None
    }
}

fn read_ident(text: &str, start: usize) -> Result<(String, usize), QueryError> {
    if text[start..].starts_with(['\'', '"']) {
        let quote = text.as_bytes()[start];
        let rest = &text[start + 1..];
        let end = rest
            .find(quote as char)
            .ok_or(QueryError::UnterminatedQuote)?;
        return Ok((rest[..end].to_string(), start + 2 + end));
    }
    let rest = &text[start..];
    let end = rest
        .find(['.', '['])
        .map_or(rest.len(), |e| e);
    if end == 0 {
        return Err(QueryError::EmptyIdent);
    }
    Ok((rest[..end].to_string(), start + end))
}

fn apply_step<'a>(step: &Step, node: &'a Node, out: &mut Vec<&'a Node>) {
    match step {
        Step::Child(name) => {
            if let Some(found) = node.value.object_get(name) {
                out.push(found);
            }
        }
        Step::Index(i) => {
            if let Value::Array(items) = &node.value {
                if let Some(found) = items.get(*i) {
                    out.push(found);
                }
            }
        }
        Step::Wildcard => match &node.value {
            Value::Array(items) => out.extend(items.iter()),
            Value::Object(pairs) => out.extend(pairs.iter().map(|(_, v)| v)),
            Value::Sparse(map) => out.extend(map.values()),
            _ => {}
        },
        Step::Descendant(name) => collect_descendants(name, node, out),
    }
}

fn collect_descendants<'a>(name: &str, node: &'a Node, out: &mut Vec<&'a Node>) {
    match &node.value {
        Value::Object(pairs) => {
            for (k, v) in pairs {
                if k == name {
                    out.push(v);
                }
                collect_descendants(name, v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_descendants(name, v, out);
            }
        }
        Value::Sparse(map) => {
            for v in map.values() {
                collect_descendants(name, v, out);
            }
        }
        _ => {}
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for step in &self.0 {
            match step {
                Step::Child(name) => write!(f, ".{name}")?,
                Step::Index(i) => write!(f, "[{i}]")?,
                Step::Wildcard => write!(f, "[*]")?,
                Step::Descendant(name) => write!(f, "..{name}")?,
            }
        }
        Ok(())
    }
}

/// Errors parsing a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// `[` was never closed.
    #[error("unclosed bracket")]
    UnclosedBracket,
    /// A quoted identifier was never closed.
    #[error("unterminated quote")]
    UnterminatedQuote,
    /// A `.`/`..` step had no following identifier.
    #[error("empty identifier after '.'")]
    EmptyIdent,
    /// An unexpected character started a step.
    #[error("unexpected character at byte {0}")]
    UnexpectedChar(usize),
    /// `[...]` content was neither `*`, a quoted key, nor a numeric index.
    #[error("invalid bracket content: {0}")]
    BadBracket(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::Value;

    fn doc() -> Node {
        Node::new(Value::Object(vec![(
            "users".into(),
            Node::new(Value::Array(vec![
                Node::new(Value::Object(vec![("name".into(), Node::new(Value::String("alice".into())))])),
                Node::new(Value::Object(vec![("name".into(), Node::new(Value::String("bob".into())))])),
            ])),
        )]))
    }

    #[test]
    fn child_and_index() {
        let q = Query::parse("$.users[0].name").unwrap();
        let hits = q.eval(&doc());
        assert_eq!(hits, vec![&Node::new(Value::String("alice".into()))]);
    }

    #[test]
    fn wildcard_over_array() {
        let q = Query::parse("$.users[*].name").unwrap();
        let hits = q.eval(&doc());
        assert_eq!(
            hits,
            vec![
                &Node::new(Value::String("alice".into())),
                &Node::new(Value::String("bob".into())),
            ]
        );
    }

    #[test]
    fn recursive_descent_finds_nested_key() {
        let q = Query::parse("$..name").unwrap();
        let hits = q.eval(&doc());
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn quoted_key_in_brackets() {
        let q = Query::parse("$['users']").unwrap();
        let hits = q.eval(&doc());
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn rejects_unclosed_bracket() {
        assert!(Query::parse("$.users[0").is_err());
    }
}
