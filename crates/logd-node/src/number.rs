// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lossless number representation (spec.md §3).

use serde::{Deserialize, Serialize};

/// A number node: the original text plus whichever of the integer/float
/// interpretations are exact for that text.
///
/// Both are populated only when the text is losslessly representable as
/// both (e.g. `"3"` is `int: Some(3), float: Some(3.0)`; `"3.5"` is
/// `int: None, float: Some(3.5)`; a too-large integer literal is
/// `int: None, float: Some(..)` with the original digits retained in
/// `text` for round-trip).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Number {
    /// Original textual form, preserved for lossless round-trip.
    pub text: String,
    /// Integer interpretation, if the text is exactly representable as one.
    pub int: Option<i64>,
    /// Floating-point interpretation, if the text is exactly representable
    /// (or approximately, when no integer interpretation exists).
    pub float: Option<f64>,
}

impl Number {
    /// Build a number node from an `i64`, populating both interpretations.
    #[must_use]
    pub fn from_i64(v: i64) -> Self {
        Self {
            text: v.to_string(),
            int: Some(v),
            #[allow(clippy::cast_precision_loss)]
            float: Some(v as f64),
        }
    }

    /// Build a number node from an `f64`. Populates the integer
    /// interpretation too when `v` has no fractional part and fits `i64`.
    #[must_use]
    pub fn from_f64(v: f64) -> Self {
        let int = if v.fract() == 0.0 && v.is_finite() && (i64::MIN as f64..=i64::MAX as f64).contains(&v) {
            #[allow(clippy::cast_possible_truncation)]
            Some(v as i64)
        } else {
            None
        };
        Self {
            text: format_float(v),
            int,
            float: Some(v),
        }
    }

    /// Parse a numeric literal, retaining its exact text.
    ///
    /// # Errors
    /// Returns `Err` if `text` is not a valid JSON-style number literal.
    pub fn parse(text: &str) -> Result<Self, NumberParseError> {
        if text.is_empty() {
            return Err(NumberParseError::Empty);
        }
        let is_float_syntax = text.contains(['.', 'e', 'E']);
        let float = text
            .parse::<f64>()
            .map_err(|_| NumberParseError::Invalid(text.to_string()))?;
        let int = if is_float_syntax {
            None
        } else {
            text.parse::<i64>().ok()
        };
        Ok(Self {
            text: text.to_string(),
            int,
            float: Some(float),
        })
    }
}

impl PartialEq for Number {
    /// Numeric equality, not textual: `1` and `1.0` are equal numbers even
    /// though their `text` differs. Structural match (spec.md §4.B) relies
    /// on this.
    fn eq(&self, other: &Self) -> bool {
        match (self.int, other.int) {
            (Some(a), Some(b)) => a == b,
            _ => self.float == other.float,
        }
    }
}

fn format_float(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// Errors parsing a numeric literal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NumberParseError {
    /// The literal was empty.
    #[error("empty numeric literal")]
    Empty,
    /// The literal did not parse as a number.
    #[error("invalid numeric literal: {0}")]
    Invalid(String),
}
