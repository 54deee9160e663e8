// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One module per built-in tag, plus `structural` for untagged nodes.

pub mod arraydiff;
pub mod combinators;
pub mod delete;
pub mod dive;
pub mod glob;
pub mod insert;
pub mod key;
pub mod let_binding;
pub mod pass;
pub mod pipe;
pub mod replace;
pub mod strdiff;
pub mod structural;
pub mod unquote;
