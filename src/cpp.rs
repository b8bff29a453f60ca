//! A tokenizer/treeifier pair for C++-flavoured source: identifiers, `//`/`/* */`
//! comments, quoted literals, whitespace, and the three bracket pairs.
//!
//! Grounded on `original_source/patre/cpp.py`. This module is a convenience
//! composition built from [crate::tokenizer]'s primitives, not a new primitive itself.

use crate::text::{TextError, TextRange};
use crate::tokenizer::{tok_fallback, tok_regex, tok_whitespace, TokFn, Tokenizer};
use crate::treeifier::Treeifier;
use regex::Regex;
use std::rc::Rc;

/// Skips `//...\n` and `/*...*/` comments, emitting nothing. Raises a [TextError] on an
/// unterminated block comment.
fn cpp_comment() -> TokFn {
    Rc::new(|text, pos| {
        let bytes = text.as_bytes();
        if !bytes[pos..].starts_with(b"//") && !bytes[pos..].starts_with(b"/*") {
            return Ok(None);
        }
        if bytes[pos..].starts_with(b"//") {
            let end = text[pos..]
                .find('\n')
                .map(|i| pos + i)
                .unwrap_or(text.len());
            return Ok(Some((None, end)));
        }
        match text[pos + 2..].find("*/") {
            Some(i) => Ok(Some((None, pos + 2 + i + 2))),
            None => Err(TextError::at(text, pos, "unterminated block comment")),
        }
    })
}

/// Matches a single- or double-quoted literal, tagged `"literal"`. Backslash-escapes the
/// following character. Raises a [TextError] on an unterminated literal.
fn cpp_literal() -> TokFn {
    Rc::new(|text, pos| {
        let bytes = text.as_bytes();
        let quote = bytes[pos];
        if quote != b'"' && quote != b'\'' {
            return Ok(None);
        }
        let mut i = pos + 1;
        loop {
            if i >= bytes.len() {
                return Err(TextError::at(text, pos, "unterminated literal"));
            }
            if bytes[i] == b'\\' {
                i += 2;
                continue;
            }
            if bytes[i] == quote {
                i += 1;
                break;
            }
            i += 1;
        }
        Ok(Some((Some(TextRange::new(text, pos, i, Some("literal"))), i)))
    })
}

/// Builds the C++-flavoured tokenizer: identifiers and comments/literals at stage 0,
/// whitespace at stage -100, a single-character fallback at stage 100.
pub fn tokenizer() -> Tokenizer {
    let mut t = Tokenizer::new();
    t.add_rule(-100, tok_whitespace(" \t\r\n"));
    t.add_rule(
        0,
        tok_regex(Regex::new("^[a-zA-Z_][a-zA-Z_0-9]*").unwrap(), Some("id")),
    );
    t.add_rule(0, cpp_comment());
    t.add_rule(0, cpp_literal());
    t.add_rule(100, tok_fallback());
    t
}

/// Builds the matching treeifier for `()`, `[]` and `{}`.
pub fn treeifier() -> Treeifier {
    let mut tf = Treeifier::new();
    tf.add_parens("(", ")");
    tf.add_parens("[", "]");
    tf.add_parens("{", "}");
    tf
}
