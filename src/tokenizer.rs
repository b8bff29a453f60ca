//! Staged, pluggable lexical analysis.
//!
//! Grounded on `original_source/patre/parse.py`'s `Tokenizer`/`addfn`: rules are
//! `(stage, fn)` pairs tried in ascending stage order at every position, with a
//! single per-invocation override rule (used by the pattern compilers, §4.E/§4.G,
//! to splice escape-sequence parsing directly into the character stream).

use crate::text::{TextError, TextRange};
use crate::util::Log;
use regex::Regex;
use std::rc::Rc;

/// A tokenizer rule: given the shared source text and a byte position, either:
/// - `Ok(None)` — did not match, try the next rule;
/// - `Ok(Some((out, end)))` — matched up to `end`; emit `out` unless it is `None`
///   (silently discarded, e.g. whitespace);
/// - `Err(_)` — a hard tokenization failure (e.g. an unterminated comment).
pub type TokFn = Rc<dyn Fn(&Rc<str>, usize) -> Result<Option<(Option<TextRange>, usize)>, TextError>>;

/// A staged greedy tokenizer: a list of rules, stable-sorted by ascending stage.
#[derive(Default)]
pub struct Tokenizer {
    rules: Vec<(i32, TokFn)>,
    debug: Log<&'static str>,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule at the given stage. Rules are tried, per position, in
    /// ascending stage order; the first to match wins.
    pub fn add_rule(&mut self, stage: i32, rule: TokFn) -> &mut Self {
        self.rules.push((stage, rule));
        self.rules.sort_by_key(|(stage, _)| *stage);
        self
    }

    pub fn set_log(&mut self, debug: Log<&'static str>) {
        self.debug = debug;
    }

    /// Tokenize `text` starting at `pos`. `override_fn`, if given, is tried before
    /// any staged rule at every position — this is how escape-sequence parsing is
    /// injected into an otherwise unmodified tokenizer (§4.E, §4.G).
    pub fn tokenize<'t>(
        &'t self,
        text: Rc<str>,
        pos: usize,
        override_fn: Option<TokFn>,
    ) -> TokenIter<'t> {
        TokenIter {
            rules: &self.rules,
            debug: &self.debug,
            text,
            pos,
            override_fn,
        }
    }

    /// Convenience: tokenize the whole of `text` from the start, collecting every
    /// emitted range eagerly.
    pub fn tokenize_all(&self, text: &str) -> Result<Vec<TextRange>, TextError> {
        self.tokenize(Rc::from(text), 0, None).collect()
    }
}

/// A lazy, position-advancing tokenization of one piece of text.
pub struct TokenIter<'t> {
    rules: &'t [(i32, TokFn)],
    debug: &'t Log<&'static str>,
    text: Rc<str>,
    pos: usize,
    override_fn: Option<TokFn>,
}

impl<'t> TokenIter<'t> {
    /// Current position in the source text.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn text(&self) -> &Rc<str> {
        &self.text
    }
}

impl<'t> Iterator for TokenIter<'t> {
    type Item = Result<TextRange, TextError>;

    fn next(&mut self) -> Option<Self::Item> {
        'outer: loop {
            if self.pos >= self.text.len() {
                return None;
            }

            if let Some(over) = self.override_fn.clone() {
                match over(&self.text, self.pos) {
                    Ok(Some((out, end))) => {
                        if end == self.pos {
                            return Some(Err(TextError::at(
                                &self.text,
                                self.pos,
                                "override rule produced an empty match",
                            )));
                        }
                        self.pos = end;
                        match out {
                            Some(range) => return Some(Ok(range)),
                            None => continue 'outer,
                        }
                    }
                    Ok(None) => {}
                    Err(e) => return Some(Err(e)),
                }
            }

            for (_, rule) in self.rules {
                match rule(&self.text, self.pos) {
                    Ok(Some((out, end))) => {
                        if end == self.pos {
                            return Some(Err(TextError::at(
                                &self.text,
                                self.pos,
                                "tokenizer rule produced an empty match",
                            )));
                        }
                        self.pos = end;
                        self.debug.log_verbose("rule matched");
                        match out {
                            Some(range) => return Some(Ok(range)),
                            None => continue 'outer,
                        }
                    }
                    Ok(None) => continue,
                    Err(e) => return Some(Err(e)),
                }
            }

            return Some(Err(TextError::at(&self.text, self.pos, "failed to tokenize")));
        }
    }
}

fn next_char_len(text: &str, pos: usize) -> usize {
    text[pos..].chars().next().map_or(1, |c| c.len_utf8())
}

/// Consume a run of `chars`, emitting nothing.
pub fn tok_whitespace(chars: &'static str) -> TokFn {
    Rc::new(move |text, pos| {
        let bytes = text.as_bytes();
        if pos >= bytes.len() || !chars.as_bytes().contains(&bytes[pos]) {
            return Ok(None);
        }
        let mut end = pos + 1;
        while end < bytes.len() && chars.as_bytes().contains(&bytes[end]) {
            end += 1;
        }
        Ok(Some((None, end)))
    })
}

/// Always emits the next single character as an untagged [TextRange]. Intended as the
/// final-stage catch-all.
pub fn tok_fallback() -> TokFn {
    Rc::new(|text, pos| {
        let end = pos + next_char_len(text, pos);
        Ok(Some((Some(TextRange::new(text, pos, end, None)), end)))
    })
}

/// Matches `re` (which must be anchored with `^`) at `pos`, emitting a [TextRange]
/// tagged `tag`.
pub fn tok_regex(re: Regex, tag: Option<&'static str>) -> TokFn {
    Rc::new(move |text, pos| match re.find(&text[pos..]) {
        Some(m) if m.start() == 0 => {
            let end = pos + m.end();
            if end == pos {
                return Err(TextError::at(
                    text,
                    pos,
                    format!("regular expression (tag={:?}) has 0-length match", tag),
                ));
            }
            Ok(Some((Some(TextRange::new(text, pos, end, tag)), end)))
        }
        _ => Ok(None),
    })
}
