//! Text ranges, position formatting, and the text-edit buffer.
//!
//! Grounded on `original_source/patre/text.py`: [TextRange] is the token
//! representation both pattern engines share, [TextError] carries a formatted
//! position, and [Editor] batches `insert`/`erase` operations for later
//! application.

use crate::util::Code;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

/// Line number (1-based) of `pos` in `text`.
pub fn line_from_pos(text: &str, pos: usize) -> usize {
    text.as_bytes()[..pos].iter().filter(|&&b| b == b'\n').count() + 1
}

/// Column number (1-based) of `pos` in `text`, counting characters since the
/// last newline (or the start of `text` if there is none before `pos`).
pub fn col_from_pos(text: &str, pos: usize) -> usize {
    let start = match text[..pos].rfind('\n') {
        Some(i) => i + 1,
        None => 0,
    };
    text[start..pos].chars().count() + 1
}

/// Formats `"L:C"`, both 1-based.
pub fn where_from_pos(text: &str, pos: usize) -> String {
    format!("{}:{}", line_from_pos(text, pos), col_from_pos(text, pos))
}

/// A slice of source text, optionally tagged by the tokenizer rule that produced it.
///
/// Cheaply clonable: the underlying text is held behind an `Rc<str>` so ranges can be
/// freely shared between the token tree, NFA captures and CYK matches without
/// lifetime threading. Two ranges compare equal by **lexical content plus tag**, not
/// by their offsets.
#[derive(Clone)]
pub struct TextRange {
    text: Rc<str>,
    pub start: usize,
    pub end: usize,
    pub tag: Option<Rc<str>>,
}

impl TextRange {
    pub fn new(text: &Rc<str>, start: usize, end: usize, tag: Option<&str>) -> Self {
        debug_assert!(start <= end);
        Self {
            text: Rc::clone(text),
            start,
            end,
            tag: tag.map(Rc::from),
        }
    }

    /// The slice of source text this range denotes.
    pub fn as_str(&self) -> &str {
        &self.text[self.start..self.end]
    }

    /// The full underlying source text this range was cut from (used for position
    /// formatting in error messages).
    pub fn source(&self) -> &str {
        &self.text
    }

    /// A cheap clone of the shared handle to the full underlying source text, for
    /// constructing new ranges over the same text (e.g. NFA range captures).
    pub fn text_rc(&self) -> Rc<str> {
        Rc::clone(&self.text)
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag.as_deref() == Some(tag)
    }
}

impl PartialEq for TextRange {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str() && self.tag() == other.tag()
    }
}
impl Eq for TextRange {}

impl Debug for TextRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.tag() {
            Some(tag) => write!(f, "<{}:{:?}>", self.as_str(), tag),
            None => write!(f, "<{}>", self.as_str()),
        }
    }
}

impl Display for TextRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A syntactic error in input text or pattern text, carrying a pre-formatted position.
#[derive(Debug, Clone)]
pub struct TextError {
    message: String,
}

impl TextError {
    pub fn new(code: &Code, pos: usize, msg: impl Into<String>) -> Self {
        Self {
            message: format!("{}: {}", code.obtain_position(pos), msg.into()),
        }
    }

    /// Build directly from raw text rather than a [Code], for callers that have not
    /// constructed one yet (e.g. mid-tokenization).
    pub fn at(text: &str, pos: usize, msg: impl Into<String>) -> Self {
        Self {
            message: format!("{}: {}", where_from_pos(text, pos), msg.into()),
        }
    }
}

impl Display for TextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TextError: {}", self.message)
    }
}

/// Batches `insert`/`erase` operations and applies them to a text in one left-to-right
/// pass. Erases win ties against inserts at the same position; an insert whose
/// position falls strictly inside an erased span is emitted at the erase's left edge.
#[derive(Default)]
pub struct Editor {
    inserts: Vec<(usize, String)>,
    erases: Vec<(usize, usize)>,
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, where_: usize, what: impl Into<String>) {
        self.inserts.push((where_, what.into()));
    }

    pub fn erase(&mut self, start: usize, end: usize) {
        debug_assert!(start <= end);
        self.erases.push((start, end));
    }

    pub fn apply(&self, text: &str) -> String {
        let mut erases = self.erases.clone();
        erases.sort_by_key(|(s, _)| *s);

        let mut inserts = self.inserts.clone();
        for (pos, _) in inserts.iter_mut() {
            if let Some((s, _)) = erases.iter().find(|(s, e)| *pos > *s && *pos < *e) {
                *pos = *s;
            }
        }
        inserts.sort_by_key(|(p, _)| *p);

        let mut out = String::new();
        let mut where_ = 0usize;
        let mut ii = 0usize;
        let mut ei = 0usize;
        loop {
            let next_erase = erases.get(ei).map(|(s, _)| *s);
            let next_insert = inserts.get(ii).map(|(p, _)| *p);

            match (next_erase, next_insert) {
                (None, None) => {
                    out.push_str(&text[where_..]);
                    break;
                }
                (Some(s), next_insert) if next_insert.map_or(true, |p| s <= p) => {
                    let s = s.max(where_);
                    out.push_str(&text[where_..s]);
                    where_ = erases[ei].1.max(where_);
                    ei += 1;
                }
                (_, Some(p)) => {
                    let p = p.max(where_);
                    out.push_str(&text[where_..p]);
                    out.push_str(&inserts[ii].1);
                    where_ = where_.max(p);
                    ii += 1;
                }
                _ => unreachable!(),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_from_pos_reports_one_one_before_any_newline() {
        assert_eq!(where_from_pos("int x", 0), "1:1");
    }

    #[test]
    fn where_from_pos_reports_one_based_col_with_no_preceding_newline() {
        let text = "int x = 42;";
        assert_eq!(where_from_pos(text, 4), "1:5");
    }

    #[test]
    fn where_from_pos_resets_column_after_newline() {
        let text = "abc\ndef";
        assert_eq!(where_from_pos(text, 5), "2:2");
    }

    #[test]
    fn text_range_equality_ignores_offsets() {
        let text: Rc<str> = Rc::from("foo foo");
        let a = TextRange::new(&text, 0, 3, Some("id"));
        let b = TextRange::new(&text, 4, 7, Some("id"));
        assert_eq!(a, b);
    }

    #[test]
    fn text_range_inequality_on_tag() {
        let text: Rc<str> = Rc::from("foo foo");
        let a = TextRange::new(&text, 0, 3, Some("id"));
        let b = TextRange::new(&text, 4, 7, None);
        assert_ne!(a, b);
    }

    #[test]
    fn editor_with_no_ops_returns_input_unchanged() {
        let editor = Editor::new();
        assert_eq!(editor.apply("hello world"), "hello world");
    }

    #[test]
    fn editor_applies_non_overlapping_insert_and_erase() {
        let mut editor = Editor::new();
        editor.insert(0, "say ");
        editor.erase(4, 10);
        assert_eq!(editor.apply("hello world"), "say world");
    }

    #[test]
    fn editor_erase_wins_tie_against_insert() {
        let mut editor = Editor::new();
        editor.erase(5, 11);
        editor.insert(5, "!!!");
        assert_eq!(editor.apply("hello world"), "hello!!!");
    }

    #[test]
    fn editor_clamps_insert_inside_erased_span_to_left_edge() {
        let mut editor = Editor::new();
        editor.erase(0, 11);
        editor.insert(5, "mid");
        assert_eq!(editor.apply("hello world"), "mid");
    }

    #[test]
    fn editor_commutes_two_non_overlapping_edits() {
        let mut a = Editor::new();
        a.insert(0, "// ");
        a.erase(8, 11);

        let mut b = Editor::new();
        b.erase(8, 11);
        b.insert(0, "// ");

        let text = "int x = 42;";
        assert_eq!(a.apply(text), b.apply(text));
    }
}
