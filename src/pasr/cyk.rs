//! The CYK-style matcher: productions restricted to at most two non-unit-length
//! elements, matched against an [AnnotatedNode] tree with a triangular match buffer
//! per list level.
//!
//! Grounded on `original_source/pasr/cyk.py`: `Tag`, `Production` (`cache_unitlengths`,
//! `produce`), `Match.AnnotatedNode` (`matches`/`addmatch`/`textrange`/`visitlists`),
//! `Match.forgreedymax`.

use crate::text::TextRange;
use crate::treeifier::Token;
use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A production or lexer tag name. Wraps a plain `Rc<str>` rather than the source's
/// distinction between bare-string (user-written) and `Tag`-wrapped (compiler-synthesized)
/// references: both compare equal by name content in Rust, and every synthesized name
/// (`foo:split:1`, `foo:nest2`, ...) is already unique, so value equality subsumes the
/// source's reliance on object identity for synthetic tags.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag(Rc<str>);

impl Tag {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Tag(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capture key/value map produced by a successful [Element::match_at]. Unlike `patre`'s
/// captures, every value is a flat [TextRange]: the CFG language has no list-capture
/// construct (its `$*` matches a span directly, with no repetition to accumulate over),
/// so there is no need for `patre::CaptureValue`'s richer enum here.
pub type Captures = HashMap<Rc<str>, TextRange>;

/// One element of a production's right-hand side.
pub trait Element {
    /// Whether this element always matches a span of exactly one token. Productions
    /// may have at most two elements for which this is `false` (§4.F).
    fn unit_length(&self) -> bool;

    fn match_at(&self, node: &AnnotatedNode, start: usize, end: usize) -> Option<Captures>;
}

/// Matches a single literal token by text and tag, grounded on `cyk.py`'s
/// `MatchTextRange`.
pub struct MatchTextRange(pub TextRange);

impl Element for MatchTextRange {
    fn unit_length(&self) -> bool {
        true
    }

    fn match_at(&self, node: &AnnotatedNode, start: usize, end: usize) -> Option<Captures> {
        if end != start + 1 {
            return None;
        }
        match node.token_at(start) {
            Token::Leaf(range) if range.as_str() == self.0.as_str() && range.tag() == self.0.tag() => {
                Some(Captures::new())
            }
            _ => None,
        }
    }
}

/// References another production (or a lexer tag) by name. `unit_length` defaults to
/// `false` (a non-terminal may span any number of tokens) but is forced to `true` by
/// the compiler when the reference stands for an already-fully-collapsed nested block,
/// which can only ever match its entire enclosing span (grounded on `compile.py`'s
/// post-construction `match.unitlength = True` override).
pub struct MatchNonTerminal {
    pub tag: Tag,
    pub unit_length: bool,
}

impl MatchNonTerminal {
    pub fn new(tag: Tag) -> Self {
        Self { tag, unit_length: false }
    }
}

impl Element for MatchNonTerminal {
    fn unit_length(&self) -> bool {
        self.unit_length
    }

    fn match_at(&self, node: &AnnotatedNode, start: usize, end: usize) -> Option<Captures> {
        node.matches(start, end)
            .iter()
            .find(|(tag, _)| *tag == self.tag)
            .map(|(_, kv)| kv.clone())
    }
}

/// Matches any span, including the empty one (`$*`).
pub struct MatchAnyStar;

impl Element for MatchAnyStar {
    fn unit_length(&self) -> bool {
        false
    }

    fn match_at(&self, _node: &AnnotatedNode, _start: usize, _end: usize) -> Option<Captures> {
        Some(Captures::new())
    }
}

/// Wraps another element, capturing the whole matched span's text range under `key`
/// on success (`X|key|`).
pub struct MatchStore {
    pub child: Box<dyn Element>,
    pub key: Rc<str>,
}

impl Element for MatchStore {
    fn unit_length(&self) -> bool {
        self.child.unit_length()
    }

    fn match_at(&self, node: &AnnotatedNode, start: usize, end: usize) -> Option<Captures> {
        let mut kv = self.child.match_at(node, start, end)?;
        kv.insert(Rc::clone(&self.key), node.text_range(start, end));
        Some(kv)
    }
}

/// A grammar production: a tag and a right-hand side of at most two non-unit-length
/// elements, with optional `at_start`/`at_end` anchoring (set after construction, as
/// in the source, since anchoring is a property of how a production is used rather
/// than of the production itself).
pub struct Production {
    pub tag: Tag,
    pub elements: Vec<Box<dyn Element>>,
    pub at_start: bool,
    pub at_end: bool,
    nonunit: Vec<usize>,
    span_lengths: Vec<usize>,
}

impl Production {
    /// Fails if `elements` has more than two non-unit-length members — productions
    /// restricted to that shape are exactly what CYK matching below relies on.
    /// Callers normalizing a larger pattern should go through `compile`'s
    /// `make_production`, which never hits this.
    pub fn new(tag: Tag, elements: Vec<Box<dyn Element>>) -> Result<Self, String> {
        let nonunit: Vec<usize> = (0..elements.len())
            .filter(|&i| !elements[i].unit_length())
            .collect();
        if nonunit.len() > 2 {
            return Err(format!(
                "production {} has {} non-unit-length elements, at most 2 are supported",
                tag,
                nonunit.len()
            ));
        }
        let span_lengths = match nonunit.len() {
            2 => vec![nonunit[0], nonunit[1] - nonunit[0] - 1, elements.len() - nonunit[1] - 1],
            1 => vec![nonunit[0], elements.len() - nonunit[0] - 1],
            _ => vec![elements.len()],
        };
        Ok(Self { tag, elements, at_start: false, at_end: false, nonunit, span_lengths })
    }

    /// For every gap between (or around) this production's non-unit-length elements,
    /// precomputes every `start` position at which the unit-length elements in that
    /// gap all match, along with their merged captures.
    pub fn cache_unit_lengths(&self, node: &AnnotatedNode) -> Vec<Vec<(usize, Captures)>> {
        let mut cache = Vec::with_capacity(self.nonunit.len() + 1);
        for span in 0..=self.nonunit.len() {
            let left = if span == 0 { 0 } else { self.nonunit[span - 1] + 1 };
            let right = if span == self.nonunit.len() {
                self.elements.len()
            } else {
                self.nonunit[span]
            };
            let needed = self.elements.len() - left;
            let mut entries = Vec::new();
            if needed <= node.len() {
                let upper_exclusive = node.len() - needed + 1;
                'start_loop: for start in left..upper_exclusive {
                    if self.at_start && span == 0 && start != 0 {
                        continue;
                    }
                    if self.at_end && span == self.nonunit.len() && start + (right - left) != node.len() {
                        continue;
                    }
                    let mut kv = Captures::new();
                    for idx in 0..(right - left) {
                        match self.elements[left + idx].match_at(node, start + idx, start + idx + 1) {
                            Some(sub) => kv.extend(sub),
                            None => continue 'start_loop,
                        }
                    }
                    entries.push((start, kv));
                }
            }
            cache.push(entries);
        }
        cache
    }

    /// Applies this production at every position where its total span is exactly
    /// `length` tokens, recording matches into `node`. Grounded on `cyk.py`'s `produce`,
    /// including its zero/one/two-non-unit-element cases and the "first middle wins"
    /// rule for the two-element case.
    pub fn produce(&self, node: &AnnotatedNode, length: usize, cache: &[Vec<(usize, Captures)>]) {
        if length < self.elements.len() {
            return;
        }

        if self.nonunit.is_empty() {
            if length == self.elements.len() {
                for (start, kv) in &cache[0] {
                    node.add_match(*start, start + length, self.tag.clone(), kv.clone());
                }
            }
            return;
        }

        let left_cache = &cache[0];
        let right_cache = &cache[cache.len() - 1];
        let right_offset = self.span_lengths[self.span_lengths.len() - 1] as isize - length as isize;

        let mut starts: Vec<(usize, Captures)> = Vec::new();
        let mut i = 0usize;
        let mut j = 0usize;
        while i < left_cache.len() && j < right_cache.len() {
            let left_start = left_cache[i].0 as isize;
            let right_start = right_cache[j].0 as isize + right_offset;
            if left_start < right_start {
                i += 1;
            } else if left_start > right_start {
                j += 1;
            } else {
                let mut kv = left_cache[i].1.clone();
                kv.extend(right_cache[j].1.clone());
                starts.push((left_start as usize, kv));
                i += 1;
                j += 1;
            }
        }

        if self.nonunit.len() == 1 {
            let nu = self.nonunit[0];
            let last_span = self.span_lengths[self.span_lengths.len() - 1];
            for (start, kv) in &starts {
                if let Some(sub) = self.elements[nu].match_at(node, start + nu, start + length - last_span) {
                    let mut kv = kv.clone();
                    kv.extend(sub);
                    node.add_match(*start, start + length, self.tag.clone(), kv);
                }
            }
        } else {
            let left = self.nonunit[0];
            let right = self.nonunit[1];
            for (start, kv) in &starts {
                for (mid, mid_kv) in &cache[1] {
                    if *mid <= start + left {
                        continue;
                    }
                    if mid + self.span_lengths[1] + 1 + self.span_lengths[2] > start + length {
                        continue;
                    }
                    let left_kv = match self.elements[left].match_at(node, start + left, *mid) {
                        Some(kv) => kv,
                        None => continue,
                    };
                    let right_kv = match self.elements[right]
                        .match_at(node, mid + self.span_lengths[1], start + length - self.span_lengths[2])
                    {
                        Some(kv) => kv,
                        None => continue,
                    };
                    let mut kv = kv.clone();
                    kv.extend(mid_kv.clone());
                    kv.extend(left_kv);
                    kv.extend(right_kv);
                    node.add_match(*start, start + length, self.tag.clone(), kv);
                    break;
                }
            }
        }
    }
}

fn leftmost_start(tok: &Token) -> usize {
    match tok {
        Token::Leaf(r) => r.start,
        Token::List(items) => items.first().map(leftmost_start).unwrap_or(0),
    }
}

fn rightmost_end(tok: &Token) -> usize {
    match tok {
        Token::Leaf(r) => r.end,
        Token::List(items) => items.last().map(rightmost_end).unwrap_or(0),
    }
}

fn any_leaf_text(tok: &Token) -> Option<Rc<str>> {
    match tok {
        Token::Leaf(r) => Some(r.text_rc()),
        Token::List(items) => items.iter().find_map(any_leaf_text),
    }
}

/// One level of a token tree annotated with its own triangular match buffer. Built
/// recursively: every `List` child gets its own nested `AnnotatedNode`, while `Leaf`
/// children stay bare (they never carry a matches buffer of their own — the source's
/// leaf-wrapping `AnnotatedNode` is vestigial, since nothing is ever matched against a
/// leaf directly; its own tag is read straight off the [Token]).
pub struct AnnotatedNode {
    tokens: Vec<Token>,
    children: Vec<Option<AnnotatedNode>>,
    matches: RefCell<Vec<Vec<(Tag, Captures)>>>,
}

impl AnnotatedNode {
    pub fn new(tokens: Vec<Token>) -> Self {
        let n = tokens.len();
        let children = tokens
            .iter()
            .map(|t| match t {
                Token::List(items) => Some(AnnotatedNode::new(items.clone())),
                Token::Leaf(_) => None,
            })
            .collect();
        let size = n * (n + 1) / 2;
        Self { tokens, children, matches: RefCell::new(vec![Vec::new(); size]) }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token_at(&self, idx: usize) -> &Token {
        &self.tokens[idx]
    }

    fn match_index(end: usize, start: usize) -> usize {
        (end * (end - 1)) / 2 + start
    }

    /// Every `(tag, captures)` pair recorded for the span `[start, end)`.
    pub fn matches(&self, start: usize, end: usize) -> Ref<'_, Vec<(Tag, Captures)>> {
        debug_assert!(start < end && end <= self.len());
        let idx = Self::match_index(end, start);
        Ref::map(self.matches.borrow(), |v| &v[idx])
    }

    pub fn add_match(&self, start: usize, end: usize, tag: Tag, kv: Captures) {
        let idx = Self::match_index(end, start);
        self.matches.borrow_mut()[idx].push((tag, kv));
    }

    /// The flanking position immediately before token `elt` (the end of its preceding
    /// opening-bracket leaf, if `elt` is itself a list; else the leaf's own start).
    pub fn text_start(&self, elt: usize) -> usize {
        match &self.tokens[elt] {
            Token::List(_) if elt > 0 => self.tokens[elt - 1]
                .as_leaf()
                .map(|r| r.end)
                .unwrap_or_else(|| leftmost_start(&self.tokens[elt])),
            Token::List(_) => leftmost_start(&self.tokens[elt]),
            Token::Leaf(r) => r.start,
        }
    }

    /// The flanking position immediately after token `elt`.
    pub fn text_end(&self, elt: usize) -> usize {
        match &self.tokens[elt] {
            Token::List(_) if elt + 1 < self.tokens.len() => self.tokens[elt + 1]
                .as_leaf()
                .map(|r| r.start)
                .unwrap_or_else(|| rightmost_end(&self.tokens[elt])),
            Token::List(_) => rightmost_end(&self.tokens[elt]),
            Token::Leaf(r) => r.end,
        }
    }

    /// The text range spanning tokens `[start, end)`. Any leaf under `self.tokens`
    /// anchors the shared source text (every `TextRange` parsed from one source text
    /// shares the same underlying `Rc<str>`, so which leaf is used doesn't matter).
    pub fn text_range(&self, start: usize, end: usize) -> TextRange {
        let start_pos = self.text_start(start);
        let end_pos = self.text_end(end - 1);
        let text_rc = self.tokens[start..end]
            .iter()
            .find_map(any_leaf_text)
            .or_else(|| self.tokens.iter().find_map(any_leaf_text))
            .expect("a non-empty token span anchors at least one leaf");
        TextRange::new(&text_rc, start_pos, end_pos, None)
    }

    /// Visits every nested list descendant bottom-up, then `self`.
    fn visit_lists(&self, productions: &[Production]) {
        for child in self.children.iter().flatten() {
            child.visit_lists(productions);
        }
        self.seed();
        let caches: Vec<Vec<Vec<(usize, Captures)>>> =
            productions.iter().map(|p| p.cache_unit_lengths(self)).collect();
        for length in 1..=self.len() {
            for (prod, cache) in productions.iter().zip(caches.iter()) {
                prod.produce(self, length, cache);
            }
        }
    }

    /// Seeds length-1 matches: a leaf's own lexer tag, or a list child's already-
    /// complete full-span matches promoted up as unit-length entries.
    fn seed(&self) {
        for (idx, tok) in self.tokens.iter().enumerate() {
            match tok {
                Token::Leaf(range) => {
                    if let Some(tag) = range.tag() {
                        self.add_match(idx, idx + 1, Tag::new(tag), Captures::new());
                    }
                }
                Token::List(_) => {
                    let child = self.children[idx].as_ref().unwrap();
                    if !child.is_empty() {
                        for (tag, kv) in child.matches(0, child.len()).iter() {
                            self.add_match(idx, idx + 1, tag.clone(), kv.clone());
                        }
                    }
                }
            }
        }
    }
}

/// The result of matching a set of productions against a token tree: every list
/// level's own match buffer, populated bottom-up.
pub struct Match {
    pub tree: AnnotatedNode,
}

impl Match {
    pub fn new(tokens: Vec<Token>, productions: &[Production]) -> Self {
        let tree = AnnotatedNode::new(tokens);
        tree.visit_lists(productions);
        Self { tree }
    }

    /// Greedily enumerates the longest non-overlapping matches of `tag`, left to
    /// right, recursing into nested lists where no match starts. Grounded on
    /// `cyk.py`'s `forgreedymax`.
    pub fn for_greedy_max(&self, tag: &Tag, mut callback: impl FnMut(&Captures)) {
        fn visit(node: &AnnotatedNode, tag: &Tag, callback: &mut impl FnMut(&Captures)) {
            let mut start = 0;
            while start < node.len() {
                let mut found_end: Option<usize> = None;
                for end in (start + 1..=node.len()).rev() {
                    let matches = node.matches(start, end);
                    if let Some((_, kv)) = matches.iter().find(|(t, _)| t == tag) {
                        callback(kv);
                        found_end = Some(end);
                        break;
                    }
                }
                match found_end {
                    Some(end) => start = end,
                    None => {
                        if let Some(child) = &node.children[start] {
                            visit(child, tag, callback);
                        }
                        start += 1;
                    }
                }
            }
        }
        visit(&self.tree, tag, &mut callback);
    }
}

/// Free-function alias matching the external-interface naming in the crate overview
/// (`for_greedy_max` as a standalone entry point alongside [Match]).
pub fn for_greedy_max(m: &Match, tag: &Tag, callback: impl FnMut(&Captures)) {
    m.for_greedy_max(tag, callback);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(text: &Rc<str>, start: usize, end: usize, tag: Option<&str>) -> Token {
        Token::Leaf(TextRange::new(text, start, end, tag))
    }

    fn id_production(name: &str) -> Production {
        let tag = Tag::new(name);
        Production::new(tag, vec![Box::new(MatchNonTerminal { tag: Tag::new("id"), unit_length: true })]).unwrap()
    }

    #[test]
    fn production_rejects_more_than_two_nonunit_elements() {
        let elements: Vec<Box<dyn Element>> = vec![
            Box::new(MatchAnyStar),
            Box::new(MatchAnyStar),
            Box::new(MatchAnyStar),
        ];
        assert!(Production::new(Tag::new("bad"), elements).is_err());
    }

    #[test]
    fn seeds_lexer_tags_as_unit_length_matches() {
        let text: Rc<str> = Rc::from("a");
        let tokens = vec![leaf(&text, 0, 1, Some("id"))];
        let node = AnnotatedNode::new(tokens);
        node.seed();
        let found = node.matches(0, 1);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, Tag::new("id"));
    }

    #[test]
    fn matches_a_literal_token_pair() {
        let text: Rc<str> = Rc::from("a b");
        let tokens = vec![leaf(&text, 0, 1, Some("id")), leaf(&text, 2, 3, Some("id"))];
        let productions = vec![id_production("single")];
        let m = Match::new(tokens, &productions);
        assert_eq!(m.tree.matches(0, 1).len(), 1);
        assert_eq!(m.tree.matches(1, 2).len(), 1);
    }

    #[test]
    fn greedy_max_prefers_the_longest_match_and_advances_past_it() {
        let text: Rc<str> = Rc::from("a a a");
        let tokens = vec![
            leaf(&text, 0, 1, Some("id")),
            leaf(&text, 2, 3, Some("id")),
            leaf(&text, 4, 5, Some("id")),
        ];
        let pair_tag = Tag::new("pair");
        let pair = Production::new(
            pair_tag.clone(),
            vec![
                Box::new(MatchNonTerminal { tag: Tag::new("id"), unit_length: true }),
                Box::new(MatchNonTerminal { tag: Tag::new("id"), unit_length: true }),
            ],
        )
        .unwrap();
        let m = Match::new(tokens, &[pair]);

        let mut seen = Vec::new();
        m.for_greedy_max(&pair_tag, |_| seen.push(()));
        assert_eq!(seen.len(), 1, "one non-overlapping pair fits in 3 tokens");
    }

    #[test]
    fn greedy_max_over_runs_of_a_finds_the_two_maximal_non_overlapping_runs() {
        let run_tag = Tag::new("run");

        let a_range = |text: &Rc<str>, start, end| MatchTextRange(TextRange::new(text, start, end, None));
        let text: Rc<str> = Rc::from("a");

        let base: Vec<Box<dyn Element>> = vec![Box::new(a_range(&text, 0, 1))];
        let base_production = Production::new(run_tag.clone(), base).unwrap();

        let recursive: Vec<Box<dyn Element>> = vec![
            Box::new(MatchNonTerminal { tag: run_tag.clone(), unit_length: false }),
            Box::new(a_range(&text, 0, 1)),
        ];
        let recursive_production = Production::new(run_tag.clone(), recursive).unwrap();

        let productions = vec![base_production, recursive_production];

        let full_text: Rc<str> = Rc::from("a a a b a a");
        let tokens = vec![
            leaf(&full_text, 0, 1, None),
            leaf(&full_text, 2, 3, None),
            leaf(&full_text, 4, 5, None),
            leaf(&full_text, 6, 7, None),
            leaf(&full_text, 8, 9, None),
            leaf(&full_text, 10, 11, None),
        ];
        let m = Match::new(tokens, &productions);

        let mut seen = 0;
        for_greedy_max(&m, &run_tag, |_| seen += 1);
        assert_eq!(seen, 2, "expected the two maximal runs 'a a a' and 'a a'");
    }

    #[test]
    fn nested_list_matches_are_promoted_into_the_parent_as_unit_length() {
        let text: Rc<str> = Rc::from("( a )");
        let inner_tokens = vec![leaf(&text, 2, 3, Some("id"))];
        let inner_tag = Tag::new("inner");
        let inner_prod = Production::new(
            inner_tag.clone(),
            vec![Box::new(MatchNonTerminal { tag: Tag::new("id"), unit_length: true })],
        )
        .unwrap();

        let tokens = vec![
            leaf(&text, 0, 1, None),
            Token::List(inner_tokens),
            leaf(&text, 4, 5, None),
        ];
        let m = Match::new(tokens, &[inner_prod]);
        let promoted = m.tree.matches(1, 2);
        assert!(promoted.iter().any(|(tag, _)| *tag == inner_tag));
    }
}
