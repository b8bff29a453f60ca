//! Compiles the escape-prefixed pattern language to an [Nfa].
//!
//! Grounded on `original_source/patre/compile.py`: `readuntil`, `do_subexpr`,
//! `do_compile_maketree`'s `escape` closure, `do_compile_transitions`, and the
//! top-level `compile`. The closure's mutable `escaped` flag (tracking the two-step
//! `$$` dance) is folded into a single lookahead here rather than threaded as hidden
//! state across calls.
//!
//! Pattern text is tokenized by the *target* tokenizer (`options.tokenizer`), with
//! escape-sequence parsing spliced in ahead of every normal rule — exactly the
//! override mechanism [crate::tokenizer::Tokenizer::tokenize] exists for. Unlike a
//! normal override, though, an escape sequence doesn't just emit a [TextRange]: it
//! mutates the [Nfa] directly and yields a pair of already-wired states. That can't
//! fit through `TokFn`'s `TextRange`-shaped return, so pattern compilation runs its
//! own small tokenize-and-nest loop (`compile_maketree`) instead of going through
//! [crate::treeifier::Treeifier].

use super::nfa::{
    nfa_any, nfa_list, nfa_not, nfa_tag, nfa_token, CaptureEffect, Nfa, StackOp, StateId,
};
use super::{Options, PatreError};
use crate::text::{TextError, TextRange};
use std::rc::Rc;

/// One element of a pattern's own token tree: a literal token to match, a bracketed
/// group (matched as a nested `nfa_list`), or an escape sequence already compiled to
/// a wired `(start, end)` span spliced directly into the surrounding chain.
enum PatternItem {
    Literal(TextRange),
    Group(Vec<PatternItem>),
    Compiled(StateId, StateId),
}

fn read_until(text: &str, pos: usize, delim: char) -> Result<(String, usize), TextError> {
    match text[pos..].find(delim) {
        Some(i) => Ok((text[pos..pos + i].to_string(), pos + i + delim.len_utf8())),
        None => Err(TextError::at(
            text,
            pos,
            format!("no delimiting '{}' found", delim),
        )),
    }
}

/// Compiles a `{tag}` reference (named sub-pattern if registered, else a bare tag
/// match) or a `(...)` parenthesized sub-expression, returning the end state the
/// caller should chain from.
fn do_subexpr(
    nfa: &mut Nfa,
    start_state: StateId,
    text: &Rc<str>,
    pos: usize,
    options: &Options,
) -> Result<(StateId, usize), TextError> {
    match text.as_bytes()[pos] {
        b'{' => {
            let (tag, new_pos) = read_until(text, pos + 1, '}')?;
            if let Some((sub_nfa, sub_start, sub_end)) = options.tags.get(&tag) {
                let map = nfa.insert(sub_nfa);
                nfa.transition(start_state, map[sub_start], None);
                Ok((map[sub_end], new_pos))
            } else {
                let end_state = nfa.new_state();
                nfa.transition(start_state, end_state, Some(nfa_tag(&tag)));
                Ok((end_state, new_pos))
            }
        }
        b'(' => {
            let (tree, new_pos) = compile_maketree(nfa, text, pos + 1, Some(")"), options)?;
            let end_state = compile_transitions(nfa, start_state, &tree, options)?;
            Ok((end_state, new_pos))
        }
        _ => Err(TextError::at(text, pos, "expected '{' or '(' here")),
    }
}

/// Tries to parse one escape sequence at `pos`. `Ok(None)` means `text[pos]` is not
/// the escape character at all, so the caller should fall through to the host
/// tokenizer. A matched `$$` (literal escape character) is resolved here too, by
/// delegating the literal character right after it to the host tokenizer.
fn try_escape(
    nfa: &mut Nfa,
    text: &Rc<str>,
    pos: usize,
    options: &Options,
) -> Result<Option<(PatternItem, usize)>, TextError> {
    let bytes = text.as_bytes();
    if pos >= bytes.len() || bytes[pos] != options.escape as u8 {
        return Ok(None);
    }
    let p = pos + 1;
    if p >= bytes.len() {
        return Err(TextError::at(text, pos, "dangling escape character"));
    }

    if bytes[p] == options.escape as u8 {
        let mut iter = options.tokenizer.tokenize(Rc::clone(text), p, None);
        return match iter.next() {
            Some(Ok(range)) => {
                let end = range.end;
                Ok(Some((PatternItem::Literal(range), end)))
            }
            Some(Err(e)) => Err(e),
            None => Err(TextError::at(text, pos, "dangling escape character")),
        };
    }

    let start_state = nfa.new_state();
    let c = bytes[p] as char;

    if c == '<' || c == '>' {
        let prev = c == '<';
        if bytes.get(p + 1) != Some(&b'|') {
            return Err(TextError::at(text, p, "expected '|' after anchor"));
        }
        let (tag, new_p) = read_until(text, p + 2, '|')?;
        let end_state = nfa.new_state();
        let t = nfa.transition(start_state, end_state, None);
        let effect = CaptureEffect::Anchor(Rc::from(tag.as_str()));
        if prev {
            t.prev_capture = Some(effect);
        } else {
            t.next_capture = Some(effect);
        }
        return Ok(Some((PatternItem::Compiled(start_state, end_state), new_p)));
    }

    let mut p = p;
    let mut negate = false;
    if bytes[p] == b'!' {
        negate = true;
        p += 1;
    }

    let (mut start_state, mut end_state, mut p) = match bytes[p] as char {
        '{' | '(' => {
            let (es, np) = do_subexpr(nfa, start_state, text, p, options)?;
            (start_state, es, np)
        }
        '.' => {
            let es = nfa.new_state();
            nfa.transition(start_state, es, Some(nfa_any()));
            (start_state, es, p + 1)
        }
        '|' => {
            let mut pp = p + 1;
            let es = nfa.new_state();
            let mut prio = 0;
            while pp < bytes.len() && (bytes[pp] == b'{' || bytes[pp] == b'(') {
                let (sub_end, np) = do_subexpr(nfa, start_state, text, pp, options)?;
                let t = nfa.transition(sub_end, es, None);
                t.priority = prio;
                prio += 1;
                pp = np;
            }
            (start_state, es, pp)
        }
        other => {
            return Err(TextError::at(
                text,
                p,
                format!("unknown escape character '{}'", other),
            ))
        }
    };

    if negate {
        let new_start = nfa.new_state();
        let new_end = nfa.new_state();
        nfa.transition(new_start, new_end, Some(nfa_not(start_state, end_state)));
        start_state = new_start;
        end_state = new_end;
    }

    if p < bytes.len() && (bytes[p] == b'*' || bytes[p] == b'+') {
        let star = bytes[p] == b'*';
        p += 1;
        let repeat_ref = if p < bytes.len() && (bytes[p] == b'{' || bytes[p] == b'(') {
            let (sep_end, new_p) = do_subexpr(nfa, end_state, text, p, options)?;
            p = new_p;
            nfa.transition_ref(sep_end, start_state, None)
        } else {
            nfa.transition_ref(end_state, start_state, None)
        };
        if star {
            nfa.transition(start_state, end_state, None);
        }
        if p < bytes.len() && bytes[p] == b'[' {
            let (key, new_p) = read_until(text, p + 1, ']')?;
            p = new_p;
            let new_start = nfa.new_state();
            let new_end = nfa.new_state();
            let key: Rc<str> = Rc::from(key.as_str());
            nfa.transition(new_start, start_state, None).stack = Some(StackOp::Push(Rc::clone(&key)));
            nfa.transition(end_state, new_end, None).stack = Some(StackOp::Pop(Rc::clone(&key)));
            nfa.get_transition_mut(repeat_ref).stack = Some(StackOp::Store(key));
            start_state = new_start;
            end_state = new_end;
        }
    }

    if p < bytes.len() && bytes[p] == b'|' {
        let (key, new_p) = read_until(text, p + 1, '|')?;
        p = new_p;
        let key: Rc<str> = Rc::from(key.as_str());

        let new_start = nfa.new_state();
        nfa.transition(new_start, start_state, None).next_capture =
            Some(CaptureEffect::RangeStart(Rc::clone(&key)));
        start_state = new_start;

        let new_end = nfa.new_state();
        nfa.transition(end_state, new_end, None).prev_capture = Some(CaptureEffect::RangeEnd(key));
        end_state = new_end;
    }

    Ok(Some((PatternItem::Compiled(start_state, end_state), p)))
}

/// Tokenizes and nests a pattern's literal spans the way [crate::treeifier::Treeifier]
/// nests ordinary source text, but with escape sequences spliced in ahead of every
/// token and producing [PatternItem::Compiled] spans rather than leaves. See the
/// module doc comment for why this can't just reuse `Treeifier`.
fn compile_maketree(
    nfa: &mut Nfa,
    text: &Rc<str>,
    mut pos: usize,
    close: Option<&str>,
    options: &Options,
) -> Result<(Vec<PatternItem>, usize), TextError> {
    let mut list_stack: Vec<Vec<PatternItem>> = vec![Vec::new()];
    let mut close_stack: Vec<Option<String>> = vec![close.map(String::from)];

    while pos < text.len() {
        if let Some((item, new_pos)) = try_escape(nfa, text, pos, options)? {
            list_stack.last_mut().unwrap().push(item);
            pos = new_pos;
            continue;
        }

        let mut iter = options.tokenizer.tokenize(Rc::clone(text), pos, None);
        let tok = match iter.next() {
            Some(result) => result?,
            None => break,
        };
        pos = tok.end;

        let s = tok.as_str().to_string();
        let mut matched_paren = false;
        for (open, closer) in &options.parens {
            if &s == open {
                list_stack.last_mut().unwrap().push(PatternItem::Literal(tok.clone()));
                list_stack.push(Vec::new());
                close_stack.push(Some(closer.clone()));
                matched_paren = true;
                break;
            } else if &s == closer {
                if close_stack.last().unwrap().as_deref() != Some(s.as_str()) {
                    return Err(TextError::at(
                        text,
                        tok.start,
                        format!("unexpected closing '{}'", s),
                    ));
                }
                if list_stack.len() == 1 {
                    return Ok((list_stack.pop().unwrap(), pos));
                }
                let finished = list_stack.pop().unwrap();
                close_stack.pop();
                list_stack.last_mut().unwrap().push(PatternItem::Group(finished));
                list_stack.last_mut().unwrap().push(PatternItem::Literal(tok.clone()));
                matched_paren = true;
                break;
            }
        }
        if !matched_paren {
            list_stack.last_mut().unwrap().push(PatternItem::Literal(tok));
        }
    }

    if list_stack.len() > 1 {
        return Err(TextError::at(text, pos, "unclosed group in pattern"));
    }
    Ok((list_stack.pop().unwrap(), pos))
}

/// Chains a pattern's own token tree into transitions from `start_state`, returning
/// the resulting end state. A literal token becomes an `nfa_token` match, a bracketed
/// group becomes a nested `nfa_list` match, and an already-compiled escape span is
/// spliced in directly.
fn compile_transitions(
    nfa: &mut Nfa,
    start_state: StateId,
    tree: &[PatternItem],
    options: &Options,
) -> Result<StateId, TextError> {
    let mut current = start_state;
    for item in tree {
        match item {
            PatternItem::Literal(range) => {
                let next = nfa.new_state();
                nfa.transition(current, next, Some(nfa_token(range.as_str())));
                current = next;
            }
            PatternItem::Group(children) => {
                let inner_start = nfa.new_state();
                let inner_end = compile_transitions(nfa, inner_start, children, options)?;
                let next = nfa.new_state();
                nfa.transition(current, next, Some(nfa_list(inner_start, inner_end)));
                current = next;
            }
            PatternItem::Compiled(s, e) => {
                nfa.transition(current, *s, None);
                current = *e;
            }
        }
    }
    Ok(current)
}

/// Compiles `pattern` into `nfa`, returning the `(start, end)` pair of its wired
/// states. Taking an existing `Nfa` (rather than building a fresh one) lets callers
/// compile several related patterns into one shared state pool, and matches a named
/// sub-pattern's own compiled states being inlined into a referencing pattern's `Nfa`
/// via [Nfa::insert].
pub fn compile(
    nfa: &mut Nfa,
    pattern: &str,
    options: &Options,
) -> Result<(StateId, StateId), PatreError> {
    let text: Rc<str> = Rc::from(pattern);
    let start_state = nfa.new_state();
    let (tree, _) = compile_maketree(nfa, &text, 0, None, options)?;
    let end_state = compile_transitions(nfa, start_state, &tree, options)?;
    Ok((start_state, end_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::treeifier::Token;

    fn leaf(text: &Rc<str>, start: usize, end: usize, tag: Option<&str>) -> Token {
        Token::Leaf(TextRange::new(text, start, end, tag))
    }

    #[test]
    fn compiles_a_literal_token() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "foo", &options).unwrap();

        let text: Rc<str> = Rc::from("foo");
        let tree = vec![leaf(&text, 0, 3, None)];
        let result = nfa.simulate(&tree, start, None, None, None);
        assert!(result.contains_key(&end));
    }

    #[test]
    fn compiles_a_tag_reference() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "${id}", &options).unwrap();

        let text: Rc<str> = Rc::from("foo");
        let tree = vec![leaf(&text, 0, 3, Some("id"))];
        let result = nfa.simulate(&tree, start, None, None, None);
        assert!(result.contains_key(&end));
    }

    #[test]
    fn compiles_any_token_escape() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "$.", &options).unwrap();

        let text: Rc<str> = Rc::from("x");
        let tree = vec![leaf(&text, 0, 1, None)];
        let result = nfa.simulate(&tree, start, None, None, None);
        assert!(result.contains_key(&end));
    }

    #[test]
    fn compiles_star_repetition() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "${id}*", &options).unwrap();

        let text: Rc<str> = Rc::from("a b c");
        let tree = vec![
            leaf(&text, 0, 1, Some("id")),
            leaf(&text, 2, 3, Some("id")),
            leaf(&text, 4, 5, Some("id")),
        ];
        let result = nfa.simulate(&tree, start, None, None, None);
        assert!(result.contains_key(&end));

        let empty: Vec<Token> = vec![];
        let result_empty = nfa.simulate(&empty, start, None, None, None);
        assert!(result_empty.contains_key(&end));
    }

    #[test]
    fn compiles_list_capture_over_plus_repetition() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "${id}+[items]", &options).unwrap();

        let text: Rc<str> = Rc::from("a b");
        let tree = vec![leaf(&text, 0, 1, Some("id")), leaf(&text, 2, 3, Some("id"))];
        let result = nfa.simulate(&tree, start, None, None, None);
        let branch = result.get(&end).unwrap();
        match branch.captures.get("items").unwrap() {
            super::super::nfa::CaptureValue::List(items) => assert_eq!(items.len(), 2),
            _ => panic!("expected a list capture"),
        }
    }

    #[test]
    fn compiles_range_capture() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "${id}|name|", &options).unwrap();

        let text: Rc<str> = Rc::from("foo");
        let tree = vec![leaf(&text, 0, 3, Some("id"))];
        let result = nfa.simulate(&tree, start, None, None, None);
        let branch = result.get(&end).unwrap();
        match branch.captures.get("name").unwrap() {
            super::super::nfa::CaptureValue::Range(r) => assert_eq!(r.as_str(), "foo"),
            _ => panic!("expected a range capture"),
        }
    }

    #[test]
    fn compiles_priority_alternation_preferring_the_first_branch() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "$||{id}{num}", &options).unwrap();

        let text: Rc<str> = Rc::from("foo");
        let tree = vec![leaf(&text, 0, 3, Some("id"))];
        let result = nfa.simulate(&tree, start, None, None, None);
        assert!(result.contains_key(&end));
    }

    /// Both branches here match the same single `id` token, so they become live at
    /// once and both race an epsilon into the shared end state — unlike
    /// `compiles_priority_alternation_preferring_the_first_branch`, where the second
    /// branch never becomes live at all. The lower-priority (first) branch's capture
    /// must be the one that survives the collision.
    #[test]
    fn priority_alternation_resolves_a_simultaneous_collision_in_favor_of_the_lower_priority_branch() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "$||(${id}|a|)(${id}|b|)", &options).unwrap();

        let text: Rc<str> = Rc::from("foo");
        let tree = vec![leaf(&text, 0, 3, Some("id"))];

        for _ in 0..20 {
            let result = nfa.simulate(&tree, start, None, None, None);
            let branch = result.get(&end).expect("either branch should reach the end state");
            assert!(branch.captures.contains_key("a"), "lower-priority branch should win the collision");
            assert!(!branch.captures.contains_key("b"), "higher-priority branch should lose the collision");
        }
    }

    #[test]
    fn compiles_negated_lookahead() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "$!{id}", &options).unwrap();

        let text: Rc<str> = Rc::from("1 foo");
        let tree_num = vec![leaf(&text, 0, 1, Some("num"))];
        let result_num = nfa.simulate(&tree_num, start, None, None, None);
        assert!(result_num.contains_key(&end));

        let tree_id = vec![leaf(&text, 2, 5, Some("id"))];
        let result_id = nfa.simulate(&tree_id, start, None, None, None);
        assert!(!result_id.contains_key(&end));
    }

    #[test]
    fn literal_grouping_parens_compile_to_a_list_match() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "f(${id})", &options).unwrap();

        let text: Rc<str> = Rc::from("f ( a )");
        let inner = vec![leaf(&text, 4, 5, Some("id"))];
        let tree = vec![
            leaf(&text, 0, 1, None),
            leaf(&text, 2, 3, None),
            Token::List(inner),
            leaf(&text, 6, 7, None),
        ];
        let result = nfa.simulate(&tree, start, None, None, None);
        assert!(result.contains_key(&end));
    }

    #[test]
    fn double_escape_matches_a_literal_escape_character() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "$$", &options).unwrap();

        let text: Rc<str> = Rc::from("$");
        let tree = vec![leaf(&text, 0, 1, None)];
        let result = nfa.simulate(&tree, start, None, None, None);
        assert!(result.contains_key(&end));
    }

    #[test]
    fn star_repetition_over_a_pattern_matches_the_empty_token_tree() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "${id}*", &options).unwrap();

        let empty: Vec<Token> = vec![];
        let result = nfa.simulate(&empty, start, None, None, None);
        assert!(result.contains_key(&end));
    }

    #[test]
    fn repetition_with_separator_accumulates_a_range_capture_per_iteration() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "${id}|x|*(,)[items]", &options).unwrap();

        let text: Rc<str> = Rc::from("a , b , c");
        let tree = vec![
            leaf(&text, 0, 1, Some("id")),
            leaf(&text, 2, 3, None),
            leaf(&text, 4, 5, Some("id")),
            leaf(&text, 6, 7, None),
            leaf(&text, 8, 9, Some("id")),
        ];
        let result = nfa.simulate(&tree, start, None, None, None);
        let branch = result.get(&end).expect("pattern should reach its end state");
        let items = match branch.captures.get("items").unwrap() {
            super::super::nfa::CaptureValue::List(items) => items,
            _ => panic!("expected a list capture"),
        };
        assert_eq!(items.len(), 3);
        let bound: Vec<&str> = items
            .iter()
            .map(|kv| match kv.get("x").unwrap() {
                super::super::nfa::CaptureValue::Range(r) => r.as_str(),
                _ => panic!("expected a range capture"),
            })
            .collect();
        assert_eq!(bound, vec!["a", "b", "c"]);
    }

    #[test]
    fn treeifying_and_simulating_a_bracketed_call_round_trips_through_the_host_tokenizer() {
        let options = Options::default();
        let mut nfa = Nfa::new();
        let (start, end) = compile(&mut nfa, "f(${id})", &options).unwrap();

        let text: Rc<str> = Rc::from("f ( a )");
        let tokens = options.tokenizer.tokenize(Rc::clone(&text), 0, None);
        let tree = crate::cpp::treeifier().make_tree(tokens, None).unwrap();

        let result = nfa.simulate(&tree, start, None, None, None);
        assert!(result.contains_key(&end));
    }
}
