//! Compiles the grammar-like pattern language to a `Vec<Production>`.
//!
//! Grounded on `original_source/pasr/compile.py`: the `MatchTextRange`/`MatchNonTerminal`/
//! `MatchAnyStar`/`MatchStore` element constructors, `make_production`'s split-to-chain
//! normalization, and the top-level `compile`'s escape closure plus its nested-block
//! flattening walk.
//!
//! As in `patre::compile` (see that module's doc comment), an escape sequence here
//! doesn't just emit a `TextRange` — it builds an [Element] trait object, and a
//! recursive `$(=...=)` sub-pattern recursively calls [compile] itself, extending the
//! running `productions` list. Both can't fit through [crate::tokenizer::TokFn]'s
//! `TextRange`-shaped return, so pattern compilation runs its own tokenize-and-nest
//! loop (`compile_maketree`) exactly as `patre::compile` does, rather than going
//! through [crate::treeifier::Treeifier]. The source's nested-block flattening is an
//! explicit three-stack walk (`eltstack`/`pos`/`blocks`); here it's natural recursion
//! over the already-built [PatternItem] tree (`flatten_elements`) instead.

use super::cyk::{Element, MatchAnyStar, MatchNonTerminal, MatchStore, MatchTextRange, Production, Tag};
use super::{Options, PasrError};
use crate::text::{TextError, TextRange};
use crate::tokenizer::Tokenizer;
use crate::treeifier::Treeifier;
use std::rc::Rc;

/// One element of a pattern's own token tree: a literal token to match, a bracketed
/// group (flattened into its own nested production), or an escape sequence already
/// compiled into a matcher [Element].
enum PatternItem {
    Literal(TextRange),
    Group(Vec<PatternItem>),
    Compiled(Box<dyn Element>),
}

/// Shared, read-only compilation context.
struct Ctx<'o> {
    tokenizer: &'o Tokenizer,
    parens: &'o [(String, String)],
    options: &'o Options,
}

/// Mutable state threaded through one top-level `compile` call: every production
/// built so far (including by recursive `$(=...=)` sub-compiles) and the counter
/// shared by both `:rec` (recursive sub-pattern) and `:nest` (bracket-group
/// collapse) synthetic tag names.
struct State {
    productions: Vec<Production>,
    nest_counter: usize,
}

/// Tries to parse one escape sequence at `pos`. `Ok(None)` means `text[pos]` is not
/// the escape character, so the caller should fall through to the host tokenizer.
fn try_escape(
    ctx: &Ctx,
    state: &mut State,
    tag: &Tag,
    text: &Rc<str>,
    pos: usize,
) -> Result<Option<(PatternItem, usize)>, TextError> {
    let bytes = text.as_bytes();
    if pos >= bytes.len() || bytes[pos] != ctx.options.escape as u8 {
        return Ok(None);
    }
    let p = pos + 1;
    if p >= bytes.len() {
        return Err(TextError::at(text, pos, "dangling escape character"));
    }

    if bytes[p] == ctx.options.escape as u8 {
        let mut iter = ctx.tokenizer.tokenize(Rc::clone(text), p, None);
        return match iter.next() {
            Some(Ok(range)) => {
                let end = range.end;
                Ok(Some((PatternItem::Literal(range), end)))
            }
            Some(Err(e)) => Err(e),
            None => Err(TextError::at(text, pos, "dangling escape character")),
        };
    }

    let (mut element, mut p): (Box<dyn Element>, usize) = match bytes[p] as char {
        '(' => {
            let mut pp = p + 1;
            if pp < bytes.len() && (bytes[pp] == b'=' || bytes[pp] == b'(') {
                let eq_start = pp;
                while pp < bytes.len() && bytes[pp] == b'=' {
                    pp += 1;
                }
                if bytes.get(pp) != Some(&b'(') {
                    return Err(TextError::at(text, pp, "bad recursive match opening"));
                }
                let nrequals = pp - eq_start;
                pp += 1;
                let closer = format!("){}{}", "=".repeat(nrequals), ")");
                let end = match text[pp..].find(&closer) {
                    Some(i) => pp + i,
                    None => return Err(TextError::at(text, pp, "recursive match not closed")),
                };

                state.nest_counter += 1;
                let subtag = Tag::new(format!("{}:rec{}", tag, state.nest_counter));
                compile_into(ctx, state, subtag.clone(), &text[pp..end])?;

                let element: Box<dyn Element> = Box::new(MatchNonTerminal::new(subtag));
                (element, end + closer.len())
            } else {
                let end = match text[pp..].find(')') {
                    Some(i) => pp + i,
                    None => return Err(TextError::at(text, pp, "unclosed $(...)")),
                };
                let name = &text[pp..end];
                let element: Box<dyn Element> = Box::new(MatchNonTerminal::new(Tag::new(name)));
                (element, end + 1)
            }
        }
        '*' => {
            let element: Box<dyn Element> = Box::new(MatchAnyStar);
            (element, p + 1)
        }
        other => {
            return Err(TextError::at(
                text,
                p,
                format!("unknown escape sequence '{}'", other),
            ))
        }
    };

    if p < bytes.len() && bytes[p] == b'|' {
        let end = match text[p + 1..].find('|') {
            Some(i) => p + 1 + i,
            None => return Err(TextError::at(text, p, "unclosed escape matcher |...|")),
        };
        let key: Rc<str> = Rc::from(&text[p + 1..end]);
        element = Box::new(MatchStore { child: element, key });
        p = end + 1;
    }

    Ok(Some((PatternItem::Compiled(element), p)))
}

/// Tokenizes and nests a pattern's literal spans the way [Treeifier] nests ordinary
/// source text, with escape-sequence parsing spliced in ahead of every token. See the
/// module doc comment for why this can't just reuse [Treeifier].
fn compile_maketree(
    ctx: &Ctx,
    state: &mut State,
    tag: &Tag,
    text: &Rc<str>,
    mut pos: usize,
    close: Option<&str>,
) -> Result<(Vec<PatternItem>, usize), TextError> {
    let mut list_stack: Vec<Vec<PatternItem>> = vec![Vec::new()];
    let mut close_stack: Vec<Option<String>> = vec![close.map(String::from)];

    while pos < text.len() {
        if let Some((item, new_pos)) = try_escape(ctx, state, tag, text, pos)? {
            list_stack.last_mut().unwrap().push(item);
            pos = new_pos;
            continue;
        }

        let mut iter = ctx.tokenizer.tokenize(Rc::clone(text), pos, None);
        let tok = match iter.next() {
            Some(result) => result?,
            None => break,
        };
        pos = tok.end;

        let s = tok.as_str().to_string();
        let mut matched_paren = false;
        for (open, closer) in ctx.parens {
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

/// Takes the given set of flat matcher elements (no bracket nesting) and translates
/// them into productions, splitting into a chain of synthetic `tag:split:N`
/// productions if there are more than two non-unit-length elements (`cyk.py`'s
/// `make_production`).
fn make_production(
    productions: &mut Vec<Production>,
    tag: Tag,
    mut elements: Vec<Box<dyn Element>>,
    at_start: bool,
    at_end: bool,
) -> Result<(), PasrError> {
    let nonunit: Vec<usize> = (0..elements.len())
        .filter(|&i| !elements[i].unit_length())
        .collect();
    if nonunit.len() <= 2 {
        let mut prod = Production::new(tag, elements).map_err(PasrError::Structural)?;
        prod.at_start = at_start;
        prod.at_end = at_end;
        productions.push(prod);
        return Ok(());
    }

    let head: Vec<Box<dyn Element>> = elements.drain(..nonunit[0]).collect();
    let mut prev: Vec<Box<dyn Element>> = Vec::new();
    let mut prevend = nonunit[0];
    let mut nr = 1;
    while nr + 1 < nonunit.len() {
        let subtag = Tag::new(format!("{}:split:{}", tag, nr));
        let take = nonunit[nr] + 1 - prevend;
        let chunk: Vec<Box<dyn Element>> = elements.drain(..take).collect();
        let mut combined = prev;
        combined.extend(chunk);

        let mut prod = Production::new(subtag.clone(), combined).map_err(PasrError::Structural)?;
        prod.at_start = at_start && nonunit[0] == 0;
        productions.push(prod);

        prev = vec![Box::new(MatchNonTerminal::new(subtag))];
        prevend = nonunit[nr] + 1;
        nr += 1;
    }

    let mut combined = head;
    combined.extend(prev);
    combined.extend(elements);
    let mut prod = Production::new(tag, combined).map_err(PasrError::Structural)?;
    prod.at_start = at_start;
    prod.at_end = at_end;
    productions.push(prod);
    Ok(())
}

/// Converts a pattern's own token tree into a flat element list, collapsing every
/// bracketed group into its own `tag:nestN` production (always anchored
/// `at_start`/`at_end`, since it must match its whole enclosing span) referenced by a
/// unit-length [MatchNonTerminal]. Grounded on `compile.py`'s `eltstack`/`pos`/`blocks`
/// walk, restated as plain recursion over the tree `compile_maketree` already built.
fn flatten_elements(
    productions: &mut Vec<Production>,
    tag: &Tag,
    items: Vec<PatternItem>,
    nest_counter: &mut usize,
) -> Result<Vec<Box<dyn Element>>, PasrError> {
    let mut elements: Vec<Box<dyn Element>> = Vec::new();
    for item in items {
        match item {
            PatternItem::Literal(range) => elements.push(Box::new(MatchTextRange(range))),
            PatternItem::Compiled(element) => elements.push(element),
            PatternItem::Group(children) => {
                *nest_counter += 1;
                let subtag = Tag::new(format!("{}:nest{}", tag, nest_counter));
                let sub_elements = flatten_elements(productions, &subtag, children, nest_counter)?;
                make_production(productions, subtag.clone(), sub_elements, true, true)?;

                let mut nonterminal = MatchNonTerminal::new(subtag);
                nonterminal.unit_length = true;
                elements.push(Box::new(nonterminal));
            }
        }
    }
    Ok(elements)
}

/// Compiles `expr` into `state.productions`, appending the top-level production(s)
/// tagged `tag`. Used both for the outer `compile` call and for a recursive
/// `$(=...=)` sub-pattern, which shares `state` so its own productions and the
/// `:rec`/`:nest` counter land in the same running list.
fn compile_into(ctx: &Ctx, state: &mut State, tag: Tag, expr: &str) -> Result<(), PasrError> {
    let text: Rc<str> = Rc::from(expr);
    let (tree, _) = compile_maketree(ctx, state, &tag, &text, 0, None)?;
    let elements = flatten_elements(&mut state.productions, &tag, tree, &mut state.nest_counter)?;
    make_production(&mut state.productions, tag, elements, false, false)
}

/// Compiles `expr` into the productions needed to represent it, tagging the top-level
/// production `tag`. `tokenizer`/`treeifier` lex and bracket-nest the pattern's own
/// literal spans, exactly as a caller's source text would be.
pub fn compile(
    tag: Tag,
    expr: &str,
    tokenizer: &Tokenizer,
    treeifier: &Treeifier,
    options: &Options,
) -> Result<Vec<Production>, PasrError> {
    let ctx = Ctx { tokenizer, parens: treeifier.parens(), options };
    let mut state = State { productions: Vec::new(), nest_counter: 0 };
    compile_into(&ctx, &mut state, tag, expr)?;
    Ok(state.productions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pasr::cyk::Match;
    use crate::tokenizer::{tok_fallback, tok_regex, tok_whitespace};
    use crate::treeifier::Token;
    use regex::Regex;

    fn test_tokenizer() -> Tokenizer {
        let mut tokenizer = Tokenizer::new();
        tokenizer.add_rule(-100, tok_whitespace(" \t\n"));
        tokenizer.add_rule(0, tok_regex(Regex::new("^[a-zA-Z_][a-zA-Z_0-9]*").unwrap(), Some("id")));
        tokenizer.add_rule(100, tok_fallback());
        tokenizer
    }

    fn test_treeifier() -> Treeifier {
        let mut t = Treeifier::new();
        t.add_parens("(", ")");
        t
    }

    fn leaf(text: &Rc<str>, start: usize, end: usize, tag: Option<&str>) -> Token {
        Token::Leaf(TextRange::new(text, start, end, tag))
    }

    #[test]
    fn compiles_a_literal_token() {
        let tokenizer = test_tokenizer();
        let treeifier = test_treeifier();
        let options = Options::default();
        let productions = compile(Tag::new("greet"), "hello", &tokenizer, &treeifier, &options).unwrap();

        let text: Rc<str> = Rc::from("hello");
        let tokens = vec![leaf(&text, 0, 5, None)];
        let m = Match::new(tokens, &productions);
        assert!(m.tree.matches(0, 1).iter().any(|(t, _)| *t == Tag::new("greet")));
    }

    #[test]
    fn compiles_a_nonterminal_reference() {
        let tokenizer = test_tokenizer();
        let treeifier = test_treeifier();
        let options = Options::default();
        let productions = compile(Tag::new("expr"), "$(id)", &tokenizer, &treeifier, &options).unwrap();

        let text: Rc<str> = Rc::from("x");
        let tokens = vec![leaf(&text, 0, 1, Some("id"))];
        let m = Match::new(tokens, &productions);
        assert!(m.tree.matches(0, 1).iter().any(|(t, _)| *t == Tag::new("expr")));
    }

    #[test]
    fn compiles_any_star() {
        let tokenizer = test_tokenizer();
        let treeifier = test_treeifier();
        let options = Options::default();
        let productions = compile(Tag::new("anything"), "$*", &tokenizer, &treeifier, &options).unwrap();

        let text: Rc<str> = Rc::from("a b c");
        let tokens = vec![
            leaf(&text, 0, 1, Some("id")),
            leaf(&text, 2, 3, Some("id")),
            leaf(&text, 4, 5, Some("id")),
        ];
        let m = Match::new(tokens, &productions);
        assert!(m.tree.matches(0, 3).iter().any(|(t, _)| *t == Tag::new("anything")));
    }

    #[test]
    fn compiles_a_capture() {
        let tokenizer = test_tokenizer();
        let treeifier = test_treeifier();
        let options = Options::default();
        let productions = compile(Tag::new("expr"), "$(id)|name|", &tokenizer, &treeifier, &options).unwrap();

        let text: Rc<str> = Rc::from("x");
        let tokens = vec![leaf(&text, 0, 1, Some("id"))];
        let m = Match::new(tokens, &productions);
        let found = m.tree.matches(0, 1);
        let (_, kv) = found.iter().find(|(t, _)| *t == Tag::new("expr")).unwrap();
        assert_eq!(kv.get("name").unwrap().as_str(), "x");
    }

    #[test]
    fn nested_literal_parens_collapse_to_a_nest_production() {
        let tokenizer = test_tokenizer();
        let treeifier = test_treeifier();
        let options = Options::default();
        let productions = compile(Tag::new("wrapped"), "( $(id) )", &tokenizer, &treeifier, &options).unwrap();

        let text: Rc<str> = Rc::from("( x )");
        let inner = vec![leaf(&text, 2, 3, Some("id"))];
        let tokens = vec![leaf(&text, 0, 1, None), Token::List(inner), leaf(&text, 4, 5, None)];
        let m = Match::new(tokens, &productions);
        assert!(m.tree.matches(0, 3).iter().any(|(t, _)| *t == Tag::new("wrapped")));
    }

    #[test]
    fn make_production_splits_more_than_two_nonunit_elements_into_a_chain() {
        let mut productions = Vec::new();
        let elements: Vec<Box<dyn Element>> = vec![
            Box::new(MatchNonTerminal::new(Tag::new("a"))),
            Box::new(MatchNonTerminal::new(Tag::new("b"))),
            Box::new(MatchNonTerminal::new(Tag::new("c"))),
        ];
        make_production(&mut productions, Tag::new("abc"), elements, true, true).unwrap();
        assert!(productions.len() > 1, "should split into a chain of synthetic productions");
        assert!(productions.iter().any(|p| p.tag == Tag::new("abc")));
        assert!(productions.iter().any(|p| p.tag.as_str().contains(":split:")));
    }

    #[test]
    fn recursive_subpattern_is_compiled_into_its_own_production() {
        let tokenizer = test_tokenizer();
        let treeifier = test_treeifier();
        let options = Options::default();
        let productions =
            compile(Tag::new("top"), "$(=(id)=)", &tokenizer, &treeifier, &options).unwrap();
        assert!(productions.iter().any(|p| p.tag.as_str().contains(":rec")));
    }

    #[test]
    fn recursive_sum_grammar_binds_its_capture_over_the_full_span() {
        let tokenizer = test_tokenizer();
        let treeifier = test_treeifier();
        let options = Options::default();

        let mut productions = compile(Tag::new("expr"), "$(id)", &tokenizer, &treeifier, &options).unwrap();
        let sum_productions = compile(
            Tag::new("sum"),
            "$(=($(expr) + $(expr))=)|sum|",
            &tokenizer,
            &treeifier,
            &options,
        )
        .unwrap();
        productions.extend(sum_productions);

        let text: Rc<str> = Rc::from("a + b");
        let tokens = vec![
            leaf(&text, 0, 1, Some("id")),
            leaf(&text, 2, 3, None),
            leaf(&text, 4, 5, Some("id")),
        ];
        let m = Match::new(tokens, &productions);

        let found = m.tree.matches(0, 3);
        let (_, kv) = found
            .iter()
            .find(|(t, _)| *t == Tag::new("sum"))
            .expect("the recursive sub-pattern should cover the full span");
        assert_eq!(kv.get("sum").unwrap().as_str(), "a + b");
    }
}
