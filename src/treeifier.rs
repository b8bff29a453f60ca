//! Nests a token sequence by configured bracket pairs into a token tree.
//!
//! Grounded on `original_source/patre/parse.py`'s `Treeify`. The tree shape (a leaf
//! or a `List` of further tokens) and its `Display`/pretty-print surface follow
//! `ast_node.rs`'s recursive [ASTNode]-style tree, adapted to `ptree::TreeItem`.

use crate::text::{TextError, TextRange};
use std::borrow::Cow;
use std::io;

/// A node of a token tree: either a leaf [TextRange] or a bracketed sub-list. A list
/// is flanked in its parent by its opening and closing bracket tokens (§4.C).
#[derive(Clone, Debug)]
pub enum Token {
    Leaf(TextRange),
    List(Vec<Token>),
}

impl Token {
    pub fn as_leaf(&self) -> Option<&TextRange> {
        match self {
            Token::Leaf(range) => Some(range),
            Token::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Token]> {
        match self {
            Token::List(items) => Some(items),
            Token::Leaf(_) => None,
        }
    }
}

/// Nests a token sequence by a configured set of open/close bracket pairs.
#[derive(Default)]
pub struct Treeifier {
    parens: Vec<(String, String)>,
}

impl Treeifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parens(&mut self, open: &str, close: &str) -> &mut Self {
        self.parens.push((open.to_string(), close.to_string()));
        self
    }

    /// The registered bracket pairs, in registration order.
    pub fn parens(&self) -> &[(String, String)] {
        &self.parens
    }

    /// Build a token tree from `tokens`. If `close` is given and a registered
    /// closing-bracket token matching it is seen at the top level, the tree built so
    /// far is returned immediately without consuming that token (early termination,
    /// used when a sub-grammar is parsed up to a delimiter belonging to its caller).
    pub fn make_tree<I>(&self, tokens: I, close: Option<&str>) -> Result<Vec<Token>, TextError>
    where
        I: IntoIterator<Item = Result<TextRange, TextError>>,
    {
        let mut list_stack: Vec<Vec<Token>> = vec![Vec::new()];
        let mut close_stack: Vec<Option<String>> = vec![close.map(String::from)];

        for tok_result in tokens {
            let tok = tok_result?;
            let s: Cow<str> = Cow::Borrowed(tok.as_str());
            let mut matched_paren = false;

            for (open, closer) in &self.parens {
                if s.as_ref() == open {
                    list_stack.last_mut().unwrap().push(Token::Leaf(tok.clone()));
                    list_stack.push(Vec::new());
                    close_stack.push(Some(closer.clone()));
                    matched_paren = true;
                    break;
                } else if s.as_ref() == closer {
                    if close_stack.last().unwrap().as_deref() != Some(s.as_ref()) {
                        return Err(TextError::at(
                            tok.source(),
                            tok.start,
                            format!("unexpected closing '{}'", s),
                        ));
                    }
                    if list_stack.len() == 1 {
                        return Ok(list_stack.pop().unwrap());
                    }
                    let finished = list_stack.pop().unwrap();
                    close_stack.pop();
                    list_stack.last_mut().unwrap().push(Token::List(finished));
                    list_stack.last_mut().unwrap().push(Token::Leaf(tok.clone()));
                    matched_paren = true;
                    break;
                }
            }

            if !matched_paren {
                list_stack.last_mut().unwrap().push(Token::Leaf(tok));
            }
        }

        if list_stack.len() > 1 {
            let opener = list_stack[list_stack.len() - 2]
                .last()
                .and_then(Token::as_leaf)
                .expect("a pushed list is always preceded by its opening bracket leaf");
            return Err(TextError::at(
                opener.source(),
                opener.start,
                format!("unclosed '{}'", opener.as_str()),
            ));
        }

        Ok(list_stack.pop().unwrap())
    }
}

/// Flanking opener/closer positions for a sub-list within its parent, per §4.C.
pub fn text_start(parent: &[Token], list_index: usize) -> Option<usize> {
    if list_index == 0 {
        None
    } else {
        parent[list_index - 1].as_leaf().map(|r| r.end)
    }
}

pub fn text_end(parent: &[Token], list_index: usize) -> Option<usize> {
    parent
        .get(list_index + 1)
        .and_then(Token::as_leaf)
        .map(|r| r.start)
}

struct TreeItem<'a>(&'a Token);

impl<'a> ptree::TreeItem for TreeItem<'a> {
    type Child = TreeItem<'a>;

    fn write_self<W: io::Write>(&self, f: &mut W, style: &ptree::Style) -> io::Result<()> {
        match self.0 {
            Token::Leaf(range) => write!(f, "{}", style.paint(format!("{:?}", range))),
            Token::List(_) => write!(f, "{}", style.paint("list")),
        }
    }

    fn children(&self) -> Cow<[Self::Child]> {
        match self.0 {
            Token::Leaf(_) => Cow::Borrowed(&[]),
            Token::List(items) => {
                Cow::Owned(items.iter().map(TreeItem).collect::<Vec<_>>())
            }
        }
    }
}

/// Pretty-print a token tree for debugging (not used by the matching algorithms).
pub fn print_tree(tree: &[Token]) -> io::Result<()> {
    for tok in tree {
        ptree::print_tree(&TreeItem(tok))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{tok_fallback, tok_regex, tok_whitespace, Tokenizer};
    use regex::Regex;
    use std::rc::Rc;

    fn cpp_lite_tokenizer() -> Tokenizer {
        let mut tokenizer = Tokenizer::new();
        tokenizer.add_rule(-100, tok_whitespace(" \t\n"));
        tokenizer.add_rule(0, tok_regex(Regex::new("^[a-zA-Z_][a-zA-Z_0-9]*").unwrap(), Some("id")));
        tokenizer.add_rule(100, tok_fallback());
        tokenizer
    }

    fn leaf_text(tok: &Token) -> &str {
        tok.as_leaf().unwrap().as_str()
    }

    #[test]
    fn treeifies_a_function_call() {
        let tokenizer = cpp_lite_tokenizer();
        let mut treeifier = Treeifier::new();
        treeifier.add_parens("(", ")");

        let text: Rc<str> = Rc::from("f ( a , b )");
        let tokens = tokenizer.tokenize(text, 0, None);
        let tree = treeifier.make_tree(tokens, None).unwrap();

        assert_eq!(tree.len(), 4);
        assert_eq!(leaf_text(&tree[0]), "f");
        assert_eq!(leaf_text(&tree[1]), "(");
        assert_eq!(leaf_text(&tree[3]), ")");

        let inner = tree[2].as_list().unwrap();
        let inner_texts: Vec<&str> = inner.iter().map(leaf_text).collect();
        assert_eq!(inner_texts, vec!["a", ",", "b"]);
    }

    #[test]
    fn unclosed_bracket_is_a_text_error() {
        let tokenizer = cpp_lite_tokenizer();
        let mut treeifier = Treeifier::new();
        treeifier.add_parens("(", ")");

        let text: Rc<str> = Rc::from("f ( a");
        let tokens = tokenizer.tokenize(text, 0, None);
        let err = treeifier.make_tree(tokens, None).unwrap_err();
        assert!(format!("{}", err).contains("unclosed"));
    }

    #[test]
    fn unexpected_closer_is_a_text_error() {
        let tokenizer = cpp_lite_tokenizer();
        let mut treeifier = Treeifier::new();
        treeifier.add_parens("(", ")");
        treeifier.add_parens("[", "]");

        let text: Rc<str> = Rc::from("( a ]");
        let tokens = tokenizer.tokenize(text, 0, None);
        let err = treeifier.make_tree(tokens, None).unwrap_err();
        assert!(format!("{}", err).contains("unexpected closing"));
    }
}
