//! `patrex` matches patterns against tokenized trees of source text using two
//! complementary engines.
//!
//! # Overview
//!
//! Source text is first split into a flat sequence of tagged [text::TextRange]s by a
//! [tokenizer::Tokenizer], then nested into a bracket-aware [treeifier::Token] tree by a
//! [treeifier::Treeifier]. Both pattern engines match against that tree, not against raw
//! text:
//!
//! - [patre] compiles an escape-prefixed pattern language to a non-deterministic finite
//!   automaton and simulates it against a token list, supporting anchors, bounded-lookahead
//!   negation, priority-ordered alternation, and list captures over repetition.
//! - [pasr] compiles a grammar-like pattern language to a set of productions restricted to
//!   at most two variable-length elements, matches them against a token tree with a
//!   CYK-style dynamic-programming table, and exposes a greedy maximal-occurrence
//!   enumerator over the resulting match table.
//!
//! The two engines share the same token and text-range representation but otherwise run
//! independently; neither calls into the other.
//!
//! # Example
//!
//! ```
//! use patrex::cpp;
//! use patrex::patre::{compile, Nfa, Options};
//! use std::rc::Rc;
//!
//! let text: Rc<str> = Rc::from("f ( a )");
//! let tokenizer = cpp::tokenizer();
//! let tokens = tokenizer.tokenize(Rc::clone(&text), 0, None);
//! let tree = cpp::treeifier().make_tree(tokens, None).unwrap();
//!
//! let options = Options::default();
//! let mut nfa = Nfa::new();
//! let (start, end) = compile::compile(&mut nfa, "f(${id})", &options).unwrap();
//! let found = nfa.simulate(&tree, start, None, None, None);
//! assert!(found.contains_key(&end));
//! ```
//!
//! # License
//! [patrex](crate) is provided under the MIT license. See
//! [LICENSE](https://github.com/creative-forest/patrex/blob/main/LICENSE).

pub mod cpp;
pub mod pasr;
pub mod patre;
pub mod text;
pub mod tokenizer;
pub mod treeifier;
mod util;

pub use util::{Code, Log, Position};
