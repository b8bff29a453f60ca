//! A grammar-like pattern language compiling to productions restricted to at most two
//! non-unit-length elements, matched against a token tree with a CYK-style
//! dynamic-programming table (§4.F/§4.G/§4.H).

pub mod compile;
pub mod cyk;

pub use compile::compile;

pub use cyk::{
    for_greedy_max, AnnotatedNode, Captures, Element, MatchAnyStar, MatchNonTerminal,
    MatchStore, MatchTextRange, Match, Production, Tag,
};

use crate::text::TextError;
use std::fmt;

/// The CFG compiler's error surface. `Structural` covers "more than two non-unit
/// elements" contract violations arising from *direct* [Production::new]
/// construction; the compiler itself always normalizes via `make_production`'s
/// split-to-chain rewrite and so never produces this variant itself.
#[derive(Debug, Clone)]
pub enum PasrError {
    Syntax(TextError),
    Structural(String),
}

impl fmt::Display for PasrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasrError::Syntax(e) => write!(f, "{}", e),
            PasrError::Structural(msg) => write!(f, "PasrError: {}", msg),
        }
    }
}

impl From<TextError> for PasrError {
    fn from(e: TextError) -> Self {
        PasrError::Syntax(e)
    }
}

/// Compiler configuration: just the escape prefix character. Unlike `patre::Options`,
/// there is no sub-pattern registry — non-terminal references are resolved against the
/// `Vec<Production>` a single `compile` call returns, not a pre-populated map.
pub struct Options {
    pub escape: char,
}

impl Default for Options {
    fn default() -> Self {
        Self { escape: '$' }
    }
}
