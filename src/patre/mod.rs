//! An escape-prefixed pattern language compiling to the NFA in [nfa], and simulated
//! against a token tree (§4.D/§4.E).

pub mod compile;
pub mod nfa;

pub use compile::compile;

pub use nfa::{
    nfa_any, nfa_list, nfa_not, nfa_tag, nfa_token, Branch, CaptureEffect, CaptureValue,
    Captures, MatchPredicate, Nfa, StackOp, StateId, Transition, TransitionRef,
};

use crate::text::TextError;
use crate::tokenizer::Tokenizer;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// The NFA compiler's error surface. `Structural` is reserved for contract
/// violations that aren't tied to a text position (none arise from the compiler
/// itself today; it always produces `Syntax`, the same way `pasr`'s `Structural`
/// variant is reserved for direct `Production` construction rather than compilation).
#[derive(Debug, Clone)]
pub enum PatreError {
    Syntax(TextError),
    Structural(String),
}

impl fmt::Display for PatreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatreError::Syntax(e) => write!(f, "{}", e),
            PatreError::Structural(msg) => write!(f, "PatreError: {}", msg),
        }
    }
}

impl From<TextError> for PatreError {
    fn from(e: TextError) -> Self {
        PatreError::Syntax(e)
    }
}

/// Compiler configuration: the escape prefix character, a registry of named
/// sub-patterns available to `${tag}`, and the host tokenizer/bracket pairs used to
/// lex the literal (non-escape) spans of the pattern text.
pub struct Options {
    pub escape: char,
    /// Named sub-patterns available to `${tag}`, each pre-compiled into its own `Nfa`
    /// and inlined via [Nfa::insert] on first reference.
    pub tags: HashMap<String, (Rc<Nfa>, StateId, StateId)>,
    pub tokenizer: Rc<Tokenizer>,
    /// Bracket pairs recognised both in literal pattern text (nested into an
    /// `nfa_list` sub-match) and passed through to the host tokenizer's own
    /// tokenization of literal spans.
    pub parens: Vec<(String, String)>,
}

impl Options {
    pub fn new(tokenizer: Rc<Tokenizer>, parens: Vec<(String, String)>) -> Self {
        Self {
            escape: '$',
            tags: HashMap::new(),
            tokenizer,
            parens,
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(
            Rc::new(crate::cpp::tokenizer()),
            vec![
                ("(".to_string(), ")".to_string()),
                ("[".to_string(), "]".to_string()),
                ("{".to_string(), "}".to_string()),
            ],
        )
    }
}
