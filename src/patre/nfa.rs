//! Non-deterministic finite automaton over tokenized trees.
//!
//! Grounded on `original_source/patre/nfa.py`, extended per spec with transition
//! `priority`, the PUSH/POP/STORE list-capture stack, and `nfa_not` bounded-lookahead
//! negation — none of which survive in the retrieved `nfa.py`, so their shape here
//! follows the written contract in spec.md §4.D rather than a line-for-line port.
//! The source's closure-based match predicates (`nfa_token`, `nfa_tag`, ...) become the
//! [MatchPredicate] sum type so predicates stay inspectable and states stay cheap to
//! copy during [Nfa::insert].

use crate::text::TextRange;
use crate::treeifier::Token;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// An id into an [Nfa]'s state pool. Never an owning reference, so back-epsilons (the
/// natural shape of `*`/`+` repetition) are unremarkable cycles in a flat arena.
///
/// Ord follows creation order, which [Nfa::simulate]'s frontier relies on to keep
/// collision resolution reproducible independent of any hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(usize);

/// A named binding accumulated along a match path: either a single text range (the
/// result of `X|key|` or an anchor) or a list of per-iteration capture snapshots (the
/// result of `X*[key]`/`X+[key]`).
#[derive(Debug, Clone)]
pub enum CaptureValue {
    Range(TextRange),
    List(Vec<Captures>),
}

pub type Captures = HashMap<Rc<str>, CaptureValue>;

/// What a labelled transition matches against the current token.
#[derive(Clone)]
pub enum MatchPredicate {
    /// Exact text-content equality.
    Token(Rc<str>),
    /// The current token is a leaf carrying this tag.
    Tag(Rc<str>),
    /// Matches any single token.
    Any,
    /// The current token is a list and the sub-automaton `(start, end)` reaches `end`
    /// on that list's children, given the same surrounding prev/next context.
    List(StateId, StateId),
    /// Accepts the current token iff the sub-automaton `(start, end)` does *not* reach
    /// `end` on some prefix of the remaining tokens (bounded lookahead negation).
    Not(StateId, StateId),
}

pub fn nfa_token(text: &str) -> MatchPredicate {
    MatchPredicate::Token(Rc::from(text))
}
pub fn nfa_tag(tag: &str) -> MatchPredicate {
    MatchPredicate::Tag(Rc::from(tag))
}
pub fn nfa_any() -> MatchPredicate {
    MatchPredicate::Any
}
pub fn nfa_list(start: StateId, end: StateId) -> MatchPredicate {
    MatchPredicate::List(start, end)
}
pub fn nfa_not(start: StateId, end: StateId) -> MatchPredicate {
    MatchPredicate::Not(start, end)
}

/// The capture effect of an epsilon transition. Which token position it reads (`prev`'s
/// end, or `next`'s start) is determined by which of [Transition::prev_capture] /
/// [Transition::next_capture] it is attached to, not by this value.
#[derive(Clone)]
pub enum CaptureEffect {
    /// Write a zero-width text range at the read position (`$<|key|`/`$>|key|`).
    Anchor(Rc<str>),
    /// Remember the read position as the start of a pending `X|key|` range. Only
    /// meaningful on [Transition::next_capture].
    RangeStart(Rc<str>),
    /// Combine the read position with a pending start to finalize an `X|key|` range.
    /// Only meaningful on [Transition::prev_capture].
    RangeEnd(Rc<str>),
}

#[derive(Clone)]
pub enum StackOp {
    Push(Rc<str>),
    Store(Rc<str>),
    Pop(Rc<str>),
}

#[derive(Clone)]
pub struct Transition {
    pub end: StateId,
    pub predicate: Option<MatchPredicate>,
    pub prev_capture: Option<CaptureEffect>,
    pub next_capture: Option<CaptureEffect>,
    pub stack: Option<StackOp>,
    /// Lower priority wins when multiple epsilon paths reach the same target state
    /// (used to order `$||{a}{b}…` alternatives).
    pub priority: i32,
}

#[derive(Default)]
struct State {
    transitions: Vec<Transition>,
    epsilons: Vec<Transition>,
}

/// Per-branch state threaded through simulation: finalized captures, any `X|key|`
/// range-capture awaiting its closing half, and any open `X*[key]` list-capture frames.
#[derive(Clone, Default)]
pub struct Branch {
    pub captures: Captures,
    pending_ranges: HashMap<Rc<str>, (Rc<str>, usize)>,
    stack_frames: HashMap<Rc<str>, Vec<Vec<Captures>>>,
}

/// A durable handle to a transition, valid across further `&mut Nfa` calls (unlike the
/// `&mut Transition` [Nfa::transition] returns). Needed where a transition must be
/// annotated only after other transitions are created in between — e.g. a repetition's
/// back-edge is created before its pattern's `[key]` suffix is parsed.
#[derive(Clone, Copy)]
pub struct TransitionRef {
    state: StateId,
    epsilon: bool,
    index: usize,
}

/// A flat pool of states with labelled and epsilon transitions.
#[derive(Default)]
pub struct Nfa {
    states: Vec<State>,
}

impl Nfa {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_state(&mut self) -> StateId {
        self.states.push(State::default());
        StateId(self.states.len() - 1)
    }

    /// Append a transition from `start` to `end`. Labelled when `predicate` is `Some`,
    /// epsilon otherwise. Returns the new transition for the caller to annotate with
    /// captures, a stack op, or a priority.
    pub fn transition(
        &mut self,
        start: StateId,
        end: StateId,
        predicate: Option<MatchPredicate>,
    ) -> &mut Transition {
        let is_epsilon = predicate.is_none();
        let t = Transition {
            end,
            predicate,
            prev_capture: None,
            next_capture: None,
            stack: None,
            priority: 0,
        };
        let state = &mut self.states[start.0];
        if is_epsilon {
            state.epsilons.push(t);
            state.epsilons.last_mut().unwrap()
        } else {
            state.transitions.push(t);
            state.transitions.last_mut().unwrap()
        }
    }

    /// Like [Nfa::transition], but returns a durable [TransitionRef] instead of a
    /// borrow, for callers that need to annotate the transition later.
    pub fn transition_ref(
        &mut self,
        start: StateId,
        end: StateId,
        predicate: Option<MatchPredicate>,
    ) -> TransitionRef {
        let is_epsilon = predicate.is_none();
        self.transition(start, end, predicate);
        let state = &self.states[start.0];
        let index = if is_epsilon {
            state.epsilons.len() - 1
        } else {
            state.transitions.len() - 1
        };
        TransitionRef { state: start, epsilon: is_epsilon, index }
    }

    /// Resolve a [TransitionRef] back to its transition for annotation.
    pub fn get_transition_mut(&mut self, r: TransitionRef) -> &mut Transition {
        let state = &mut self.states[r.state.0];
        if r.epsilon {
            &mut state.epsilons[r.index]
        } else {
            &mut state.transitions[r.index]
        }
    }

    /// Copy every state of `sub` into `self`, remapping any internal state references
    /// held by `List`/`Not` predicates. Used to inline a named sub-pattern (`${tag}`)
    /// registered as its own compiled [Nfa].
    pub fn insert(&mut self, sub: &Nfa) -> HashMap<StateId, StateId> {
        let offset = self.states.len();
        let mut map = HashMap::with_capacity(sub.states.len());
        for i in 0..sub.states.len() {
            map.insert(StateId(i), StateId(offset + i));
            self.states.push(State::default());
        }

        let remap_predicate = |pred: &Option<MatchPredicate>| -> Option<MatchPredicate> {
            pred.as_ref().map(|p| match p {
                MatchPredicate::Token(t) => MatchPredicate::Token(Rc::clone(t)),
                MatchPredicate::Tag(t) => MatchPredicate::Tag(Rc::clone(t)),
                MatchPredicate::Any => MatchPredicate::Any,
                MatchPredicate::List(s, e) => MatchPredicate::List(map[s], map[e]),
                MatchPredicate::Not(s, e) => MatchPredicate::Not(map[s], map[e]),
            })
        };

        for (old_idx, old_state) in sub.states.iter().enumerate() {
            let new_id = map[&StateId(old_idx)];
            for t in &old_state.transitions {
                let nt = self.transition(new_id, map[&t.end], remap_predicate(&t.predicate));
                nt.priority = t.priority;
                nt.prev_capture = t.prev_capture.clone();
                nt.next_capture = t.next_capture.clone();
                nt.stack = t.stack.clone();
            }
            for t in &old_state.epsilons {
                let nt = self.transition(new_id, map[&t.end], None);
                nt.priority = t.priority;
                nt.prev_capture = t.prev_capture.clone();
                nt.next_capture = t.next_capture.clone();
                nt.stack = t.stack.clone();
            }
        }
        map
    }

    fn apply_prev_capture(effect: &CaptureEffect, prev: Option<&TextRange>, branch: &mut Branch) {
        let Some(tr) = prev else { return };
        match effect {
            CaptureEffect::Anchor(key) => {
                let range = TextRange::new(&tr.text_rc(), tr.end, tr.end, None);
                branch.captures.insert(Rc::clone(key), CaptureValue::Range(range));
            }
            CaptureEffect::RangeEnd(key) => {
                if let Some((text, start)) = branch.pending_ranges.remove(key) {
                    let range = TextRange::new(&text, start, tr.end, None);
                    branch.captures.insert(Rc::clone(key), CaptureValue::Range(range));
                }
            }
            CaptureEffect::RangeStart(_) => {}
        }
    }

    fn apply_next_capture(effect: &CaptureEffect, next: Option<&TextRange>, branch: &mut Branch) {
        let Some(tr) = next else { return };
        match effect {
            CaptureEffect::Anchor(key) => {
                let range = TextRange::new(&tr.text_rc(), tr.start, tr.start, None);
                branch.captures.insert(Rc::clone(key), CaptureValue::Range(range));
            }
            CaptureEffect::RangeStart(key) => {
                branch.pending_ranges.insert(Rc::clone(key), (tr.text_rc(), tr.start));
            }
            CaptureEffect::RangeEnd(_) => {}
        }
    }

    fn apply_stack(op: &StackOp, branch: &mut Branch) {
        match op {
            StackOp::Push(key) => {
                branch.stack_frames.entry(Rc::clone(key)).or_default().push(Vec::new());
            }
            StackOp::Store(key) => {
                let snapshot = branch.captures.clone();
                if let Some(frames) = branch.stack_frames.get_mut(key) {
                    if let Some(top) = frames.last_mut() {
                        top.push(snapshot);
                    }
                }
            }
            StackOp::Pop(key) => {
                if let Some(frames) = branch.stack_frames.get_mut(key) {
                    if let Some(frame) = frames.pop() {
                        branch.captures.insert(Rc::clone(key), CaptureValue::List(frame));
                    }
                }
            }
        }
    }

    /// Iterative fixed-point expansion of every epsilon transition reachable from the
    /// current `states`. Each round collects every not-yet-claimed epsilon transition
    /// sourced from an already-live state *across the whole frontier*, then commits them
    /// in ascending `(priority, source state, declaration order)` order. Sorting the
    /// whole round at once, rather than one source state's own transitions at a time, is
    /// what lets `priority` arbitrate between two different `$||{a}{b}…` alternatives'
    /// `sub_end` states racing epsilons into the same shared target: both are live
    /// before either is a candidate's source, so both of their edges appear in the same
    /// round and the lower-priority one is committed first. Ties (equal priority, as
    /// ordinary non-alternation epsilons all are) fall back to state id then declaration
    /// order, which is reproducible independent of hashing. A target claimed earlier in
    /// a round is skipped by later candidates for it, so the first (lowest-ordered)
    /// arrival wins, matching labelled-transition collision resolution in [Nfa::simulate].
    fn expand_epsilons(&self, states: &mut BTreeMap<StateId, Branch>, prev: Option<&Token>, next: Option<&Token>) {
        let prev_leaf = flatten_last(prev);
        let next_leaf = flatten_first(next);

        loop {
            let mut candidates: Vec<(i32, StateId, usize)> = Vec::new();
            for (&state_id, _) in states.iter() {
                for (idx, t) in self.states[state_id.0].epsilons.iter().enumerate() {
                    if !states.contains_key(&t.end) {
                        candidates.push((t.priority, state_id, idx));
                    }
                }
            }
            if candidates.is_empty() {
                break;
            }
            candidates.sort();

            let mut committed_any = false;
            for (_, state_id, idx) in candidates {
                let t = &self.states[state_id.0].epsilons[idx];
                if states.contains_key(&t.end) {
                    continue;
                }
                let mut new_branch = states[&state_id].clone();
                if let Some(effect) = &t.prev_capture {
                    Self::apply_prev_capture(effect, prev_leaf, &mut new_branch);
                }
                if let Some(effect) = &t.next_capture {
                    Self::apply_next_capture(effect, next_leaf, &mut new_branch);
                }
                if let Some(op) = &t.stack {
                    Self::apply_stack(op, &mut new_branch);
                }
                states.insert(t.end, new_branch);
                committed_any = true;
            }
            if !committed_any {
                break;
            }
        }
    }

    fn eval_predicate(
        &self,
        pred: &MatchPredicate,
        prev: Option<&Token>,
        remaining: &[Token],
        next: Option<&Token>,
        after: Option<&Token>,
    ) -> Option<Captures> {
        let cur = remaining.first()?;
        match pred {
            MatchPredicate::Token(text) => match cur {
                Token::Leaf(range) if range.as_str() == text.as_ref() => Some(Captures::new()),
                _ => None,
            },
            MatchPredicate::Tag(tag) => match cur {
                Token::Leaf(range) if range.has_tag(tag) => Some(Captures::new()),
                _ => None,
            },
            MatchPredicate::Any => Some(Captures::new()),
            MatchPredicate::List(start, end) => match cur {
                Token::List(children) => {
                    let result = self.simulate(children, *start, prev, next, None);
                    result.get(end).map(|b| b.captures.clone())
                }
                _ => None,
            },
            MatchPredicate::Not(start, end) => {
                let result = self.simulate(remaining, *start, prev, after, Some(*end));
                if result.contains_key(end) {
                    None
                } else {
                    Some(Captures::new())
                }
            }
        }
    }

    fn goal_reached(states: &BTreeMap<StateId, Branch>, goal: Option<StateId>) -> bool {
        matches!(goal, Some(id) if states.contains_key(&id))
    }

    /// Run the automaton starting at `start` over `tree`, with `before`/`after` as the
    /// tokens flanking `tree` in its parent (used for anchor captures at the very ends
    /// of the match). If `goal` is given, simulation returns as soon as that state is
    /// reached — the earliest-match / bounded-lookahead behaviour `nfa_not` relies on.
    ///
    /// The frontier is a `BTreeMap` rather than a `HashMap` so that collisions at a
    /// shared target state — both here, across labelled transitions, and inside
    /// [Nfa::expand_epsilons] — resolve in a fixed, state-id-ordered way instead of by
    /// an arbitrarily-seeded hash iteration order.
    pub fn simulate(
        &self,
        tree: &[Token],
        start: StateId,
        before: Option<&Token>,
        after: Option<&Token>,
        goal: Option<StateId>,
    ) -> BTreeMap<StateId, Branch> {
        let mut states = BTreeMap::new();
        states.insert(start, Branch::default());

        if tree.is_empty() {
            self.expand_epsilons(&mut states, before, after);
            return states;
        }

        let mut token: Option<&Token> = before;
        let mut next_token: Option<&Token> = tree.first();
        for idx in 0..tree.len() {
            let prev_token = token;
            token = next_token;
            next_token = if idx + 1 == tree.len() { after } else { Some(&tree[idx + 1]) };

            self.expand_epsilons(&mut states, prev_token, token);
            if Self::goal_reached(&states, goal) {
                return states;
            }

            let remaining = &tree[idx..];
            let mut new_states: BTreeMap<StateId, Branch> = BTreeMap::new();
            for (state_id, branch) in &states {
                for t in &self.states[state_id.0].transitions {
                    if new_states.contains_key(&t.end) {
                        continue;
                    }
                    let predicate = t.predicate.as_ref().expect("labelled transition");
                    if let Some(extra) =
                        self.eval_predicate(predicate, prev_token, remaining, next_token, after)
                    {
                        let mut nb = branch.clone();
                        nb.captures.extend(extra);
                        new_states.insert(t.end, nb);
                    }
                }
            }
            states = new_states;
        }

        self.expand_epsilons(&mut states, token, next_token);
        states
    }
}

fn flatten_last(token: Option<&Token>) -> Option<&TextRange> {
    let mut cur = token?;
    loop {
        match cur {
            Token::Leaf(range) => return Some(range),
            Token::List(items) => cur = items.last()?,
        }
    }
}

fn flatten_first(token: Option<&Token>) -> Option<&TextRange> {
    let mut cur = token?;
    loop {
        match cur {
            Token::Leaf(range) => return Some(range),
            Token::List(items) => cur = items.first()?,
        }
    }
}
