//! In-memory automaton representation.
//!
//! An automaton is a flat arc table grouped by source state and terminated
//! by a sentinel record. A state with no outgoing arcs still occupies one
//! record (`input = output = target = -1`) so that every state appears in
//! the table and per-state offsets stay dense.

use std::collections::BTreeSet;

use itertools::Itertools;
use thiserror::Error;

use crate::alphabet::{Alphabet, SymbolId};

/// One record of the arc table.
///
/// `is_final` and `is_start` describe the *source* state and are identical
/// across all records of one group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub source: i32,
    pub input: SymbolId,
    pub output: SymbolId,
    pub target: i32,
    pub is_final: bool,
    pub is_start: bool,
}

impl Transition {
    pub(crate) const SENTINEL: Transition = Transition {
        source: -1,
        input: -1,
        output: -1,
        target: -1,
        is_final: false,
        is_start: false,
    };

    /// A placeholder record for a state with no outgoing arcs.
    fn stateless(state: i32, is_final: bool) -> Self {
        Transition {
            source: state,
            input: -1,
            output: -1,
            target: -1,
            is_final,
            is_start: state == 0,
        }
    }
}

/// Which tape the arcs of a group are sorted by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    Input,
    Output,
}

#[derive(Debug, Error)]
pub enum AutomatonError {
    #[error("arc references symbol id {0} absent from the alphabet")]
    UnknownSymbol(SymbolId),
    #[error("arc source {0} is negative")]
    BadSource(i32),
    #[error("arc target {0} is negative")]
    BadTarget(i32),
}

/// A compiled automaton: arcs, alphabet and summary data. Immutable while
/// any session borrows it; all apply bookkeeping lives in the session.
#[derive(Clone, Debug)]
pub struct Automaton {
    arcs: Vec<Transition>,
    alphabet: Alphabet,
    state_count: usize,
    final_count: usize,
    path_count: Option<u64>,
    sorted: Option<SortKey>,
}

impl Automaton {
    /// The arc table, placeholder records and trailing sentinel included.
    pub fn arcs(&self) -> &[Transition] {
        &self.arcs
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn state_count(&self) -> usize {
        self.state_count
    }

    pub fn final_count(&self) -> usize {
        self.final_count
    }

    /// Optional summary of the number of accepting paths, carried through
    /// from the producer; nothing in the engine computes or consumes it.
    pub fn path_count(&self) -> Option<u64> {
        self.path_count
    }

    pub fn set_path_count(&mut self, count: Option<u64>) {
        self.path_count = count;
    }

    pub fn sorted(&self) -> Option<SortKey> {
        self.sorted
    }

    /// Stable-sorts every arc group by the given tape and records the sort
    /// marker consulted by the binary-search arc selection.
    pub fn sort_arcs(&mut self, key: SortKey) {
        let mut i = 0;
        while self.arcs[i].source != -1 {
            let state = self.arcs[i].source;
            let mut j = i;
            while self.arcs[j].source == state {
                j += 1;
            }
            self.arcs[i..j].sort_by_key(|a| match key {
                SortKey::Input => a.input,
                SortKey::Output => a.output,
            });
            i = j;
        }
        self.sorted = Some(key);
    }

    /// True if any arc carries a final source state.
    pub fn has_finals(&self) -> bool {
        self.final_count > 0
    }
}

/// Arc-by-arc construction. States are numbered densely from 0 (the start
/// state); states mentioned only as targets or finals get placeholder
/// records.
#[derive(Debug, Default)]
pub struct AutomatonBuilder {
    alphabet: Alphabet,
    arcs: Vec<(i32, SymbolId, SymbolId, i32)>,
    finals: BTreeSet<i32>,
    states: BTreeSet<i32>,
}

impl AutomatonBuilder {
    pub fn new(alphabet: Alphabet) -> Self {
        Self {
            alphabet,
            ..Default::default()
        }
    }

    pub fn alphabet_mut(&mut self) -> &mut Alphabet {
        &mut self.alphabet
    }

    pub fn arc(&mut self, source: i32, input: SymbolId, output: SymbolId, target: i32) -> &mut Self {
        self.states.insert(source);
        self.states.insert(target);
        self.arcs.push((source, input, output, target));
        self
    }

    pub fn final_state(&mut self, state: i32) -> &mut Self {
        self.states.insert(state);
        self.finals.insert(state);
        self
    }

    /// Declares a state without arcs or finality, e.g. a dead sink.
    pub fn state(&mut self, state: i32) -> &mut Self {
        self.states.insert(state);
        self
    }

    pub fn build(&mut self) -> Result<Automaton, AutomatonError> {
        for &(source, input, output, target) in &self.arcs {
            if source < 0 {
                return Err(AutomatonError::BadSource(source));
            }
            if target < 0 {
                return Err(AutomatonError::BadTarget(target));
            }
            for sym in [input, output] {
                if !self.alphabet.contains_id(sym) {
                    return Err(AutomatonError::UnknownSymbol(sym));
                }
            }
        }
        let state_count = self
            .states
            .iter()
            .next_back()
            .map(|&max| max as usize + 1)
            .unwrap_or(0);

        // Group by source, keeping insertion order within each group: the
        // stored order is the enumeration order callers observe.
        let mut arcs: Vec<Transition> = Vec::with_capacity(self.arcs.len() + state_count + 1);
        let mut sorted_in = self.arcs.clone();
        sorted_in.sort_by_key(|&(source, ..)| source);
        let chunks = sorted_in.into_iter().chunk_by(|&(source, ..)| source);
        let groups: Vec<(i32, Vec<_>)> = chunks
            .into_iter()
            .map(|(source, group)| (source, group.collect()))
            .collect();
        let mut grouped = groups.into_iter().peekable();
        for state in 0..state_count as i32 {
            let is_final = self.finals.contains(&state);
            match grouped.peek() {
                Some(&(source, _)) if source == state => {
                    let (_, group) = grouped.next().unwrap();
                    for (source, input, output, target) in group {
                        arcs.push(Transition {
                            source,
                            input,
                            output,
                            target,
                            is_final,
                            is_start: state == 0,
                        });
                    }
                }
                _ => arcs.push(Transition::stateless(state, is_final)),
            }
        }
        arcs.push(Transition::SENTINEL);

        Ok(Automaton {
            arcs,
            alphabet: self.alphabet.clone(),
            state_count,
            final_count: self.finals.len(),
            path_count: None,
            sorted: None,
        })
    }
}

/// Per-state offsets into the arc table: `first[s]` is the first record of
/// state `s`'s group and `first[state_count]` is the sentinel offset, so a
/// group ends at `first[s + 1]`. The only state-lookup primitive the engine
/// uses.
#[derive(Clone, Debug)]
pub struct StateMap {
    first: Vec<usize>,
}

impl StateMap {
    pub fn new(net: &Automaton) -> Self {
        let mut first = vec![usize::MAX; net.state_count() + 1];
        let mut i = 0;
        let arcs = net.arcs();
        while arcs[i].source != -1 {
            let state = arcs[i].source as usize;
            if first[state] == usize::MAX {
                first[state] = i;
            }
            i += 1;
        }
        first[net.state_count()] = i;
        Self { first }
    }

    #[inline]
    pub fn first(&self, state: usize) -> usize {
        self.first[state]
    }

    /// Offset one past the last record of `state`'s group.
    #[inline]
    pub fn end(&self, state: usize) -> usize {
        self.first[state + 1]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ab_alphabet() -> (Alphabet, SymbolId, SymbolId) {
        let mut alpha = Alphabet::new();
        let a = alpha.intern("a");
        let b = alpha.intern("b");
        (alpha, a, b)
    }

    #[test]
    fn builder_groups_and_terminates() {
        let (alpha, a, b) = ab_alphabet();
        let mut builder = AutomatonBuilder::new(alpha);
        builder.arc(0, a, b, 1).final_state(1);
        let net = builder.build().unwrap();
        assert_eq!(net.state_count(), 2);
        assert_eq!(net.final_count(), 1);
        // arc for 0, placeholder for 1, sentinel
        assert_eq!(net.arcs().len(), 3);
        assert_eq!(net.arcs()[1].input, -1);
        assert!(net.arcs()[1].is_final);
        assert_eq!(net.arcs()[2], Transition::SENTINEL);
        assert!(net.arcs()[0].is_start);
        assert!(!net.arcs()[1].is_start);
    }

    #[test]
    fn builder_keeps_stored_order_within_group() {
        let mut alpha = Alphabet::new();
        let a = alpha.intern("a");
        let x = alpha.intern("x");
        let y = alpha.intern("y");
        let mut builder = AutomatonBuilder::new(alpha);
        builder.arc(0, a, y, 1).arc(0, a, x, 1).final_state(1);
        let net = builder.build().unwrap();
        assert_eq!(net.arcs()[0].output, y);
        assert_eq!(net.arcs()[1].output, x);
    }

    #[test]
    fn builder_rejects_unknown_symbol() {
        let (alpha, a, _) = ab_alphabet();
        let mut builder = AutomatonBuilder::new(alpha);
        builder.arc(0, a, 99, 1).final_state(1);
        assert!(matches!(
            builder.build(),
            Err(AutomatonError::UnknownSymbol(99))
        ));
    }

    #[test]
    fn state_map_offsets() {
        let (alpha, a, b) = ab_alphabet();
        let mut builder = AutomatonBuilder::new(alpha);
        builder
            .arc(0, a, a, 1)
            .arc(0, b, b, 1)
            .arc(1, a, b, 2)
            .final_state(2);
        let net = builder.build().unwrap();
        let map = StateMap::new(&net);
        assert_eq!(map.first(0), 0);
        assert_eq!(map.first(1), 2);
        assert_eq!(map.first(2), 3);
        assert_eq!(map.end(2), 4);
        assert_eq!(net.arcs()[map.end(2)].source, -1);
    }

    #[test]
    fn sort_arcs_by_input_is_stable() {
        let mut alpha = Alphabet::new();
        let a = alpha.intern("a");
        let b = alpha.intern("b");
        let x = alpha.intern("x");
        let y = alpha.intern("y");
        let mut builder = AutomatonBuilder::new(alpha);
        builder
            .arc(0, b, x, 1)
            .arc(0, a, y, 1)
            .arc(0, a, x, 1)
            .final_state(1);
        let mut net = builder.build().unwrap();
        net.sort_arcs(SortKey::Input);
        assert_eq!(net.sorted(), Some(SortKey::Input));
        let ins: Vec<_> = net.arcs()[..3].iter().map(|t| t.input).collect();
        assert_eq!(ins, vec![a, a, b]);
        // the two `a` arcs keep their stored order
        assert_eq!(net.arcs()[0].output, y);
        assert_eq!(net.arcs()[1].output, x);
    }
}
