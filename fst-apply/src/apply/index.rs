//! Optional per-state arc index.
//!
//! For states with many outgoing arcs, a dense `symbol id → arc list` table
//! replaces the linear group scan during string matching. The index never
//! changes the set of reachable results, only the order arcs are tried in.

use log::debug;

use crate::alphabet::{SymbolId, EPSILON, IDENTITY, UNKNOWN};
use crate::automaton::{Automaton, SortKey, StateMap};
use crate::flags::FlagTable;

/// Which states get a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexPolicy {
    /// Every state with at least this many outgoing arcs.
    MinArcs(usize),
    /// Densest states first until the estimated table memory reaches this
    /// many bytes.
    Memory(usize),
    /// Only states with at least one flag-labelled arc.
    FlagStates,
}

#[derive(Debug)]
pub(crate) struct StateIndex {
    /// Indexed by symbol id; arc offsets in stored order. Flag-labelled
    /// arcs are filed under EPSILON, as they consume no input either.
    by_symbol: Vec<Vec<u32>>,
}

/// Iteration position inside a state's candidate lists: the epsilon list,
/// then the sought token's list, then (for IDENTITY seeks) the UNKNOWN
/// list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct IndexCursor {
    phase: u8,
    at: usize,
}

impl IndexCursor {
    pub(crate) fn bump(self) -> Self {
        Self {
            phase: self.phase,
            at: self.at + 1,
        }
    }
}

impl StateIndex {
    /// The first candidate arc at or after `cur` for the sought symbol
    /// (`None` once input is exhausted: only the epsilon list applies).
    pub(crate) fn candidate(
        &self,
        mut cur: IndexCursor,
        seek: Option<SymbolId>,
    ) -> Option<(IndexCursor, u32)> {
        loop {
            let list = match cur.phase {
                0 => Some(&self.by_symbol[EPSILON as usize]),
                1 => seek.map(|k| &self.by_symbol[k as usize]),
                2 => match seek {
                    Some(IDENTITY) => Some(&self.by_symbol[UNKNOWN as usize]),
                    _ => None,
                },
                _ => return None,
            };
            if let Some(list) = list {
                if let Some(&arc) = list.get(cur.at) {
                    return Some((cur, arc));
                }
            }
            cur = IndexCursor {
                phase: cur.phase + 1,
                at: 0,
            };
        }
    }
}

/// One direction's index over an automaton.
#[derive(Debug)]
pub struct ArcIndex {
    states: Vec<Option<StateIndex>>,
}

impl ArcIndex {
    pub(crate) fn build(
        net: &Automaton,
        map: &StateMap,
        flags: Option<&FlagTable>,
        key: SortKey,
        policy: &IndexPolicy,
    ) -> ArcIndex {
        let arcs = net.arcs();
        let sigma_size = net.alphabet().len();
        let keyed = |offset: usize| match key {
            SortKey::Input => arcs[offset].input,
            SortKey::Output => arcs[offset].output,
        };

        let arc_count = |state: usize| {
            (map.first(state)..map.end(state))
                .filter(|&i| arcs[i].target != -1)
                .count()
        };
        let mut selected: Vec<usize> = match policy {
            IndexPolicy::MinArcs(n) => (0..net.state_count())
                .filter(|&s| arc_count(s) >= *n)
                .collect(),
            IndexPolicy::FlagStates => match flags {
                Some(flags) => (0..net.state_count())
                    .filter(|&s| {
                        (map.first(s)..map.end(s))
                            .any(|i| arcs[i].target != -1 && flags.is_flag(keyed(i)))
                    })
                    .collect(),
                None => Vec::new(),
            },
            IndexPolicy::Memory(budget) => {
                let per_state = sigma_size * std::mem::size_of::<Vec<u32>>();
                let mut dense: Vec<usize> = (0..net.state_count()).collect();
                dense.sort_by_key(|&s| std::cmp::Reverse(arc_count(s)));
                dense
                    .into_iter()
                    .take(budget / per_state.max(1))
                    .filter(|&s| arc_count(s) > 0)
                    .collect()
            }
        };
        selected.sort_unstable();

        let mut states: Vec<Option<StateIndex>> = (0..net.state_count()).map(|_| None).collect();
        for &state in &selected {
            let mut by_symbol = vec![Vec::new(); sigma_size];
            for i in map.first(state)..map.end(state) {
                if arcs[i].target == -1 {
                    continue;
                }
                let mut sym = keyed(i);
                if flags.map_or(false, |f| f.is_flag(sym)) {
                    sym = EPSILON;
                }
                by_symbol[sym as usize].push(i as u32);
            }
            states[state] = Some(StateIndex { by_symbol });
        }
        debug!(
            "arc index: {} of {} states indexed ({:?})",
            selected.len(),
            net.state_count(),
            policy
        );
        ArcIndex { states }
    }

    #[inline]
    pub(crate) fn state(&self, state: usize) -> Option<&StateIndex> {
        self.states.get(state)?.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::automaton::AutomatonBuilder;

    fn fan_net() -> (Automaton, Vec<SymbolId>) {
        let mut alpha = Alphabet::new();
        let ids: Vec<_> = ["a", "b", "c"].iter().map(|s| alpha.intern(s)).collect();
        let mut builder = AutomatonBuilder::new(alpha);
        builder
            .arc(0, ids[0], ids[0], 1)
            .arc(0, ids[1], ids[1], 1)
            .arc(0, EPSILON, ids[2], 1)
            .arc(1, ids[2], ids[2], 1)
            .final_state(1);
        (builder.build().unwrap(), ids)
    }

    #[test]
    fn min_arcs_selects_dense_states() {
        let (net, ids) = fan_net();
        let map = StateMap::new(&net);
        let idx = ArcIndex::build(&net, &map, None, SortKey::Input, &IndexPolicy::MinArcs(2));
        assert!(idx.state(0).is_some());
        assert!(idx.state(1).is_none());

        let s0 = idx.state(0).unwrap();
        // epsilon arc first, then the sought symbol's arc
        let (cur, arc) = s0.candidate(IndexCursor::default(), Some(ids[1])).unwrap();
        assert_eq!(net.arcs()[arc as usize].input, EPSILON);
        let (_, arc) = s0.candidate(cur.bump(), Some(ids[1])).unwrap();
        assert_eq!(net.arcs()[arc as usize].input, ids[1]);
    }

    #[test]
    fn exhausted_input_only_offers_epsilon() {
        let (net, _) = fan_net();
        let map = StateMap::new(&net);
        let idx = ArcIndex::build(&net, &map, None, SortKey::Input, &IndexPolicy::MinArcs(1));
        let s0 = idx.state(0).unwrap();
        let (cur, arc) = s0.candidate(IndexCursor::default(), None).unwrap();
        assert_eq!(net.arcs()[arc as usize].input, EPSILON);
        assert!(s0.candidate(cur.bump(), None).is_none());
    }

    #[test]
    fn flag_states_policy_without_flags_indexes_nothing() {
        let (net, _) = fan_net();
        let map = StateMap::new(&net);
        let idx = ArcIndex::build(&net, &map, None, SortKey::Input, &IndexPolicy::FlagStates);
        assert!(idx.state(0).is_none());
        assert!(idx.state(1).is_none());
    }
}
