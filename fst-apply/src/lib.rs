/*!
A runtime for compiled finite-state transducers: bind a session to an
automaton and apply words in either direction, enumerate the language, or
sample it at random.

## Features
- Directional application (`apply down` / `apply up`) with pull-based
  continuation: each call returns the next distinct result.
- Longest-match tokenization of input over a multi-character alphabet, with
  out-of-alphabet byte sequences handled through the any-symbol arcs.
- Flag diacritics (`@U.Case.nom@` and friends) with exact rollback under
  backtracking.
- Word enumeration (pairs or one tape) and random sampling.
- Per-state arc acceleration: binary search over sorted arc groups, or an
  optional dense arc index for the heaviest states.

## Usage
```
use fst_apply::{Alphabet, Applicator, AutomatonBuilder};

let mut alphabet = Alphabet::new();
let a = alphabet.intern("a");
let b = alphabet.intern("b");
let mut builder = AutomatonBuilder::new(alphabet);
builder.arc(0, a, b, 1).final_state(1);
let net = builder.build().unwrap();

let mut session = Applicator::builder(&net).build();
assert_eq!(session.apply_down(Some("a")), Some("b"));
assert_eq!(session.apply_down(None), None);
assert_eq!(session.apply_up(Some("b")), Some("a"));
```

Automata are produced elsewhere (a compiler, or the text format in [`att`])
and are only borrowed by sessions; two sessions over one automaton may run
on different threads.
*/

pub mod alphabet;
pub mod apply;
pub mod att;
pub mod automaton;
pub mod flags;
pub mod sigmatch;

pub use alphabet::{Alphabet, SymbolId, EPSILON, IDENTITY, UNKNOWN};
pub use apply::{Applicator, ApplyConfig, ArcIndex, Direction, IndexPolicy, Results, Tapes};
pub use automaton::{
    Automaton, AutomatonBuilder, AutomatonError, SortKey, StateMap, Transition,
};

#[cfg(test)]
mod tests {
    use crate::att;
    use crate::{Applicator, Direction, SortKey};

    /// Loading, sorting and applying through the public surface only.
    #[test]
    fn text_format_to_lookup() {
        let text = "0\t1\tc\ta\n1\t2\ta\tn\n2\t3\tt\t@0@\n3\n";
        let mut nets = att::read_att(text.as_bytes()).unwrap();
        let net = &mut nets[0];
        net.sort_arcs(SortKey::Input);

        let mut session = Applicator::builder(&*net).build();
        assert_eq!(session.apply_down(Some("cat")), Some("an"));
        assert_eq!(session.apply_up(Some("an")), Some("cat"));

        session.build_index(Direction::Down, &crate::IndexPolicy::MinArcs(1));
        assert_eq!(session.apply_down(Some("cat")), Some("an"));
    }
}
