//! Longest-match tokenization of input strings into symbol ids.
//!
//! Before a string is matched against an automaton, every position is
//! resolved to the longest alphabet symbol starting there. Byte sequences no
//! symbol covers become [`IDENTITY`] tokens spanning one UTF-8 character, so
//! any input tokenizes; there is no error case.

use aho_corasick::{AhoCorasick, Anchored, Input, MatchKind, StartKind};

use crate::alphabet::{Alphabet, SymbolId, EPSILON, IDENTITY};

/// One resolved input position: the symbol found there and how many bytes
/// matching it consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub sym: SymbolId,
    pub consumes: usize,
}

/// Anchored leftmost-longest matcher over the alphabet's concrete symbols
/// (flag diacritics included, as in the source automaton's alphabet).
#[derive(Debug)]
pub struct SigmaMatcher {
    ac: Option<AhoCorasick>,
    pattern_syms: Vec<SymbolId>,
}

impl SigmaMatcher {
    pub fn new(alphabet: &Alphabet) -> Self {
        let mut patterns = Vec::new();
        let mut pattern_syms = Vec::new();
        for (id, symbol) in alphabet.iter() {
            if !symbol.is_empty() {
                patterns.push(symbol);
                pattern_syms.push(id);
            }
        }
        let ac = if patterns.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .start_kind(StartKind::Anchored)
                    .build(&patterns)
                    .unwrap(),
            )
        };
        Self { ac, pattern_syms }
    }

    fn longest_at(&self, input: &str, pos: usize) -> Option<Token> {
        let ac = self.ac.as_ref()?;
        let m = ac.find(Input::new(input).range(pos..).anchored(Anchored::Yes))?;
        Some(Token {
            sym: self.pattern_syms[m.pattern().as_usize()],
            consumes: m.len(),
        })
    }

    /// The flat `position → (symbol, consumed)` array for `input`. Entries
    /// are written at token starts, stepping by the consumed length;
    /// positions inside a token keep a zero placeholder and are never read
    /// by the engine.
    pub fn tokenize(&self, input: &str) -> Vec<Token> {
        let n = input.len();
        let mut toks = vec![
            Token {
                sym: EPSILON,
                consumes: 0
            };
            n
        ];
        let mut i = 0;
        while i < n {
            let tok = match self.longest_at(input, i) {
                Some(t) if t.consumes > 0 => t,
                _ => Token {
                    sym: IDENTITY,
                    consumes: input[i..].chars().next().map_or(1, char::len_utf8),
                },
            };
            toks[i] = tok;
            i += tok.consumes;
        }
        toks
    }
}
