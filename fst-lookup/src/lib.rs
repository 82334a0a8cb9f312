//! Shared driver for the lookup tools: load a stack of automata from one
//! file, prepare them for an apply direction, and run input lines through
//! the whole chain.
//!
//! With several automata stacked, the default is to pass each input through
//! all of them, simulating composition; in alternates mode the automata are
//! tried head-first and the first one producing any result wins, simulating
//! priority union.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use fst_apply::{att, Applicator, ApplyConfig, Automaton, Direction, IndexPolicy, SortKey};
use log::debug;

/// Parses an arc-index argument: `f` indexes flag-containing states, a bare
/// number indexes states with at least that many arcs, and a number with a
/// `k`/`m` suffix indexes the densest states within that memory cap.
pub fn parse_index_policy(spec: &str) -> Result<IndexPolicy> {
    if spec == "f" {
        return Ok(IndexPolicy::FlagStates);
    }
    let lower = spec.to_ascii_lowercase();
    if let Some(num) = lower.strip_suffix('k') {
        let n: usize = num
            .parse()
            .with_context(|| format!("bad arc-index spec {spec:?}"))?;
        return Ok(IndexPolicy::Memory(n * 1024));
    }
    if let Some(num) = lower.strip_suffix('m') {
        let n: usize = num
            .parse()
            .with_context(|| format!("bad arc-index spec {spec:?}"))?;
        return Ok(IndexPolicy::Memory(n * 1024 * 1024));
    }
    let n: usize = spec
        .parse()
        .with_context(|| format!("bad arc-index spec {spec:?}"))?;
    Ok(IndexPolicy::MinArcs(n))
}

/// Loads every automaton stacked in `path`.
pub fn load_nets(path: &Path) -> Result<Vec<Automaton>> {
    let nets =
        att::read_att_file(path).with_context(|| format!("cannot read {}", path.display()))?;
    ensure!(!nets.is_empty(), "{}: no automata in file", path.display());
    debug!("loaded {} automata from {}", nets.len(), path.display());
    Ok(nets)
}

/// Sorts arcs for the apply direction, unless sorting is disabled.
pub fn prepare_nets(nets: &mut [Automaton], direction: Direction, sort_arcs: bool) {
    if !sort_arcs {
        return;
    }
    let key = match direction {
        Direction::Down => SortKey::Input,
        Direction::Up => SortKey::Output,
    };
    for net in nets {
        if net.sorted() != Some(key) {
            net.sort_arcs(key);
        }
    }
}

/// Strips one trailing newline and/or carriage return.
pub fn chomp(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// One session per automaton, in application order.
pub struct Chain<'n> {
    sessions: Vec<Applicator<'n>>,
    direction: Direction,
    alternates: bool,
}

impl<'n> Chain<'n> {
    pub fn new(
        nets: &'n [Automaton],
        direction: Direction,
        alternates: bool,
        config: ApplyConfig,
        index: Option<&IndexPolicy>,
    ) -> Self {
        let mut sessions: Vec<Applicator<'n>> = nets
            .iter()
            .map(|net| {
                let mut session = Applicator::builder(net).config(config.clone()).build();
                if let Some(policy) = index {
                    session.build_index(direction, policy);
                }
                session
            })
            .collect();
        // Composing on the upper tape runs the stack tail-first.
        if direction == Direction::Up && !alternates {
            sessions.reverse();
        }
        Self {
            sessions,
            direction,
            alternates,
        }
    }

    fn apply(&mut self, pos: usize, word: Option<&str>) -> Option<String> {
        let session = &mut self.sessions[pos];
        let result = match self.direction {
            Direction::Down => session.apply_down(word),
            Direction::Up => session.apply_up(word),
        };
        result.map(str::to_owned)
    }

    /// Every output of the chain for one input line.
    pub fn apply_line(&mut self, line: &str) -> Vec<String> {
        if self.alternates {
            self.apply_alternates(line)
        } else {
            self.apply_composed(line)
        }
    }

    fn apply_alternates(&mut self, line: &str) -> Vec<String> {
        for pos in 0..self.sessions.len() {
            let mut results = Vec::new();
            let mut next = self.apply(pos, Some(line));
            while let Some(result) = next {
                results.push(result);
                next = self.apply(pos, None);
            }
            if !results.is_empty() {
                return results;
            }
        }
        Vec::new()
    }

    /// Full backtracking composition: when a downstream automaton runs dry,
    /// pull the next result from the nearest upstream one and push forward
    /// again. Results are collected at the tail.
    fn apply_composed(&mut self, line: &str) -> Vec<String> {
        let last = self.sessions.len() - 1;
        let mut results = Vec::new();
        let mut pos = 0;
        let mut carry: Option<String> = Some(line.to_owned());
        loop {
            match self.apply(pos, carry.as_deref()) {
                Some(word) if pos == last => {
                    results.push(word);
                    carry = None;
                }
                Some(word) => {
                    carry = Some(word);
                    pos += 1;
                }
                None => {
                    if pos == 0 {
                        break;
                    }
                    pos -= 1;
                    carry = None;
                }
            }
        }
        results
    }
}
