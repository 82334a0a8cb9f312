//! Tab-separated text interchange for automata.
//!
//! Arc lines are `source TAB target TAB input TAB output`; a line with a
//! single field declares a final state. The reserved symbols are spelled
//! `@0@` (epsilon), `@_UNKNOWN_@` and `@_IDENTITY_@`. A line containing
//! only `--` separates stacked automata in one file, with state numbering
//! restarting per automaton. State 0 is the start state.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use thiserror::Error;

use crate::alphabet::{Alphabet, SymbolId, EPSILON, IDENTITY, UNKNOWN};
use crate::automaton::{Automaton, AutomatonBuilder, AutomatonError};

const EPSILON_SPELLING: &str = "@0@";
const UNKNOWN_SPELLING: &str = "@_UNKNOWN_@";
const IDENTITY_SPELLING: &str = "@_IDENTITY_@";

#[derive(Debug, Error)]
pub enum AttError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },
    #[error("line {line}: {source}")]
    Automaton {
        line: usize,
        source: AutomatonError,
    },
}

fn parse_err(line: usize, msg: impl Into<String>) -> AttError {
    AttError::Parse {
        line,
        msg: msg.into(),
    }
}

fn intern_spelled(alphabet: &mut Alphabet, symbol: &str) -> SymbolId {
    match symbol {
        EPSILON_SPELLING => EPSILON,
        UNKNOWN_SPELLING => UNKNOWN,
        IDENTITY_SPELLING => IDENTITY,
        _ => alphabet.intern(symbol),
    }
}

fn spell(alphabet: &Alphabet, id: SymbolId) -> &str {
    match id {
        EPSILON => EPSILON_SPELLING,
        UNKNOWN => UNKNOWN_SPELLING,
        IDENTITY => IDENTITY_SPELLING,
        _ => alphabet.symbol(id).unwrap_or(EPSILON_SPELLING),
    }
}

/// Reads every automaton in the stream.
pub fn read_att(reader: impl BufRead) -> Result<Vec<Automaton>, AttError> {
    let mut nets = Vec::new();
    let mut builder: Option<AutomatonBuilder> = None;
    let mut segment_start = 1;

    let mut finish =
        |builder: &mut Option<AutomatonBuilder>, start: usize| -> Result<(), AttError> {
            if let Some(mut b) = builder.take() {
                nets.push(b.build().map_err(|source| AttError::Automaton {
                    line: start,
                    source,
                })?);
            }
            Ok(())
        };

    for (idx, line) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let line = line?;
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }
        if line == "--" {
            finish(&mut builder, segment_start)?;
            segment_start = lineno + 1;
            continue;
        }
        let builder = builder.get_or_insert_with(|| AutomatonBuilder::new(Alphabet::new()));
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            [state] => {
                let state = state
                    .parse::<i32>()
                    .map_err(|_| parse_err(lineno, format!("bad final state {state:?}")))?;
                builder.final_state(state);
            }
            [source, target, input, output] => {
                let source = source
                    .parse::<i32>()
                    .map_err(|_| parse_err(lineno, format!("bad source state {source:?}")))?;
                let target = target
                    .parse::<i32>()
                    .map_err(|_| parse_err(lineno, format!("bad target state {target:?}")))?;
                let input = intern_spelled(builder.alphabet_mut(), input);
                let output = intern_spelled(builder.alphabet_mut(), output);
                builder.arc(source, input, output, target);
            }
            _ => {
                return Err(parse_err(
                    lineno,
                    format!("expected 1 or 4 tab-separated fields, got {}", fields.len()),
                ))
            }
        }
    }
    finish(&mut builder, segment_start)?;
    Ok(nets)
}

/// Reads every automaton in a file.
pub fn read_att_file(path: impl AsRef<Path>) -> Result<Vec<Automaton>, AttError> {
    let file = File::open(path)?;
    read_att(BufReader::new(file))
}

/// Writes one automaton; the inverse of [`read_att`].
pub fn write_att(net: &Automaton, writer: &mut impl Write) -> io::Result<()> {
    let alphabet = net.alphabet();
    let mut finals = Vec::new();
    let mut last_state = -1;
    for arc in net.arcs() {
        if arc.source == -1 {
            break;
        }
        if arc.source != last_state {
            last_state = arc.source;
            if arc.is_final {
                finals.push(arc.source);
            }
        }
        if arc.target == -1 {
            continue;
        }
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            arc.source,
            arc.target,
            spell(alphabet, arc.input),
            spell(alphabet, arc.output),
        )?;
    }
    for state in finals {
        writeln!(writer, "{state}")?;
    }
    Ok(())
}

/// Writes a stack of automata separated by `--` lines.
pub fn write_att_stack(nets: &[Automaton], writer: &mut impl Write) -> io::Result<()> {
    for (i, net) in nets.iter().enumerate() {
        if i > 0 {
            writeln!(writer, "--")?;
        }
        write_att(net, writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::apply::Applicator;

    #[test]
    fn read_single_net() {
        let text = "0\t1\ta\tb\n1\n";
        let nets = read_att(text.as_bytes()).unwrap();
        assert_eq!(nets.len(), 1);
        let mut ap = Applicator::builder(&nets[0]).build();
        assert_eq!(ap.apply_down(Some("a")), Some("b"));
    }

    #[test]
    fn read_reserved_spellings() {
        let text = "0\t1\ta\t@0@\n1\t2\t@_IDENTITY_@\t@_IDENTITY_@\n2\n";
        let nets = read_att(text.as_bytes()).unwrap();
        let mut ap = Applicator::builder(&nets[0]).build();
        assert_eq!(ap.apply_down(Some("aq")), Some("q"));
    }

    #[test]
    fn read_stacked_nets() {
        let text = "0\t1\ta\tb\n1\n--\n0\t1\tb\tc\n1\n";
        let nets = read_att(text.as_bytes()).unwrap();
        assert_eq!(nets.len(), 2);
        let mut ap = Applicator::builder(&nets[1]).build();
        assert_eq!(ap.apply_down(Some("b")), Some("c"));
    }

    #[test]
    fn parse_errors_carry_line_numbers() {
        let err = read_att("0\t1\ta\tb\nnot-a-state\n".as_bytes()).unwrap_err();
        match err {
            AttError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other:?}"),
        }
        let err = read_att("0\t1\ta\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AttError::Parse { line: 1, .. }));
    }

    #[test]
    fn round_trip() {
        let text = "0\t1\ta\tb\n0\t1\t@0@\tc\n1\t0\tb\tb\n1\n--\n0\n";
        let nets = read_att(text.as_bytes()).unwrap();
        let mut buf = Vec::new();
        write_att_stack(&nets, &mut buf).unwrap();
        let reread = read_att(buf.as_slice()).unwrap();
        assert_eq!(nets.len(), reread.len());
        for (a, b) in nets.iter().zip(&reread) {
            assert_eq!(a.arcs(), b.arcs());
            assert_eq!(a.final_count(), b.final_count());
        }
    }
}
