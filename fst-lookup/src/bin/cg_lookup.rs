use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use fst_apply::{ApplyConfig, Direction};
use fst_lookup::{chomp, load_nets, parse_index_policy, prepare_nets, Chain};

/// Applies words from stdin to automata read from a file and prints the
/// results in constraint-grammar format: a `"<input>"` header per word
/// followed by one indented line per result.
#[derive(Parser)]
#[command(name = "cg-lookup", version, disable_version_flag = true)]
struct Args {
    /// Try alternatives in order of the automata loaded.
    #[arg(short = 'a')]
    alternates: bool,

    /// Unbuffered output: flush after each input word.
    #[arg(short = 'b')]
    unbuffered: bool,

    /// Inverse application: apply down instead of up.
    #[arg(short = 'i')]
    invert: bool,

    /// Index arcs: `f` indexes flag-containing states, `N` states with at
    /// least N arcs, `Nk`/`Nm` the densest states within a memory cap.
    #[arg(short = 'I', value_name = "SPEC")]
    index: Option<String>,

    /// Do not sort arcs before applying.
    #[arg(short = 'q')]
    no_sort: bool,

    /// Mark readings of words with an uppercase first letter with ` <*>`.
    #[arg(short = 'u')]
    mark_uppercase: bool,

    /// Word separator.
    #[arg(short = 'w', value_name = "SEP", default_value = "", hide_default_value = true)]
    word_separator: String,

    /// Print version number.
    #[arg(short = 'v', action = ArgAction::Version)]
    version: Option<bool>,

    /// Automaton file.
    file: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let direction = if args.invert {
        Direction::Down
    } else {
        Direction::Up
    };

    let mut nets = load_nets(&args.file)?;
    prepare_nets(&mut nets, direction, !args.no_sort);
    let policy = args.index.as_deref().map(parse_index_policy).transpose()?;
    let mut chain = Chain::new(
        &nets,
        direction,
        args.alternates,
        ApplyConfig::default(),
        policy.as_ref(),
    );

    let stdin = io::stdin().lock();
    let mut out = io::BufWriter::new(io::stdout().lock());
    for line in stdin.lines() {
        let line = line?;
        let line = chomp(&line);
        if line.is_empty() {
            continue;
        }
        let results = chain.apply_line(line);
        writeln!(out, "\"<{line}>\"")?;
        let mark = args.mark_uppercase && line.chars().next().is_some_and(char::is_uppercase);
        for result in &results {
            if mark {
                writeln!(out, "\t{result} <*>")?;
            } else {
                writeln!(out, "\t{result}")?;
            }
        }
        write!(out, "{}", args.word_separator)?;
        if args.unbuffered {
            out.flush()?;
        }
    }
    out.flush()?;
    Ok(())
}
