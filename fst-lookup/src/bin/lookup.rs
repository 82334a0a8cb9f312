use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use fst_apply::{ApplyConfig, Direction};
use fst_lookup::{chomp, load_nets, parse_index_policy, prepare_nets, Chain};

/// Applies words from stdin to automata read from a file and prints the
/// results to stdout.
///
/// If the file contains several automata, inputs are passed through all of
/// them (simulating composition), or applied as alternates with `-a`: the
/// first automaton that produces an output wins.
#[derive(Parser)]
#[command(name = "lookup", version, disable_version_flag = true)]
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

    /// Input/output separator.
    #[arg(short = 's', value_name = "SEP", default_value = "\t", hide_default_value = true)]
    separator: String,

    /// Word separator.
    #[arg(short = 'w', value_name = "SEP", default_value = "\n", hide_default_value = true)]
    word_separator: String,

    /// Do not echo the input string.
    #[arg(short = 'x')]
    no_echo: bool,

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
        let results = chain.apply_line(line);
        if results.is_empty() {
            print_result(&mut out, &args, line, "+?")?;
        } else {
            for result in &results {
                print_result(&mut out, &args, line, result)?;
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

fn print_result(out: &mut impl Write, args: &Args, input: &str, result: &str) -> io::Result<()> {
    if args.no_echo {
        writeln!(out, "{result}")
    } else {
        writeln!(out, "{input}{}{result}", args.separator)
    }
}
