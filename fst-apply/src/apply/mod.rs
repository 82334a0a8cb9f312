//! The apply engine: runs a compiled transducer against input.
//!
//! A session ([`Applicator`]) binds one automaton and owns every piece of
//! mutable bookkeeping: the backtrack stack, per-state visit marks, the flag
//! feature map, the tokenized input and the output buffer. The automaton is
//! a shared immutable borrow, so several sessions may run over one automaton
//! in parallel.
//!
//! The traversal is a depth-first search with an explicit stack. Results are
//! pulled one at a time: a call yields the next result and leaves the stack
//! in place, and the following call resumes where the last one stopped.

use bitflags::bitflags;
use bon::bon;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::alphabet::{SymbolId, EPSILON, IDENTITY, UNKNOWN};
use crate::automaton::{Automaton, SortKey, StateMap};
use crate::flags::{FeatureSet, FlagRef, FlagShadow, FlagTable};
use crate::sigmatch::{SigmaMatcher, Token};

mod index;
pub use index::{ArcIndex, IndexPolicy};
use index::IndexCursor;

/// Run-time toggles of a session. No global state: every knob is carried
/// here and read nowhere else.
#[derive(Clone, Debug, bon::Builder)]
pub struct ApplyConfig {
    /// Whether flag diacritics gate traversal.
    #[builder(default = true)]
    pub obey_flags: bool,
    /// Whether flag symbols appear in emitted output.
    #[builder(default = false)]
    pub show_flags: bool,
    /// In matching modes, render arcs whose sides differ as `<upper:lower>`.
    #[builder(default = false)]
    pub print_pairs: bool,
    /// Append a space after every emitted symbol.
    #[builder(default = false)]
    pub print_space: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Which tape is read and which is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Read the input tape, write the output tape.
    Down,
    /// Read the output tape, write the input tape.
    Up,
}

bitflags! {
    /// Which tapes appear in enumerated output.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Tapes: u8 {
        const UPPER = 1 << 0;
        const LOWER = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    MatchString,
    Enumerate,
    Random,
}

/// One backtrack record: everything needed to restore the search to the
/// moment just before an arc was followed.
#[derive(Clone, Copy, Debug)]
struct Frame {
    /// The arc that was followed.
    arc: usize,
    /// Iteration position in the source state's index lists, when indexed.
    icursor: Option<IndexCursor>,
    ipos: usize,
    opos: usize,
    zeroes: usize,
    /// The source state's visit mark at push time.
    source_mark: i32,
    /// Prior feature state when the arc's flag mutated the map.
    shadow: Option<FlagShadow>,
}

/// An apply session over one automaton.
pub struct Applicator<'n> {
    net: &'n Automaton,
    map: StateMap,
    sigma: SigmaMatcher,
    flags: Option<FlagTable>,
    features: FeatureSet,
    config: ApplyConfig,
    rng: SmallRng,

    marks: Vec<i32>,
    stack: Vec<Frame>,
    out: String,
    input: String,
    toks: Vec<Token>,
    index_in: Option<ArcIndex>,
    index_out: Option<ArcIndex>,

    // Search cursor.
    ptr: usize,
    icursor: Option<IndexCursor>,
    ipos: usize,
    opos: usize,
    /// Consecutive zero-consuming advances on the current path.
    zeroes: usize,

    // Active mode.
    dir: Direction,
    kind: Kind,
    tapes: Tapes,
    binsearch: bool,
    indexed: bool,
    /// A search is live and the next call resumes it.
    running: bool,
    /// The enumeration ran to exhaustion; further calls yield nothing until
    /// the enumerator is reset.
    done: bool,
}

#[bon]
impl<'n> Applicator<'n> {
    /// Binds a session to `net`. A `seed` makes Random mode reproducible;
    /// without one the generator is seeded from the OS.
    #[builder]
    pub fn new(
        #[builder(start_fn)] net: &'n Automaton,
        #[builder(default)] config: ApplyConfig,
        seed: Option<u64>,
    ) -> Self {
        let map = StateMap::new(net);
        let sigma = SigmaMatcher::new(net.alphabet());
        let flags = FlagTable::scan(net.alphabet());
        let features = FeatureSet::new(flags.as_ref().map_or(0, FlagTable::feature_count));
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            net,
            map,
            sigma,
            flags,
            features,
            config,
            rng,
            marks: vec![0; net.state_count()],
            stack: Vec::new(),
            out: String::new(),
            input: String::new(),
            toks: Vec::new(),
            index_in: None,
            index_out: None,
            ptr: 0,
            icursor: None,
            ipos: 0,
            opos: 0,
            zeroes: 0,
            dir: Direction::Down,
            kind: Kind::Enumerate,
            tapes: Tapes::empty(),
            binsearch: false,
            indexed: false,
            running: false,
            done: false,
        }
    }
}

impl<'n> Applicator<'n> {
    /// Applies `word` downward (input tape → output tape). `None` continues
    /// the previous search and returns the next distinct result.
    pub fn apply_down(&mut self, word: Option<&str>) -> Option<&str> {
        self.apply_updown(Direction::Down, word)
    }

    /// Applies `word` upward (output tape → input tape).
    pub fn apply_up(&mut self, word: Option<&str>) -> Option<&str> {
        self.apply_updown(Direction::Up, word)
    }

    /// All results of applying `word` downward, as an iterator.
    pub fn down<'a>(&'a mut self, word: &str) -> Results<'a, 'n> {
        Results {
            ap: self,
            dir: Direction::Down,
            word: Some(word.to_owned()),
        }
    }

    /// All results of applying `word` upward, as an iterator.
    pub fn up<'a>(&'a mut self, word: &str) -> Results<'a, 'n> {
        Results {
            ap: self,
            dir: Direction::Up,
            word: Some(word.to_owned()),
        }
    }

    /// The next word pair of the automaton's language, rendered as
    /// `upper:lower` (or once, when both sides agree).
    pub fn words(&mut self) -> Option<&str> {
        self.enumerate(Kind::Enumerate, Tapes::all())
    }

    /// The next upper-side word of the language.
    pub fn upper_words(&mut self) -> Option<&str> {
        self.enumerate(Kind::Enumerate, Tapes::UPPER)
    }

    /// The next lower-side word of the language.
    pub fn lower_words(&mut self) -> Option<&str> {
        self.enumerate(Kind::Enumerate, Tapes::LOWER)
    }

    /// One random accepted word pair; every call restarts.
    pub fn random_words(&mut self) -> Option<&str> {
        self.enumerate(Kind::Random, Tapes::all())
    }

    /// One random upper-side word.
    pub fn random_upper(&mut self) -> Option<&str> {
        self.enumerate(Kind::Random, Tapes::UPPER)
    }

    /// One random lower-side word.
    pub fn random_lower(&mut self) -> Option<&str> {
        self.enumerate(Kind::Random, Tapes::LOWER)
    }

    /// Forgets the enumeration cursor; the next enumeration call restarts
    /// from the beginning.
    pub fn reset_enumerator(&mut self) {
        self.stack.clear();
        self.marks.fill(0);
        self.running = false;
        self.done = false;
    }

    /// Builds the arc index consulted when applying in `dir`.
    pub fn build_index(&mut self, dir: Direction, policy: &IndexPolicy) {
        let key = match dir {
            Direction::Down => SortKey::Input,
            Direction::Up => SortKey::Output,
        };
        let index = ArcIndex::build(self.net, &self.map, self.flags.as_ref(), key, policy);
        match dir {
            Direction::Down => self.index_in = Some(index),
            Direction::Up => self.index_out = Some(index),
        }
    }

    pub fn automaton(&self) -> &'n Automaton {
        self.net
    }

    fn apply_updown(&mut self, dir: Direction, word: Option<&str>) -> Option<&str> {
        if !self.net.has_finals() {
            return None;
        }
        match word {
            Some(word) => {
                self.dir = dir;
                self.kind = Kind::MatchString;
                self.tapes = Tapes::empty();
                self.binsearch = self.flags.is_none()
                    && self.net.sorted()
                        == Some(match dir {
                            Direction::Down => SortKey::Input,
                            Direction::Up => SortKey::Output,
                        });
                self.indexed = match dir {
                    Direction::Down => self.index_in.is_some(),
                    Direction::Up => self.index_out.is_some(),
                };
                self.input.clear();
                self.input.push_str(word);
                self.toks = self.sigma.tokenize(&self.input);
                self.start_fresh();
                self.run(false)
            }
            None => {
                if !self.running || self.kind != Kind::MatchString || self.dir != dir {
                    return None;
                }
                self.run(true)
            }
        }
    }

    fn enumerate(&mut self, kind: Kind, tapes: Tapes) -> Option<&str> {
        if !self.net.has_finals() {
            return None;
        }
        let same_mode =
            self.kind == kind && self.tapes == tapes && self.dir == Direction::Down;
        if kind != Kind::Random && same_mode {
            if self.running {
                return self.run(true);
            }
            if self.done {
                return None;
            }
        }
        self.dir = Direction::Down;
        self.kind = kind;
        self.tapes = tapes;
        self.binsearch = false;
        self.indexed = false;
        self.input.clear();
        self.toks.clear();
        self.start_fresh();
        self.run(false)
    }

    /// Clears all search bookkeeping for a fresh top-level call. The
    /// automaton itself is never touched.
    fn start_fresh(&mut self) {
        self.stack.clear();
        self.marks.fill(0);
        self.features.clear_all();
        self.out.clear();
        self.ptr = self.map.first(0);
        self.icursor = None;
        self.ipos = 0;
        self.opos = 0;
        self.zeroes = 0;
        self.running = false;
        self.done = false;
    }

    /// The traversal loop. Yields the next result, or `None` once the
    /// search space is exhausted (Random instead returns whatever the
    /// buffer holds at that point).
    fn run(&mut self, resume: bool) -> Option<&str> {
        enum Step {
            /// Arrived in a state: yield at finals.
            Enter,
            /// Re-entry bookkeeping: refuse loops, set the visit mark.
            Arrive,
            /// Follow the next arc out of the current state.
            Try,
            /// Pop one frame and continue behind the popped arc.
            Backtrack,
        }

        let net = self.net;
        let mut step = if resume { Step::Arrive } else { Step::Enter };
        loop {
            match step {
                Step::Enter => {
                    let here = net.arcs()[self.ptr];
                    if here.is_final
                        && (self.kind != Kind::MatchString || self.ipos == self.input.len())
                    {
                        if self.kind == Kind::Random {
                            // To end or not to end.
                            if self.rng.gen::<bool>() {
                                self.out.truncate(self.opos);
                                self.stack.clear();
                                self.running = false;
                                return Some(self.out.as_str());
                            }
                        } else {
                            self.out.truncate(self.opos);
                            self.running = true;
                            return Some(self.out.as_str());
                        }
                    }
                    step = Step::Arrive;
                }
                Step::Arrive => {
                    if self.refuse_entry() {
                        step = Step::Backtrack;
                    } else {
                        self.mark_state();
                        step = Step::Try;
                    }
                }
                Step::Try => {
                    if self.follow_next_arc() {
                        step = Step::Enter;
                    } else {
                        let state = net.arcs()[self.ptr].source;
                        self.marks[state as usize] = 0;
                        step = Step::Backtrack;
                    }
                }
                Step::Backtrack => {
                    let Some(frame) = self.stack.pop() else { break };
                    self.restore(frame);
                    if self.at_last_arc() {
                        let state = net.arcs()[self.ptr].source;
                        self.marks[state as usize] = 0;
                        // stay in Backtrack: pop the next frame
                    } else {
                        self.skip_this_arc();
                        step = Step::Try;
                    }
                }
            }
        }

        // Search space exhausted.
        self.running = false;
        self.done = true;
        if self.kind == Kind::Random {
            self.out.truncate(self.opos);
            return Some(self.out.as_str());
        }
        None
    }

    /// Cycle refusal on (re-)entering the current state. A state may be
    /// re-entered once per input position without consuming anything (its
    /// mark flips negative); the second zero-progress re-entry is refused —
    /// immediately when enumerating, and once the run of zero-consuming
    /// advances exceeds the remaining input when matching.
    fn refuse_entry(&self) -> bool {
        let state = self.net.arcs()[self.ptr].source as usize;
        let twice = self.marks[state] == -(self.ipos as i32 + 1);
        match self.kind {
            Kind::Random => false,
            Kind::Enumerate => twice,
            Kind::MatchString => twice && self.zeroes > self.input.len() - self.ipos + 1,
        }
    }

    /// 0 = unseen, +ipos+1 = seen at ipos, −(ipos+1) = seen again at ipos.
    fn mark_state(&mut self) {
        if self.kind == Kind::Random {
            return;
        }
        let state = self.net.arcs()[self.ptr].source as usize;
        let seen = self.ipos as i32 + 1;
        self.marks[state] = if self.marks[state] == seen { -seen } else { seen };
    }

    fn follow_next_arc(&mut self) -> bool {
        if self.kind == Kind::Random {
            return self.follow_random();
        }
        let state = self.net.arcs()[self.ptr].source as usize;
        if self.indexed && self.active_state_index(state).is_some() {
            self.follow_indexed()
        } else if self.binsearch {
            self.follow_binsearch()
        } else {
            self.follow_linear()
        }
    }

    fn follow_linear(&mut self) -> bool {
        let net = self.net;
        let arcs = net.arcs();
        let group_state = arcs[self.ptr].source;
        let mut cp = self.ptr;
        while arcs[cp].source == group_state && arcs[cp].input != -1 {
            let (sym_in, sym_out) = self.arc_syms(cp);
            let eatupi = self.match_symbol(sym_in);
            if eatupi >= 0 {
                let eatupi = eatupi as usize;
                if self.refuse_self_loop(cp, eatupi) {
                    cp += 1;
                    continue;
                }
                self.push_and_advance(cp, eatupi, sym_out);
                return true;
            }
            cp += 1;
        }
        false
    }

    fn follow_binsearch(&mut self) -> bool {
        let Some(cp) = self.binsearch_candidate() else {
            return false;
        };
        let (sym_in, sym_out) = self.arc_syms(cp);
        let eatupi = self.match_symbol(sym_in);
        if eatupi < 0 {
            return false;
        }
        let eatupi = eatupi as usize;
        if self.refuse_self_loop(cp, eatupi) {
            return false;
        }
        self.push_and_advance(cp, eatupi, sym_out);
        true
    }

    fn follow_indexed(&mut self) -> bool {
        let group_state = self.net.arcs()[self.ptr].source;
        let seek = (self.ipos < self.input.len()).then(|| self.toks[self.ipos].sym);
        let mut cur = self.icursor.unwrap_or_default();
        loop {
            let Some((found, arc)) = self
                .active_state_index(group_state as usize)
                .and_then(|s| s.candidate(cur, seek))
            else {
                return false;
            };
            let cp = arc as usize;
            let (sym_in, sym_out) = self.arc_syms(cp);
            let eatupi = self.match_symbol(sym_in);
            if eatupi >= 0 {
                let eatupi = eatupi as usize;
                if self.refuse_self_loop(cp, eatupi) {
                    cur = found.bump();
                    continue;
                }
                self.icursor = Some(found);
                self.push_and_advance(cp, eatupi, sym_out);
                return true;
            }
            cur = found.bump();
        }
    }

    /// Picks one arc uniformly at random from the remaining arcs of the
    /// group and follows it or gives up; no further arc is tried on this
    /// frame.
    fn follow_random(&mut self) -> bool {
        let net = self.net;
        let arcs = net.arcs();
        let group_state = arcs[self.ptr].source;
        let mut count = 0;
        while arcs[self.ptr + count].source == group_state
            && arcs[self.ptr + count].input != -1
        {
            count += 1;
        }
        if count == 0 {
            return false;
        }
        let cp = self.ptr + self.rng.gen_range(0..count);
        let (sym_in, sym_out) = self.arc_syms(cp);
        let eatupi = self.match_symbol(sym_in);
        if eatupi < 0 {
            return false;
        }
        let eatupi = eatupi as usize;
        if self.refuse_self_loop(cp, eatupi) {
            return false;
        }
        self.push_and_advance(cp, eatupi, sym_out);
        true
    }

    /// An arc that loops back to its own state without consuming input is
    /// refused outright. The matching flag check may already have run, so
    /// any feature write is rolled back on the spot.
    fn refuse_self_loop(&mut self, cp: usize, eatupi: usize) -> bool {
        if eatupi == 0 && self.net.arcs()[cp].target == self.net.arcs()[cp].source {
            if let Some(shadow) = self.features.take_shadow() {
                self.features.restore(shadow);
            }
            return true;
        }
        false
    }

    /// The next arc the sorted-arc fast path offers at or after the cursor:
    /// epsilon arcs in stored order first, then the run of arcs keyed by
    /// the token at the current input position (found by bisection unless
    /// the group is small or the token is IDENTITY).
    fn binsearch_candidate(&self) -> Option<usize> {
        let net = self.net;
        let arcs = net.arcs();
        let key = |i: usize| match self.dir {
            Direction::Down => arcs[i].input,
            Direction::Up => arcs[i].output,
        };
        let cp = self.ptr;
        let sym_at = key(cp);
        if sym_at == EPSILON {
            return Some(cp);
        }
        if sym_at == -1 || self.ipos >= self.input.len() {
            return None;
        }
        let seek = self.toks[self.ipos].sym;
        if seek == sym_at {
            return Some(cp);
        }
        let state = arcs[cp].source as usize;
        let last = self.map.end(state) - 1;
        let lo = cp + 1;
        if lo > last {
            return None;
        }
        if seek == IDENTITY || last - lo < 10 {
            for i in lo..=last {
                let k = key(i);
                if k == seek || (k == UNKNOWN && seek == IDENTITY) {
                    return Some(i);
                }
                if k == -1 || k > seek {
                    return None;
                }
            }
            return None;
        }
        let (mut lo, mut hi) = (lo, last);
        loop {
            if lo > hi {
                return None;
            }
            let mid = (lo + hi) / 2;
            let k = key(mid);
            if seek < k {
                hi = mid - 1;
            } else if seek > k {
                lo = mid + 1;
            } else {
                let mut first = mid;
                while first > lo && key(first - 1) == seek {
                    first -= 1;
                }
                return Some(first);
            }
        }
    }

    fn arc_syms(&self, cp: usize) -> (SymbolId, SymbolId) {
        let arc = self.net.arcs()[cp];
        match self.dir {
            Direction::Down => (arc.input, arc.output),
            Direction::Up => (arc.output, arc.input),
        }
    }

    /// Bytes of input consumed by matching `sym` at the current position,
    /// or -1 for no match. Flag checks consume nothing but may mutate the
    /// feature map (retrievable through its shadow).
    fn match_symbol(&mut self, sym: SymbolId) -> isize {
        if self.kind != Kind::MatchString {
            match self.flag_of(sym) {
                Some(flag) if self.config.obey_flags => {
                    return if self.features.check(&flag) { 0 } else { -1 };
                }
                _ => return 0,
            }
        }
        if sym == EPSILON {
            return 0;
        }
        if let Some(flag) = self.flag_of(sym) {
            if !self.config.obey_flags {
                return 0;
            }
            return if self.features.check(&flag) { 0 } else { -1 };
        }
        if self.ipos >= self.input.len() {
            return -1;
        }
        let tok = self.toks[self.ipos];
        if tok.sym == sym {
            return tok.consumes as isize;
        }
        // Anything outside the alphabet is matched by the automaton's
        // any-symbol arcs.
        if (sym == IDENTITY || sym == UNKNOWN) && tok.sym == IDENTITY {
            return tok.consumes as isize;
        }
        -1
    }

    fn push_and_advance(&mut self, cp: usize, eatupi: usize, emit_sym: SymbolId) {
        let net = self.net;
        let arc = net.arcs()[cp];
        let eatupo = self.emit(cp, emit_sym);
        let shadow = self.features.take_shadow();
        self.stack.push(Frame {
            arc: cp,
            icursor: self.icursor,
            ipos: self.ipos,
            opos: self.opos,
            zeroes: self.zeroes,
            source_mark: self.marks[arc.source as usize],
            shadow,
        });
        self.zeroes = if eatupi == 0 { self.zeroes + 1 } else { 0 };
        self.ptr = self.map.first(arc.target as usize);
        self.icursor = None;
        self.ipos += eatupi;
        self.opos += eatupo;
    }

    fn restore(&mut self, frame: Frame) {
        self.ptr = frame.arc;
        self.icursor = frame.icursor;
        self.ipos = frame.ipos;
        self.opos = frame.opos;
        self.zeroes = frame.zeroes;
        let source = self.net.arcs()[frame.arc].source as usize;
        self.marks[source] = frame.source_mark;
        if let Some(shadow) = frame.shadow {
            self.features.restore(shadow);
        }
        self.out.truncate(self.opos);
    }

    /// After a pop: was the restored arc the last one worth trying in its
    /// group? Indexed states always answer no and let the candidate walk
    /// decide.
    fn at_last_arc(&self) -> bool {
        if self.icursor.is_some() {
            return false;
        }
        let arcs = self.net.arcs();
        if arcs[self.ptr].source != arcs[self.ptr + 1].source {
            return true;
        }
        if self.binsearch && self.ipos < self.input.len() {
            let seek = self.toks[self.ipos].sym;
            let k = match self.dir {
                Direction::Down => arcs[self.ptr].input,
                Direction::Up => arcs[self.ptr].output,
            };
            if k == -1 || seek < k {
                return true;
            }
        }
        false
    }

    fn skip_this_arc(&mut self) {
        match self.icursor {
            Some(cur) => self.icursor = Some(cur.bump()),
            None => self.ptr += 1,
        }
    }

    /// Renders one followed arc into the output buffer at the current
    /// output position and returns the number of bytes written.
    fn emit(&mut self, cp: usize, emit_sym: SymbolId) -> usize {
        let net = self.net;
        let arc = net.arcs()[cp];
        let alpha = net.alphabet();
        let mut upper = alpha.display(arc.input);
        let mut lower = alpha.display(arc.output);
        if !self.config.show_flags {
            if self.is_flag(arc.input) {
                upper = "";
            }
            if self.is_flag(arc.output) {
                lower = "";
            }
        }

        self.out.truncate(self.opos);
        let start = self.out.len();
        match self.kind {
            Kind::Enumerate | Kind::Random => {
                if self.tapes == Tapes::all() {
                    if arc.input == arc.output {
                        self.out.push_str(upper);
                    } else {
                        self.out.push_str(upper);
                        self.out.push(':');
                        self.out.push_str(lower);
                    }
                } else {
                    let side = if self.tapes.contains(Tapes::UPPER) {
                        if arc.input == EPSILON {
                            ""
                        } else {
                            upper
                        }
                    } else if arc.output == EPSILON {
                        ""
                    } else {
                        lower
                    };
                    self.out.push_str(side);
                }
            }
            Kind::MatchString => {
                if self.config.print_pairs && arc.input != arc.output {
                    let unknown = self.input_char();
                    self.out.push('<');
                    match (arc.input == UNKNOWN && self.dir == Direction::Down, unknown) {
                        (true, Some(c)) => self.out.push(c),
                        _ => self.out.push_str(upper),
                    }
                    self.out.push(':');
                    match (arc.output == UNKNOWN && self.dir == Direction::Up, unknown) {
                        (true, Some(c)) => self.out.push(c),
                        _ => self.out.push_str(lower),
                    }
                    self.out.push('>');
                } else if emit_sym == IDENTITY {
                    // Echo the input character through the any-symbol arc.
                    if let Some(c) = self.input_char() {
                        self.out.push(c);
                    }
                } else if emit_sym == EPSILON {
                    // nothing
                } else {
                    let written = match self.dir {
                        Direction::Down => lower,
                        Direction::Up => upper,
                    };
                    self.out.push_str(written);
                }
            }
        }
        if self.config.print_space && self.out.len() > start {
            self.out.push(' ');
        }
        self.out.len() - start
    }

    fn input_char(&self) -> Option<char> {
        self.input[self.ipos..].chars().next()
    }

    fn flag_of(&self, sym: SymbolId) -> Option<FlagRef> {
        self.flags.as_ref()?.get(sym).copied()
    }

    fn is_flag(&self, sym: SymbolId) -> bool {
        self.flags.as_ref().is_some_and(|f| f.is_flag(sym))
    }

    fn active_state_index(&self, state: usize) -> Option<&index::StateIndex> {
        let idx = match self.dir {
            Direction::Down => self.index_in.as_ref(),
            Direction::Up => self.index_out.as_ref(),
        }?;
        idx.state(state)
    }
}

/// Iterator over the remaining results of one directional application.
pub struct Results<'a, 'n> {
    ap: &'a mut Applicator<'n>,
    dir: Direction,
    word: Option<String>,
}

impl Iterator for Results<'_, '_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let word = self.word.take();
        let result = match self.dir {
            Direction::Down => self.ap.apply_down(word.as_deref()),
            Direction::Up => self.ap.apply_up(word.as_deref()),
        };
        result.map(str::to_owned)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::automaton::AutomatonBuilder;

    /// Small construction helper: arcs as (source, in, out, target) over
    /// named symbols; reserved names "0", "?", "@" map to the reserved ids.
    fn net(arcs: &[(i32, &str, &str, i32)], finals: &[i32]) -> Automaton {
        let mut alpha = Alphabet::new();
        let id = |alpha: &mut Alphabet, s: &str| match s {
            "0" => EPSILON,
            "?" => UNKNOWN,
            "@" => IDENTITY,
            _ => alpha.intern(s),
        };
        let mut resolved = Vec::new();
        for &(source, i, o, target) in arcs {
            let i = id(&mut alpha, i);
            let o = id(&mut alpha, o);
            resolved.push((source, i, o, target));
        }
        let mut builder = AutomatonBuilder::new(alpha);
        for (source, i, o, target) in resolved {
            builder.arc(source, i, o, target);
        }
        for &f in finals {
            builder.final_state(f);
        }
        builder.build().unwrap()
    }

    fn session(net: &Automaton) -> Applicator<'_> {
        Applicator::builder(net).build()
    }

    fn all_down(ap: &mut Applicator, word: &str) -> Vec<String> {
        ap.down(word).collect()
    }

    fn all_up(ap: &mut Applicator, word: &str) -> Vec<String> {
        ap.up(word).collect()
    }

    #[test]
    fn simple_transducer() {
        let net = net(&[(0, "a", "b", 1)], &[1]);
        let mut ap = session(&net);
        assert_eq!(ap.apply_down(Some("a")), Some("b"));
        assert_eq!(ap.apply_down(None), None);
        assert_eq!(ap.apply_up(Some("b")), Some("a"));
        assert_eq!(ap.apply_up(None), None);
        assert_eq!(ap.apply_down(Some("b")), None);
    }

    #[test]
    fn epsilon_in_output() {
        let net = net(&[(0, "a", "0", 1)], &[1]);
        let mut ap = session(&net);
        assert_eq!(ap.apply_down(Some("a")), Some(""));
        assert_eq!(ap.apply_up(Some("")), Some("a"));
    }

    #[test]
    fn identity_echo_preserves_utf8() {
        let net = net(&[(0, "@", "@", 0)], &[0]);
        let mut ap = session(&net);
        assert_eq!(ap.apply_down(Some("xÿz")), Some("xÿz"));
        assert_eq!(ap.apply_down(None), None);
        assert!(ap.marks.iter().all(|&m| m == 0));
        assert!(ap.stack.is_empty());
    }

    #[test]
    fn flag_gating() {
        let _ = env_logger::builder().is_test(true).try_init();
        let ok = net(
            &[
                (0, "@U.Case.nom@", "@U.Case.nom@", 1),
                (1, "a", "a", 2),
                (2, "@R.Case.nom@", "@R.Case.nom@", 3),
                (3, "b", "b", 4),
            ],
            &[4],
        );
        let mut ap = session(&ok);
        assert_eq!(ap.apply_down(Some("ab")), Some("ab"));
        assert!(ap.features.is_clear() || ap.running);

        let bad = net(
            &[
                (0, "@U.Case.acc@", "@U.Case.acc@", 1),
                (1, "a", "a", 2),
                (2, "@R.Case.nom@", "@R.Case.nom@", 3),
                (3, "b", "b", 4),
            ],
            &[4],
        );
        let mut ap = session(&bad);
        assert_eq!(ap.apply_down(Some("ab")), None);
        assert!(ap.features.is_clear());

        // Without obeying flags the same path goes through.
        let mut ap = Applicator::builder(&bad)
            .config(ApplyConfig::builder().obey_flags(false).build())
            .build();
        assert_eq!(ap.apply_down(Some("ab")), Some("ab"));
    }

    #[test]
    fn flag_show_flags_renders_them() {
        let net = net(
            &[(0, "@P.F.x@", "@P.F.x@", 1), (1, "a", "a", 2)],
            &[2],
        );
        let mut ap = Applicator::builder(&net)
            .config(ApplyConfig::builder().show_flags(true).build())
            .build();
        assert_eq!(ap.apply_down(Some("a")), Some("@P.F.x@a"));
    }

    #[test]
    fn flag_rollback_across_branches() {
        // The first branch sets F and dead-ends; the second requires F to
        // still be absent.
        let net = net(
            &[(0, "@P.F.x@", "@P.F.x@", 1), (0, "@D.F@", "@D.F@", 2)],
            &[2],
        );
        let mut ap = session(&net);
        assert_eq!(ap.lower_words(), Some(""));
    }

    #[test]
    fn nondeterministic_results_in_stored_order() {
        let net = net(&[(0, "a", "x", 1), (0, "a", "y", 1)], &[1]);
        let mut ap = session(&net);
        assert_eq!(all_down(&mut ap, "a"), vec!["x", "y"]);
        assert_eq!(all_up(&mut ap, "y"), vec!["a"]);
        assert_eq!(ap.apply_down(Some("a")), Some("x"));
        assert_eq!(ap.apply_down(None), Some("y"));
        assert_eq!(ap.apply_down(None), None);
    }

    #[test]
    fn longest_match_tokenization() {
        let mut alpha = Alphabet::new();
        for s in ["a", "b", "ab", "X"] {
            alpha.intern(s);
        }
        let ab = alpha.id_of("ab").unwrap();
        let x = alpha.id_of("X").unwrap();
        let mut builder = AutomatonBuilder::new(alpha);
        builder.arc(0, ab, x, 1).final_state(1);
        let net = builder.build().unwrap();
        let mut ap = session(&net);
        assert_eq!(ap.apply_down(Some("ab")), Some("X"));
        assert_eq!(ap.apply_down(Some("a")), None);
    }

    #[test]
    fn unknown_and_identity_matching() {
        // ?:x consumes an out-of-alphabet character and rewrites it.
        let net = net(&[(0, "?", "x", 1)], &[1]);
        let mut ap = session(&net);
        assert_eq!(ap.apply_down(Some("q")), Some("x"));
        assert_eq!(ap.apply_down(Some("ÿ")), Some("x"));
        // a known symbol is not matched by the unknown arc
        assert_eq!(ap.apply_down(Some("x")), None);
    }

    #[test]
    fn enumerate_words_pairs_and_sides() {
        let net = net(&[(0, "a", "b", 1), (1, "c", "c", 2)], &[2]);
        let mut ap = session(&net);
        assert_eq!(ap.words(), Some("a:bc"));
        assert_eq!(ap.words(), None);
        assert_eq!(ap.words(), None); // exhausted until reset
        ap.reset_enumerator();
        assert_eq!(ap.upper_words(), Some("ac"));
        ap.reset_enumerator();
        assert_eq!(ap.lower_words(), Some("bc"));
    }

    #[test]
    fn enumerate_epsilon_renders_empty_on_single_side() {
        let net = net(&[(0, "a", "0", 1)], &[1]);
        let mut ap = session(&net);
        assert_eq!(ap.lower_words(), Some(""));
        ap.reset_enumerator();
        assert_eq!(ap.upper_words(), Some("a"));
        ap.reset_enumerator();
        assert_eq!(ap.words(), Some("a:0"));
    }

    #[test]
    fn enumeration_restarts_identically_after_reset() {
        let net = net(
            &[(0, "a", "a", 1), (0, "b", "b", 1), (1, "c", "c", 2)],
            &[2],
        );
        let mut ap = session(&net);
        let first: Vec<String> = std::iter::from_fn(|| ap.words().map(str::to_owned)).collect();
        assert_eq!(first, vec!["ac", "bc"]);
        ap.reset_enumerator();
        let second: Vec<String> = std::iter::from_fn(|| ap.words().map(str::to_owned)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_automaton_yields_nothing() {
        let net = net(&[(0, "a", "a", 1)], &[]);
        let mut ap = session(&net);
        assert_eq!(ap.apply_down(Some("a")), None);
        assert_eq!(ap.words(), None);
        assert_eq!(ap.random_words(), None);
    }

    #[test]
    fn epsilon_self_loop_terminates() {
        let looped = net(&[(0, "0", "0", 0)], &[]);
        let mut ap = session(&looped);
        assert_eq!(ap.words(), None);

        let accepting = net(&[(0, "0", "0", 0)], &[0]);
        let mut ap = session(&accepting);
        assert_eq!(ap.words(), Some(""));
        assert_eq!(ap.words(), None);
        assert_eq!(ap.apply_down(Some("")), Some(""));
        assert_eq!(ap.apply_down(None), None);
    }

    #[test]
    fn epsilon_cycle_is_traversed_once_per_position() {
        // 0 → 1 → 0 on epsilon, with an exit consuming "a". The cycle must
        // not hang either mode.
        let net = net(
            &[(0, "0", "x", 1), (1, "0", "0", 0), (0, "a", "a", 2)],
            &[2],
        );
        let mut ap = session(&net);
        let down = all_down(&mut ap, "a");
        assert!(down.contains(&"a".to_owned()));
        assert!(down.iter().all(|r| r.ends_with('a')));
        assert!(ap.stack.is_empty());
        assert!(ap.marks.iter().all(|&m| m == 0));
    }

    #[test]
    fn continuation_without_word_needs_matching_mode() {
        let net = net(&[(0, "a", "b", 1)], &[1]);
        let mut ap = session(&net);
        assert_eq!(ap.apply_down(None), None);
        assert_eq!(ap.apply_down(Some("a")), Some("b"));
        // direction switch does not resume the down search
        assert_eq!(ap.apply_up(None), None);
    }

    #[test]
    fn binary_search_agrees_with_linear_scan() {
        // A dense group (> 10 arcs) so the bisection path is exercised.
        let mut alpha = Alphabet::new();
        let syms: Vec<_> = (0..14)
            .map(|i| alpha.intern(&format!("s{i:02}")))
            .collect();
        let eps_out = alpha.intern("E");
        let mut builder = AutomatonBuilder::new(alpha);
        builder.arc(0, EPSILON, eps_out, 1);
        for (i, &s) in syms.iter().enumerate() {
            builder.arc(0, s, s, 1 + (i as i32 % 2));
        }
        builder.arc(1, syms[3], syms[3], 2);
        builder.final_state(1).final_state(2);
        let plain = builder.build().unwrap();
        let mut sorted = plain.clone();
        sorted.sort_arcs(SortKey::Input);

        for word in ["s13", "s03s03", "s00", "nope", "s07"] {
            let mut a = session(&plain);
            let mut b = session(&sorted);
            let mut left = all_down(&mut a, word);
            let mut right = all_down(&mut b, word);
            left.sort();
            right.sort();
            assert_eq!(left, right, "word {word:?}");
        }
    }

    #[test]
    fn arc_index_agrees_with_linear_scan() {
        let _ = env_logger::builder().is_test(true).try_init();
        let net = net(
            &[
                (0, "a", "a", 1),
                (0, "b", "b", 1),
                (0, "0", "z", 1),
                (0, "@", "@", 1),
                (1, "a", "A", 2),
            ],
            &[2],
        );
        for policy in [
            IndexPolicy::MinArcs(1),
            IndexPolicy::Memory(1 << 20),
            IndexPolicy::FlagStates,
        ] {
            for word in ["aa", "ba", "qa", "a", ""] {
                let mut plain = session(&net);
                let mut indexed = session(&net);
                indexed.build_index(Direction::Down, &policy);
                let mut left = all_down(&mut plain, word);
                let mut right = all_down(&mut indexed, word);
                left.sort();
                right.sort();
                assert_eq!(left, right, "policy {policy:?} word {word:?}");
            }
        }
    }

    #[test]
    fn indexed_flag_arcs_are_still_checked() {
        let net = net(
            &[
                (0, "@P.F.x@", "@P.F.x@", 1),
                (1, "@D.F@", "@D.F@", 2),
                (1, "a", "a", 2),
            ],
            &[2],
        );
        let mut ap = session(&net);
        ap.build_index(Direction::Down, &IndexPolicy::MinArcs(1));
        assert_eq!(all_down(&mut ap, "a"), vec!["a"]);
        assert_eq!(all_down(&mut ap, ""), Vec::<String>::new());
    }

    #[test]
    fn random_is_seeded_and_well_formed() {
        let net = net(&[(0, "a", "b", 1), (1, "c", "c", 2)], &[1, 2]);
        let mut ap = Applicator::builder(&net).seed(7).build();
        for _ in 0..20 {
            let word = ap.random_lower().unwrap().to_owned();
            assert!(
                ["", "b", "bc"].contains(&word.as_str()),
                "unexpected random word {word:?}"
            );
        }
        let mut a = Applicator::builder(&net).seed(42).build();
        let mut b = Applicator::builder(&net).seed(42).build();
        for _ in 0..10 {
            assert_eq!(
                a.random_words().map(str::to_owned),
                b.random_words().map(str::to_owned)
            );
        }
    }

    #[test]
    fn print_space_and_pairs() {
        let net = net(&[(0, "a", "b", 1), (1, "c", "c", 2)], &[2]);
        let mut ap = Applicator::builder(&net)
            .config(ApplyConfig::builder().print_space(true).build())
            .build();
        assert_eq!(ap.apply_down(Some("ac")), Some("b c "));

        let mut ap = Applicator::builder(&net)
            .config(ApplyConfig::builder().print_pairs(true).build())
            .build();
        assert_eq!(ap.apply_down(Some("ac")), Some("<a:b>c"));
    }

    #[test]
    fn pair_printing_substitutes_unknown_with_input_char() {
        let net = net(&[(0, "?", "x", 1)], &[1]);
        let mut ap = Applicator::builder(&net)
            .config(ApplyConfig::builder().print_pairs(true).build())
            .build();
        assert_eq!(ap.apply_down(Some("ÿ")), Some("<ÿ:x>"));
    }

    #[test]
    fn stack_and_marks_clean_between_yields() {
        let net = net(&[(0, "a", "x", 1), (0, "a", "y", 1)], &[1]);
        let mut ap = session(&net);
        assert!(ap.apply_down(Some("a")).is_some());
        assert!(!ap.stack.is_empty()); // suspended mid-search
        assert!(ap.apply_down(None).is_some());
        assert_eq!(ap.apply_down(None), None);
        assert!(ap.stack.is_empty());
        assert!(ap.marks.iter().all(|&m| m == 0));
    }
}
