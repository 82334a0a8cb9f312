//! cargo run --example basic
use fst_apply::{Alphabet, Applicator, AutomatonBuilder};

fn main() {
    // k a t : c a t  plus an epenthetic tag on the lower side
    let mut alphabet = Alphabet::new();
    let k = alphabet.intern("k");
    let c = alphabet.intern("c");
    let a = alphabet.intern("a");
    let t = alphabet.intern("t");
    let tag = alphabet.intern("+Noun");

    let mut builder = AutomatonBuilder::new(alphabet);
    builder
        .arc(0, k, c, 1)
        .arc(1, a, a, 2)
        .arc(2, t, t, 3)
        .arc(3, fst_apply::EPSILON, tag, 4)
        .final_state(4);
    let net = builder.build().unwrap();

    let mut session = Applicator::builder(&net).build();
    println!("kat ↓ {:?}", session.down("kat").collect::<Vec<_>>());
    println!("cat+Noun ↑ {:?}", session.up("cat+Noun").collect::<Vec<_>>());

    while let Some(pair) = session.words().map(str::to_owned) {
        println!("pair: {pair}");
    }
}
