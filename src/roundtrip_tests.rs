//! Randomized properties tying the parser to the normalized-source
//! emitter: pretty-printing the IR and re-parsing it must be lossless.

use quickcheck::quickcheck;

use crate::{emit, parse, Target};

/// Maps arbitrary bytes onto the instruction alphabet, dropping stray
/// `]`s and closing any loops left open, so every seed yields a program
/// that parses.
fn balanced_source(seed: &[u8]) -> Vec<u8> {
    let mut source = Vec::new();
    let mut depth = 0usize;
    for &b in seed {
        match b % 8 {
            0 => source.push(b'+'),
            1 => source.push(b'-'),
            2 => source.push(b'>'),
            3 => source.push(b'<'),
            4 => source.push(b','),
            5 => source.push(b'.'),
            6 => {
                source.push(b'[');
                depth += 1;
            }
            _ => {
                if depth > 0 {
                    source.push(b']');
                    depth -= 1;
                }
            }
        }
    }
    source.extend(std::iter::repeat(b']').take(depth));
    source
}

fn normalize(source: &[u8], tape_size: u16) -> Vec<u8> {
    let program = parse(source, tape_size).unwrap();
    let mut out = Vec::new();
    emit(&program, Target::Bf, &mut out).unwrap();
    out
}

quickcheck! {
    fn roundtrips_through_normalized_source(seed: Vec<u8>) -> bool {
        let source = balanced_source(&seed);
        let program = parse(&source, 3000).unwrap();
        let mut out = Vec::new();
        emit(&program, Target::Bf, &mut out).unwrap();
        parse(&out, 3000).unwrap() == program
    }

    fn normalization_is_idempotent(seed: Vec<u8>) -> bool {
        let source = balanced_source(&seed);
        let once = normalize(&source, 3000);
        normalize(&once, 3000) == once
    }

    fn parse_succeeds_iff_brackets_balance(seed: Vec<u8>) -> bool {
        // The raw alphabet mapping, without the balancing fixups.
        let source: Vec<u8> = seed.iter().map(|b| b"+-><,.[]"[(b % 8) as usize]).collect();
        let mut depth = 0i64;
        for &b in &source {
            match b {
                b'[' => depth += 1,
                b']' => depth -= 1,
                _ => (),
            }
            if depth < 0 {
                break;
            }
        }
        parse(&source, 3000).is_ok() == (depth == 0)
    }
}
