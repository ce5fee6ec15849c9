use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::config::CorpusConfig;

/// One input array, shared by the reference rule and the submission.
pub type TestCase = Vec<i64>;

/// Fixed cases that open every corpus, in this order.
pub const EDGE_CASES: [&[i64]; 10] = [
    &[],
    &[0],
    &[1],
    &[-1],
    &[0, 0],
    &[1, 1, 1],
    &[-1, -2, -3],
    &[1, 2, 3, 4, 5],
    &[5, 4, 3, 2, 1],
    &[1, 3, 2, 5, 4],
];

const SMALL_ARRAY_LENGTH: usize = 5;
const GEOMETRIC_MAX_LENGTH: usize = 8;

/// Build a corpus from a freshly drawn seed.
pub fn generate(config: &CorpusConfig) -> Vec<TestCase> {
    generate_seeded(config, rand::random())
}

/// Build the corpus for `seed`; equal seeds and configs give equal corpora.
pub fn generate_seeded(config: &CorpusConfig, seed: u64) -> Vec<TestCase> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut corpus: Vec<TestCase> = EDGE_CASES.iter().map(|c| c.to_vec()).collect();
    let random = config.num_tests.saturating_sub(EDGE_CASES.len());
    corpus.reserve(random);
    for i in 0..random {
        let case = match i % 5 {
            0 => uniform(&mut rng, config, config.max_array_length),
            1 => uniform(&mut rng, config, config.max_array_length.min(SMALL_ARRAY_LENGTH)),
            2 => pattern(&mut rng, config),
            3 => duplicates(&mut rng, config),
            _ => boundary(&mut rng, config),
        };
        corpus.push(case);
    }
    log::debug!("generated {} test cases (seed {seed})", corpus.len());
    corpus
}

/// Hex SHA-256 of a corpus, stable across runs and platforms.
pub fn corpus_fingerprint(corpus: &[TestCase]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((corpus.len() as u64).to_le_bytes());
    for case in corpus {
        hasher.update((case.len() as u64).to_le_bytes());
        for value in case {
            hasher.update(value.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Uniform draw from `lo..=hi`; an empty range collapses to `lo`.
fn int_in<R: Rng + ?Sized>(rng: &mut R, lo: i64, hi: i64) -> i64 {
    if hi <= lo {
        lo
    } else {
        rng.random_range(lo..=hi)
    }
}

fn value<R: Rng + ?Sized>(rng: &mut R, config: &CorpusConfig) -> i64 {
    int_in(rng, config.min_value, config.max_value)
}

/// Length for the strategies that never produce an empty array.
fn non_empty_length<R: Rng + ?Sized>(rng: &mut R, config: &CorpusConfig) -> usize {
    rng.random_range(1..=config.max_array_length.max(1))
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, config: &CorpusConfig, max_len: usize) -> TestCase {
    let len = rng.random_range(0..=max_len);
    (0..len).map(|_| value(rng, config)).collect()
}

fn pattern<R: Rng + ?Sized>(rng: &mut R, config: &CorpusConfig) -> TestCase {
    let len = non_empty_length(rng, config);
    match rng.random_range(0..4) {
        0 => {
            let start = int_in(rng, config.min_value, config.max_value / 2);
            let step = rng.random_range(1..=5i64);
            (0..len as i64)
                .map(|i| start.saturating_add(i.saturating_mul(step)))
                .collect()
        }
        1 => {
            let start = rng.random_range(1..=10i64);
            let ratio = rng.random_range(2..=3i64);
            let mut term = start;
            let mut out = Vec::with_capacity(GEOMETRIC_MAX_LENGTH);
            for _ in 0..len.min(GEOMETRIC_MAX_LENGTH) {
                out.push(term);
                term = term.saturating_mul(ratio);
            }
            out
        }
        2 => {
            let start_odd = rng.random_bool(0.5);
            (0..len)
                .map(|i| {
                    let odd = (i % 2 == 0) == start_odd;
                    let base = int_in(rng, 0, config.max_value / 2);
                    if odd {
                        base * 2 + 1
                    } else {
                        base * 2
                    }
                })
                .collect()
        }
        _ => {
            let all_even = rng.random_bool(0.5);
            (0..len)
                .map(|_| {
                    let base = int_in(rng, config.min_value / 2, config.max_value / 2);
                    if all_even {
                        base * 2
                    } else {
                        base * 2 + 1
                    }
                })
                .collect()
        }
    }
}

fn duplicates<R: Rng + ?Sized>(rng: &mut R, config: &CorpusConfig) -> TestCase {
    let len = non_empty_length(rng, config);
    let span = (config.max_value as i128 - config.min_value as i128 + 1).max(1);
    let wanted = len.div_ceil(2).min(usize::try_from(span).unwrap_or(usize::MAX));
    let mut seen = HashSet::with_capacity(wanted);
    let mut pool = Vec::with_capacity(wanted);
    while pool.len() < wanted {
        let v = value(rng, config);
        if seen.insert(v) {
            pool.push(v);
        }
    }
    (0..len)
        .map(|_| pool[rng.random_range(0..pool.len())])
        .collect()
}

fn boundary<R: Rng + ?Sized>(rng: &mut R, config: &CorpusConfig) -> TestCase {
    let len = non_empty_length(rng, config);
    let choices = [config.min_value, config.max_value, 0];
    (0..len)
        .map(|_| choices[rng.random_range(0..choices.len())])
        .collect()
}
