use std::fmt;
use std::str::FromStr;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::oracle::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    /// Checks granted before penalties start; also the number of examples shown.
    pub fn free_checks(self) -> u32 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Medium => 2,
            Difficulty::Hard => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Difficulty::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown difficulty '{s}' (expected easy, medium or hard)"))
    }
}

/// A hidden reference rule.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub difficulty: Difficulty,
    pub description: &'static str,
    pub hint: &'static str,
    pub examples: &'static [&'static [i64]],
    pub test: fn(&[i64]) -> bool,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("difficulty", &self.difficulty)
            .finish_non_exhaustive()
    }
}

impl Predicate for Rule {
    fn holds(&self, input: &[i64]) -> bool {
        (self.test)(input)
    }
}

/// Lookup interface over the set of reference rules.
pub trait RuleCatalog {
    fn lookup(&self, name: &str) -> Option<Rule>;
    fn pick_random(&self, difficulty: Option<Difficulty>) -> Option<Rule>;
}

/// The rules shipped with the game.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalog;

impl BuiltinCatalog {
    pub fn rules(&self) -> &'static [Rule] {
        RULES
    }
}

impl RuleCatalog for BuiltinCatalog {
    fn lookup(&self, name: &str) -> Option<Rule> {
        RULES.iter().find(|r| r.name == name).copied()
    }

    fn pick_random(&self, difficulty: Option<Difficulty>) -> Option<Rule> {
        let pool: Vec<&Rule> = RULES
            .iter()
            .filter(|r| difficulty.map_or(true, |d| r.difficulty == d))
            .collect();
        pool.choose(&mut rand::rng()).map(|r| **r)
    }
}

/// Deterministic Miller-Rabin; these witnesses cover every `u64`.
pub(crate) fn is_prime(n: i64) -> bool {
    const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    let Ok(n) = u64::try_from(n) else {
        return false;
    };
    if n < 2 {
        return false;
    }
    for p in WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }
    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }
    'witness: for a in WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut acc = 1;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    acc
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    i64::try_from(a).unwrap_or(i64::MAX)
}

fn adjacent(arr: &[i64], ok: impl Fn(i64, i64) -> bool) -> bool {
    arr.windows(2).all(|w| ok(w[0], w[1]))
}

fn sum(arr: &[i64]) -> i64 {
    arr.iter().fold(0i64, |acc, n| acc.saturating_add(*n))
}

fn fibonacci(arr: &[i64]) -> bool {
    match arr.len() {
        0 | 1 => true,
        2 => arr[0] + arr[1] >= 0,
        _ => arr.windows(3).all(|w| w[2] == w[0] + w[1]),
    }
}

fn arithmetic(arr: &[i64]) -> bool {
    arr.len() <= 2 || adjacent(&arr[1..], |a, b| b - a == arr[1] - arr[0])
}

/// Ratios are compared as doubles, the way a submission computes them.
fn geometric(arr: &[i64]) -> bool {
    if arr.len() <= 2 {
        return true;
    }
    if arr[0] == 0 {
        return false;
    }
    let ratio = arr[1] as f64 / arr[0] as f64;
    adjacent(&arr[1..], |a, b| a != 0 && b as f64 / a as f64 == ratio)
}

fn counts(arr: &[i64]) -> Vec<usize> {
    let mut seen: Vec<(i64, usize)> = Vec::new();
    for n in arr {
        match seen.iter_mut().find(|(v, _)| v == n) {
            Some((_, c)) => *c += 1,
            None => seen.push((*n, 1)),
        }
    }
    seen.into_iter().map(|(_, c)| c).collect()
}

fn mountain(arr: &[i64]) -> bool {
    if arr.len() < 3 {
        return false;
    }
    let last = arr.len() - 1;
    let mut i = 0;
    while i < last && arr[i] < arr[i + 1] {
        i += 1;
    }
    if i == 0 || i == last {
        return false;
    }
    while i < last && arr[i] > arr[i + 1] {
        i += 1;
    }
    i == last
}

fn balanced(arr: &[i64]) -> bool {
    let mut balance = 0i64;
    for n in arr {
        balance += n.signum();
        if balance < 0 {
            return false;
        }
    }
    balance == 0
}

fn perfect_square(n: i64) -> bool {
    if n < 0 {
        return false;
    }
    let root = (n as f64).sqrt() as i64;
    (root.saturating_sub(1)..=root + 1).any(|r| r >= 0 && r * r == n)
}

fn digit_sum(n: i64) -> u64 {
    let mut n = n.unsigned_abs();
    let mut total = 0;
    while n > 0 {
        total += n % 10;
        n /= 10;
    }
    total
}

fn circular_sorted(arr: &[i64]) -> bool {
    if arr.len() <= 1 {
        return true;
    }
    let drops = (0..arr.len())
        .filter(|&i| arr[i] > arr[(i + 1) % arr.len()])
        .count();
    drops <= 1
}

static RULES: &[Rule] = &[
    // easy
    Rule {
        name: "all-positive",
        difficulty: Difficulty::Easy,
        description: "All numbers must be positive",
        hint: "The rule involves checking a property of each number",
        examples: &[&[1, 2, 3, 4]],
        test: |arr| arr.iter().all(|n| *n > 0),
    },
    Rule {
        name: "all-even",
        difficulty: Difficulty::Easy,
        description: "All numbers must be even",
        hint: "The rule involves checking a mathematical property of numbers",
        examples: &[&[2, 4, 6, 8]],
        test: |arr| arr.iter().all(|n| n % 2 == 0),
    },
    Rule {
        name: "strictly-increasing",
        difficulty: Difficulty::Easy,
        description: "Array must be strictly increasing",
        hint: "The rule involves comparing adjacent elements",
        examples: &[&[1, 2, 5, 8, 10]],
        test: |arr| adjacent(arr, |a, b| b > a),
    },
    Rule {
        name: "sum-divisible-by-3",
        difficulty: Difficulty::Easy,
        description: "Sum of array must be divisible by 3",
        hint: "The rule involves calculating a total and checking divisibility",
        examples: &[&[1, 2, 3]],
        test: |arr| sum(arr) % 3 == 0,
    },
    Rule {
        name: "contains-zero",
        difficulty: Difficulty::Easy,
        description: "Array must contain at least one zero",
        hint: "The rule involves checking if a specific value exists",
        examples: &[&[1, 0, 3]],
        test: |arr| arr.contains(&0),
    },
    Rule {
        name: "no-duplicates",
        difficulty: Difficulty::Easy,
        description: "Array must not contain duplicate values",
        hint: "The rule involves checking uniqueness of values",
        examples: &[&[1, 2, 3, 4]],
        test: |arr| counts(arr).iter().all(|c| *c == 1),
    },
    Rule {
        name: "length-even",
        difficulty: Difficulty::Easy,
        description: "Array length must be even",
        hint: "The rule involves the array length",
        examples: &[&[1, 2, 3, 4]],
        test: |arr| arr.len() % 2 == 0,
    },
    Rule {
        name: "first-equals-last",
        difficulty: Difficulty::Easy,
        description: "First element must equal last element",
        hint: "The rule involves comparing specific positions in the array",
        examples: &[&[5, 2, 3, 5]],
        test: |arr| arr.first() == arr.last(),
    },
    Rule {
        name: "max-less-than-10",
        difficulty: Difficulty::Easy,
        description: "Maximum element must be less than 10",
        hint: "The rule involves finding the largest value",
        examples: &[&[1, 3, 5, 9]],
        test: |arr| arr.iter().all(|n| *n < 10),
    },
    Rule {
        name: "at-least-one-negative",
        difficulty: Difficulty::Easy,
        description: "Array must contain at least one negative number",
        hint: "The rule involves checking if at least one element meets a condition",
        examples: &[&[1, -2, 3]],
        test: |arr| arr.iter().any(|n| *n < 0),
    },
    // medium
    Rule {
        name: "sorted",
        difficulty: Difficulty::Medium,
        description: "Array must be sorted (non-decreasing)",
        hint: "The rule involves comparing adjacent elements",
        examples: &[&[1, 2, 2, 5, 8], &[0, 3, 7, 10]],
        test: |arr| adjacent(arr, |a, b| b >= a),
    },
    Rule {
        name: "element-lte-index",
        difficulty: Difficulty::Medium,
        description: "Each element must be less than or equal to its index",
        hint: "The rule involves comparing each element to its position",
        examples: &[&[0, 0, 1, 2, 4], &[0, 1, 1, 3]],
        test: |arr| arr.iter().zip(0i64..).all(|(n, i)| *n <= i),
    },
    Rule {
        name: "alternating-odd-even",
        difficulty: Difficulty::Medium,
        description: "Elements must alternate between odd and even",
        hint: "The rule involves checking parity of adjacent elements",
        examples: &[&[1, 2, 3, 4, 5], &[3, 6, 7, 10]],
        test: |arr| adjacent(arr, |a, b| a % 2 != b % 2),
    },
    Rule {
        name: "palindrome",
        difficulty: Difficulty::Medium,
        description: "Array must be a palindrome",
        hint: "The rule involves comparing elements from opposite ends",
        examples: &[&[1, 2, 3, 2, 1], &[5, 4, 4, 5]],
        test: |arr| arr.iter().eq(arr.iter().rev()),
    },
    Rule {
        name: "majority-element",
        difficulty: Difficulty::Medium,
        description: "One element must appear more than half the time",
        hint: "The rule involves counting element occurrences",
        examples: &[&[1, 1, 1, 2, 3], &[5, 5, 1, 5]],
        test: |arr| counts(arr).iter().any(|c| 2 * c > arr.len()),
    },
    Rule {
        name: "running-sum-positive",
        difficulty: Difficulty::Medium,
        description: "All running sums must be positive",
        hint: "The rule involves tracking cumulative sums as you move through the array",
        examples: &[&[1, 2, -1, 3], &[5, -2, 4]],
        test: |arr| {
            let mut total = 0i64;
            arr.iter().all(|n| {
                total = total.saturating_add(*n);
                total > 0
            })
        },
    },
    Rule {
        name: "two-pair",
        difficulty: Difficulty::Medium,
        description: "Array must contain exactly two pairs of duplicates",
        hint: "The rule involves counting how many different values repeat",
        examples: &[&[1, 1, 2, 2, 3], &[4, 4, 5, 5, 6]],
        test: |arr| counts(arr).iter().filter(|c| **c >= 2).count() == 2,
    },
    Rule {
        name: "mountain-array",
        difficulty: Difficulty::Medium,
        description: "Array increases then decreases (one peak)",
        hint: "The rule involves a single peak with an ascent and descent",
        examples: &[&[1, 3, 5, 4, 2], &[2, 5, 3, 1]],
        test: mountain,
    },
    Rule {
        name: "balanced-signs",
        difficulty: Difficulty::Medium,
        description: "Running sum never goes negative (treat negatives as -1, positives as +1)",
        hint: "The rule involves balancing positive and negative values in a sequence",
        examples: &[&[1, -1, 1, -1], &[1, 1, -1, -1]],
        test: balanced,
    },
    Rule {
        name: "divisible-by-length",
        difficulty: Difficulty::Medium,
        description: "All elements must be divisible by array length",
        hint: "The rule involves a relationship between each element and the array size",
        examples: &[&[3, 6, 9], &[4, 8]],
        test: |arr| !arr.is_empty() && arr.iter().all(|n| n % arr.len() as i64 == 0),
    },
    // hard
    Rule {
        name: "fibonacci-sequence",
        difficulty: Difficulty::Hard,
        description: "Array must form a Fibonacci sequence",
        hint: "The rule involves elements relating to their predecessors in a specific way",
        examples: &[&[1, 1, 2, 3, 5], &[0, 1, 1, 2, 3], &[2, 2, 4, 6, 10]],
        test: fibonacci,
    },
    Rule {
        name: "even-prime-count",
        difficulty: Difficulty::Hard,
        description: "Number of prime numbers in array must be even",
        hint: "The rule involves identifying special numbers and counting them",
        examples: &[&[2, 3, 4, 6], &[5, 7, 10, 12], &[11, 13, 1, 4]],
        test: |arr| arr.iter().filter(|n| is_prime(**n)).count() % 2 == 0,
    },
    Rule {
        name: "arithmetic-or-geometric",
        difficulty: Difficulty::Hard,
        description: "Array must form an arithmetic or geometric progression",
        hint: "The rule involves elements changing by a consistent pattern",
        examples: &[&[2, 4, 6, 8], &[2, 4, 8, 16], &[5, 5, 5]],
        test: |arr| arr.len() <= 1 || arithmetic(arr) || geometric(arr),
    },
    Rule {
        name: "bitwise-xor-zero",
        difficulty: Difficulty::Hard,
        description: "XOR of all elements must equal zero",
        hint: "The rule involves a bitwise operation on all elements",
        examples: &[&[1, 2, 3, 0], &[5, 5], &[7, 3, 4]],
        test: |arr| arr.iter().fold(0, |acc, n| acc ^ n) == 0,
    },
    Rule {
        name: "max-gap-small",
        difficulty: Difficulty::Hard,
        description: "Max difference between consecutive elements <= 2",
        hint: "The rule involves how much adjacent elements can differ",
        examples: &[&[1, 2, 4, 5, 6], &[10, 11, 12], &[5, 6, 7, 8]],
        test: |arr| adjacent(arr, |a, b| (b - a).abs() <= 2),
    },
    Rule {
        name: "perfect-squares",
        difficulty: Difficulty::Hard,
        description: "All elements must be perfect squares",
        hint: "The rule involves a mathematical property of each number",
        examples: &[&[1, 4, 9, 16], &[0, 1, 4], &[9, 16, 25]],
        test: |arr| arr.iter().all(|n| perfect_square(*n)),
    },
    Rule {
        name: "gcd-gt-one",
        difficulty: Difficulty::Hard,
        description: "GCD of all elements must be greater than 1",
        hint: "The rule involves finding a common factor of all numbers",
        examples: &[&[6, 9, 12], &[4, 8, 12], &[10, 15, 20]],
        test: |arr| !arr.is_empty() && arr.iter().fold(arr[0], |g, n| gcd(g, *n)) > 1,
    },
    Rule {
        name: "digit-sum-divisible",
        difficulty: Difficulty::Hard,
        description: "Sum of digits of each element divisible by 3",
        hint: "The rule involves breaking down numbers into their component digits",
        examples: &[&[12, 21, 30], &[111, 222], &[3, 6, 9]],
        test: |arr| arr.iter().all(|n| digit_sum(*n) % 3 == 0),
    },
    Rule {
        name: "circular-sorted",
        difficulty: Difficulty::Hard,
        description: "Array is a rotation of a sorted array",
        hint: "The rule involves a sorted structure with a twist",
        examples: &[&[4, 5, 1, 2, 3], &[3, 1, 2], &[2, 3, 4, 5, 1]],
        test: circular_sorted,
    },
];
