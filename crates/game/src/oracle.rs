use mystery_bytecode::ExecutableUnit;
use mystery_sandbox::{invoke, ExecutionLimits, ExecutionOutcome, FailureKind};
use serde::{Deserialize, Serialize};

use crate::fuzzer::TestCase;

/// A trusted, in-process boolean rule.
pub trait Predicate {
    fn holds(&self, input: &[i64]) -> bool;
}

/// Something that answers a test case the way a submission does.
pub trait Candidate {
    fn run(&self, input: &[i64]) -> ExecutionOutcome;
}

/// A compiled submission run in a fresh sandbox per call.
pub struct Sandboxed<'u> {
    unit: &'u ExecutableUnit,
    limits: ExecutionLimits,
}

impl<'u> Sandboxed<'u> {
    pub fn new(unit: &'u ExecutableUnit, limits: ExecutionLimits) -> Self {
        Sandboxed { unit, limits }
    }
}

impl Candidate for Sandboxed<'_> {
    fn run(&self, input: &[i64]) -> ExecutionOutcome {
        invoke(self.unit, input, self.limits)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DifferentialResult {
    AllMatched {
        tests_run: usize,
    },
    Mismatch {
        test_case: TestCase,
        reference_result: bool,
        submitted_result: bool,
        tests_run: usize,
    },
    ExecutionFailed {
        tests_run: usize,
        kind: FailureKind,
        message: String,
    },
}

impl DifferentialResult {
    /// Cases evaluated, counting the one that stopped the run.
    pub fn tests_run(&self) -> usize {
        match self {
            DifferentialResult::AllMatched { tests_run }
            | DifferentialResult::Mismatch { tests_run, .. }
            | DifferentialResult::ExecutionFailed { tests_run, .. } => *tests_run,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, DifferentialResult::AllMatched { .. })
    }
}

/// Run a compiled submission against `reference` over `corpus`.
pub fn evaluate(
    reference: &dyn Predicate,
    unit: &ExecutableUnit,
    corpus: &[TestCase],
    limits: ExecutionLimits,
) -> DifferentialResult {
    evaluate_candidate(reference, &Sandboxed::new(unit, limits), corpus)
}

/// Compare `candidate` with `reference` case by case, in corpus order,
/// stopping at the first disagreement or sandbox failure.
pub fn evaluate_candidate(
    reference: &dyn Predicate,
    candidate: &dyn Candidate,
    corpus: &[TestCase],
) -> DifferentialResult {
    for (index, case) in corpus.iter().enumerate() {
        let tests_run = index + 1;
        let expected = reference.holds(case);
        match candidate.run(case) {
            ExecutionOutcome::Failure { kind, message } => {
                log::debug!("submission failed on case {index} ({kind})");
                return DifferentialResult::ExecutionFailed {
                    tests_run,
                    kind,
                    message,
                };
            }
            ExecutionOutcome::Success(actual) if actual != expected => {
                log::debug!("submission disagreed on case {index}");
                return DifferentialResult::Mismatch {
                    test_case: case.clone(),
                    reference_result: expected,
                    submitted_result: actual,
                    tests_run,
                };
            }
            ExecutionOutcome::Success(_) => {}
        }
    }
    DifferentialResult::AllMatched {
        tests_run: corpus.len(),
    }
}
