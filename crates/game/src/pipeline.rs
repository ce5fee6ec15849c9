use mystery_compiler::{normalize, scan};
use mystery_sandbox::ExecutionLimits;
use serde::{Deserialize, Serialize};

use crate::catalog::Rule;
use crate::config::CorpusConfig;
use crate::fuzzer::{self, TestCase};
use crate::oracle::{self, DifferentialResult};

pub const MISMATCH_MESSAGE: &str = "Failed test case found! Your rule doesn't match the mystery rule.";

/// Outcome of verifying one submission, in the shape reported to players.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReport {
    pub success: bool,
    pub tests_run: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_case: Option<TestCase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_result: Option<bool>,
    pub message: String,
    /// Name of the function that was tested, once the source compiled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_fingerprint: Option<String>,
}

impl SubmissionReport {
    fn rejected(message: String) -> Self {
        SubmissionReport {
            success: false,
            tests_run: 0,
            failed_case: None,
            expected_result: None,
            player_result: None,
            message,
            entry_point: None,
            corpus_fingerprint: None,
        }
    }
}

/// Scan, compile and differentially test `source` against `reference`.
///
/// Scanner and compiler errors stop the run before anything executes.
pub fn run_submission(
    reference: &Rule,
    source: &str,
    corpus_config: &CorpusConfig,
    limits: ExecutionLimits,
    seed: Option<u64>,
) -> SubmissionReport {
    if let Err(reason) = scan(source) {
        log::warn!(
            "submission rejected by scanner: {} ({} bytes)",
            reason.capability(),
            source.len()
        );
        return SubmissionReport::rejected(reason.to_string());
    }
    let unit = match normalize(source) {
        Ok(unit) => unit,
        Err(e) => {
            log::info!("submission failed to compile: {e}");
            return SubmissionReport::rejected(e.to_string());
        }
    };

    let corpus = match seed {
        Some(seed) => fuzzer::generate_seeded(corpus_config, seed),
        None => fuzzer::generate(corpus_config),
    };
    let fingerprint = fuzzer::corpus_fingerprint(&corpus);
    let verdict = oracle::evaluate(reference, &unit, &corpus, limits);
    log::info!(
        "rule '{}' vs '{}': {} after {} tests (corpus {})",
        reference.name,
        unit.entry_name,
        verdict_label(&verdict),
        verdict.tests_run(),
        fingerprint
    );

    let tests_run = verdict.tests_run();
    let mut report = match verdict {
        DifferentialResult::AllMatched { .. } => SubmissionReport {
            success: true,
            message: format!(
                "Congratulations! You discovered the rule: \"{}\"",
                reference.description
            ),
            ..SubmissionReport::rejected(String::new())
        },
        DifferentialResult::Mismatch {
            test_case,
            reference_result,
            submitted_result,
            ..
        } => SubmissionReport {
            failed_case: Some(test_case),
            expected_result: Some(reference_result),
            player_result: Some(submitted_result),
            ..SubmissionReport::rejected(MISMATCH_MESSAGE.to_string())
        },
        DifferentialResult::ExecutionFailed { message, .. } => {
            SubmissionReport::rejected(format!("Code execution error: {message}"))
        }
    };
    report.tests_run = tests_run;
    report.entry_point = Some(unit.entry_name);
    report.corpus_fingerprint = Some(fingerprint);
    report
}

fn verdict_label(verdict: &DifferentialResult) -> &'static str {
    match verdict {
        DifferentialResult::AllMatched { .. } => "all matched",
        DifferentialResult::Mismatch { .. } => "mismatch",
        DifferentialResult::ExecutionFailed { .. } => "execution failed",
    }
}
