//! Score model.
//!
//! Scores are kept in whole points (100 = a perfect game) and converted to a
//! fraction only at the edge, so repeated recomputation never accumulates
//! floating point error.

const FULL_POINTS: i64 = 100;
const CHECK_PENALTY: i64 = 5;
const SUBMISSION_PENALTY: i64 = 20;
const HINT_PENALTY: i64 = 10;

/// Inputs that fully determine a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreInputs {
    pub checks_used: u32,
    pub free_checks: u32,
    pub submissions: u32,
    pub hint_used: bool,
}

/// Remaining points in `0..=100`.
pub fn points(inputs: ScoreInputs) -> u32 {
    let extra_checks = i64::from(inputs.checks_used.saturating_sub(inputs.free_checks));
    let extra_submissions = i64::from(inputs.submissions.saturating_sub(1));
    let mut points = FULL_POINTS;
    points -= CHECK_PENALTY * extra_checks;
    points -= SUBMISSION_PENALTY * extra_submissions;
    if inputs.hint_used {
        points -= HINT_PENALTY;
    }
    points.clamp(0, FULL_POINTS) as u32
}

/// Score in `[0, 1]`.
pub fn score(inputs: ScoreInputs) -> f64 {
    f64::from(points(inputs)) / FULL_POINTS as f64
}
