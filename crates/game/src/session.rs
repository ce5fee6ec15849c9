use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Difficulty, Rule};
use crate::error::StateError;
use crate::oracle::Predicate;
use crate::scoring::{self, ScoreInputs};

/// Game phase. `Preferences` and `Loading` belong to clients; the server
/// only ever moves a session between the remaining five.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Preferences,
    Loading,
    Playing,
    Testing,
    Won,
    Failed,
    Lost,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Won | Phase::Lost)
    }

    /// Phases from which the player may check, hint or submit.
    fn is_active(self) -> bool {
        matches!(self, Phase::Playing | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Preferences => "preferences",
            Phase::Loading => "loading",
            Phase::Playing => "playing",
            Phase::Testing => "testing",
            Phase::Won => "won",
            Phase::Failed => "failed",
            Phase::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// A player action, named in state errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Check,
    Hint,
    Submit,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Check => "check",
            Action::Hint => "use a hint",
            Action::Submit => "submit",
            Action::Quit => "quit",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub array: Vec<i64>,
    pub result: bool,
    pub timestamp: DateTime<Utc>,
}

/// Server-side record of one game.
///
/// Every action method validates before it touches a field, so an `Err`
/// always leaves the session unchanged. `score` is derived and is rewritten
/// from the counters after each successful action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: String,
    pub player_name: Option<String>,
    pub difficulty: Difficulty,
    pub rule_name: String,
    pub phase: Phase,
    pub checks_used: u32,
    pub max_checks: u32,
    pub free_checks: u32,
    pub submissions: u32,
    pub hint_used: bool,
    /// Set by `quit`; pins the score at zero.
    #[serde(default)]
    pub forfeited: bool,
    pub example_arrays: Vec<Vec<i64>>,
    pub check_history: Vec<CheckRecord>,
    pub score: f64,
    pub start_time: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// When the submission now in `testing` started.
    #[serde(default)]
    pub testing_since: Option<DateTime<Utc>>,
    /// Phase to go back to if that submission never reports.
    #[serde(default)]
    pub resume_phase: Option<Phase>,
}

impl GameSession {
    pub fn new(
        id: String,
        rule: &Rule,
        player_name: Option<String>,
        max_checks: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let free_checks = rule.difficulty.free_checks();
        let example_arrays = rule
            .examples
            .iter()
            .take(free_checks as usize)
            .map(|e| e.to_vec())
            .collect();
        let mut session = GameSession {
            id,
            player_name,
            difficulty: rule.difficulty,
            rule_name: rule.name.to_string(),
            phase: Phase::Playing,
            checks_used: 0,
            max_checks,
            free_checks,
            submissions: 0,
            hint_used: false,
            forfeited: false,
            example_arrays,
            check_history: Vec::new(),
            score: 1.0,
            start_time: now,
            completed_at: None,
            testing_since: None,
            resume_phase: None,
        };
        session.recompute_score();
        session
    }

    pub fn score_inputs(&self) -> ScoreInputs {
        ScoreInputs {
            checks_used: self.checks_used,
            free_checks: self.free_checks,
            submissions: self.submissions,
            hint_used: self.hint_used,
        }
    }

    pub fn checks_remaining(&self) -> u32 {
        self.max_checks.saturating_sub(self.checks_used)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.start_time
            .checked_add_signed(ttl)
            .is_some_and(|deadline| deadline < now)
    }

    /// Evaluate the hidden rule on `array` and record the answer.
    pub fn check(
        &mut self,
        reference: &dyn Predicate,
        array: Vec<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        self.can_check()?;
        let result = reference.holds(&array);
        self.record_check(array, result, now)?;
        Ok(result)
    }

    /// Record an answer computed ahead of time by the caller.
    pub fn record_check(
        &mut self,
        array: Vec<i64>,
        result: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        self.can_check()?;
        self.checks_used += 1;
        self.check_history.push(CheckRecord {
            array,
            result,
            timestamp: now,
        });
        self.recompute_score();
        self.phase = Phase::Playing;
        self.lose_if_exhausted(now);
        Ok(())
    }

    pub fn use_hint(&mut self) -> Result<(), StateError> {
        self.require_active(Action::Hint)?;
        if self.hint_used {
            return Err(StateError::HintAlreadyUsed);
        }
        self.hint_used = true;
        self.recompute_score();
        Ok(())
    }

    /// Enter `testing` while a submission is verified. Returns the phase to
    /// restore if verification cannot complete.
    pub fn begin_submission(&mut self, now: DateTime<Utc>) -> Result<Phase, StateError> {
        self.require_active(Action::Submit)?;
        let previous = self.phase;
        self.phase = Phase::Testing;
        self.testing_since = Some(now);
        self.resume_phase = Some(previous);
        Ok(previous)
    }

    /// Leave `testing` without counting a submission.
    pub fn abort_submission(&mut self, previous: Phase) -> Result<(), StateError> {
        if self.phase != Phase::Testing || !previous.is_active() {
            return Err(StateError::InvalidPhase {
                action: Action::Submit,
                phase: self.phase,
            });
        }
        self.phase = previous;
        self.testing_since = None;
        self.resume_phase = None;
        Ok(())
    }

    /// Put a session whose verifier vanished back in the phase it left.
    /// A `testing` session older than `grace`, or one with no start time,
    /// counts as abandoned. Returns whether the phase changed.
    pub fn release_stale_testing(&mut self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        if self.phase != Phase::Testing {
            return false;
        }
        let stale = match self.testing_since {
            Some(since) => since
                .checked_add_signed(grace)
                .is_some_and(|deadline| deadline < now),
            None => true,
        };
        if !stale {
            return false;
        }
        self.phase = self
            .resume_phase
            .take()
            .filter(|p| p.is_active())
            .unwrap_or(Phase::Playing);
        self.testing_since = None;
        true
    }

    /// Record the verdict of a verified submission.
    pub fn complete_submission(
        &mut self,
        passed: bool,
        now: DateTime<Utc>,
    ) -> Result<Phase, StateError> {
        if self.phase != Phase::Testing {
            return Err(StateError::InvalidPhase {
                action: Action::Submit,
                phase: self.phase,
            });
        }
        self.submissions += 1;
        self.testing_since = None;
        self.resume_phase = None;
        self.recompute_score();
        if passed {
            self.finish(Phase::Won, now);
        } else {
            self.phase = Phase::Failed;
            self.lose_if_exhausted(now);
        }
        Ok(self.phase)
    }

    /// Give up. The score drops to zero and the game ends.
    pub fn quit(&mut self, now: DateTime<Utc>) -> Result<(), StateError> {
        let closed = self.phase.is_terminal()
            || self.phase == Phase::Testing
            || (self.phase == Phase::Failed && self.completed_at.is_some());
        if closed {
            return Err(StateError::InvalidPhase {
                action: Action::Quit,
                phase: self.phase,
            });
        }
        self.forfeited = true;
        self.recompute_score();
        self.finish(Phase::Lost, now);
        Ok(())
    }

    /// Whether a check would be accepted right now.
    pub fn can_check(&self) -> Result<(), StateError> {
        self.require_active(Action::Check)?;
        if self.checks_used >= self.max_checks {
            return Err(StateError::ChecksExhausted {
                max: self.max_checks,
            });
        }
        Ok(())
    }

    fn require_active(&self, action: Action) -> Result<(), StateError> {
        if self.phase.is_active() {
            Ok(())
        } else {
            Err(StateError::InvalidPhase {
                action,
                phase: self.phase,
            })
        }
    }

    fn recompute_score(&mut self) {
        self.score = if self.forfeited {
            0.0
        } else {
            scoring::score(self.score_inputs())
        };
    }

    fn lose_if_exhausted(&mut self, now: DateTime<Utc>) {
        if scoring::points(self.score_inputs()) == 0 {
            self.finish(Phase::Lost, now);
        }
    }

    fn finish(&mut self, phase: Phase, now: DateTime<Utc>) {
        log::info!("session {} finished: {phase} (score {:.2})", self.id, self.score);
        self.phase = phase;
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }
}
