use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Difficulty, Rule, RuleCatalog};
use crate::config::{GameConfig, MAX_SAFE_INTEGER};
use crate::error::{GameError, StateError};
use crate::oracle::Predicate;
use crate::pipeline::{run_submission, SubmissionReport};
use crate::session::{GameSession, Phase};
use crate::store::SessionStore;

/// Longest array a player may check.
pub const MAX_CHECK_LENGTH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGameResponse {
    pub session_id: String,
    pub example_arrays: Vec<Vec<i64>>,
    pub max_checks: u32,
    pub free_checks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub result: bool,
    pub checks_remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintResponse {
    pub hint: String,
    pub hint_used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(flatten)]
    pub report: SubmissionReport,
    pub score: f64,
    pub phase: Phase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuitResponse {
    pub id: String,
    pub phase: Phase,
    pub score: f64,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealResponse {
    pub name: String,
    pub description: String,
}

/// Listing entry for a session. The rule name stays hidden until the game
/// is over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub difficulty: Difficulty,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    pub phase: Phase,
    pub score: f64,
    pub checks_used: u32,
    pub checks_remaining: u32,
    pub submissions: u32,
    pub hint_used: bool,
    pub start_time: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&GameSession> for SessionSummary {
    fn from(s: &GameSession) -> Self {
        SessionSummary {
            id: s.id.clone(),
            difficulty: s.difficulty,
            rule_name: s.phase.is_terminal().then(|| s.rule_name.clone()),
            phase: s.phase,
            score: s.score,
            checks_used: s.checks_used,
            checks_remaining: s.checks_remaining(),
            submissions: s.submissions,
            hint_used: s.hint_used,
            start_time: s.start_time,
            completed_at: s.completed_at,
        }
    }
}

/// The game server: routes player actions through the session machine and
/// persists the result.
pub struct Game<S, C> {
    store: S,
    catalog: C,
    config: GameConfig,
}

impl<S: SessionStore, C: RuleCatalog> Game<S, C> {
    pub fn new(store: S, catalog: C, config: GameConfig) -> Result<Self, GameError> {
        config.validate()?;
        Ok(Game {
            store,
            catalog,
            config,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Start a game on a random rule, optionally of one difficulty.
    pub fn new_game(
        &self,
        difficulty: Option<Difficulty>,
        player_name: Option<String>,
    ) -> Result<NewGameResponse, GameError> {
        let rule = self.catalog.pick_random(difficulty).ok_or_else(|| {
            GameError::EmptyCatalog(difficulty.map_or("any difficulty".into(), |d| d.to_string()))
        })?;
        self.start(&rule, player_name)
    }

    /// Start a game on a named rule.
    pub fn new_game_with_rule(
        &self,
        rule_name: &str,
        player_name: Option<String>,
    ) -> Result<NewGameResponse, GameError> {
        let rule = self.rule(rule_name)?;
        self.start(&rule, player_name)
    }

    fn start(&self, rule: &Rule, player_name: Option<String>) -> Result<NewGameResponse, GameError> {
        let id = format!("{:032x}", rand::random::<u128>());
        let session = GameSession::new(id, rule, player_name, self.config.max_checks, Utc::now());
        let response = NewGameResponse {
            session_id: session.id.clone(),
            example_arrays: session.example_arrays.clone(),
            max_checks: session.max_checks,
            free_checks: session.free_checks,
        };
        log::info!("new {} game {}", session.difficulty, session.id);
        self.store.create(session)?;
        Ok(response)
    }

    pub fn check(&self, id: &str, array: Vec<i64>) -> Result<CheckResponse, GameError> {
        if array.len() > MAX_CHECK_LENGTH {
            return Err(GameError::InvalidInput(format!(
                "arrays are limited to {MAX_CHECK_LENGTH} elements"
            )));
        }
        if array.iter().any(|n| n.unsigned_abs() > MAX_SAFE_INTEGER.unsigned_abs()) {
            return Err(GameError::InvalidInput(
                "values must stay within +/-(2^53 - 1)".into(),
            ));
        }
        // The rule runs outside the store lock; the update re-validates.
        let mut session = self.session(id)?;
        session.release_stale_testing(Utc::now(), self.config.submission_grace());
        session.can_check()?;
        let rule = self.rule(&session.rule_name)?;
        let result = rule.holds(&array);
        self.update(id, |session| {
            session.record_check(array, result, Utc::now())?;
            log::debug!(
                "session {id}: check {}/{} -> {result}",
                session.checks_used,
                session.max_checks
            );
            Ok(CheckResponse {
                result,
                checks_remaining: session.checks_remaining(),
            })
        })
    }

    pub fn hint(&self, id: &str) -> Result<HintResponse, GameError> {
        self.update(id, |session| {
            let rule = self.rule(&session.rule_name)?;
            session.use_hint()?;
            log::debug!("session {id}: hint used");
            Ok(HintResponse {
                hint: rule.hint.to_string(),
                hint_used: true,
            })
        })
    }

    /// Verify `code` against the session's rule. The session sits in
    /// `testing` while the corpus runs, outside the store lock.
    pub fn submit(&self, id: &str, code: &str) -> Result<SubmitResponse, GameError> {
        let (rule, previous) = self.update(id, |session| {
            let rule = self.rule(&session.rule_name)?;
            let previous = session.begin_submission(Utc::now())?;
            Ok((rule, previous))
        })?;
        log::debug!("session {id}: verifying submission ({} bytes)", code.len());

        let report = run_submission(
            &rule,
            code,
            &self.config.corpus,
            self.config.sandbox.execution_limits(),
            self.config.corpus.seed,
        );

        let completed = self.store.update(id, |session| {
            let phase = session.complete_submission(report.success, Utc::now())?;
            Ok((phase, session.score))
        });
        match completed {
            Ok((phase, score)) => Ok(SubmitResponse {
                report,
                score,
                phase,
            }),
            Err(e) => {
                let restored = self
                    .store
                    .update(id, |session| Ok(session.abort_submission(previous)?));
                if let Err(restore) = restored {
                    log::warn!("session {id}: could not leave testing: {restore}");
                }
                Err(e)
            }
        }
    }

    pub fn quit(&self, id: &str) -> Result<QuitResponse, GameError> {
        self.update(id, |session| {
            session.quit(Utc::now())?;
            Ok(QuitResponse {
                id: session.id.clone(),
                phase: session.phase,
                score: session.score,
                completed_at: session.completed_at,
            })
        })
    }

    /// Describe the rule of a finished game.
    pub fn reveal(&self, id: &str) -> Result<RevealResponse, GameError> {
        let session = self.session(id)?;
        if !session.phase.is_terminal() {
            return Err(StateError::GameInProgress.into());
        }
        let rule = self.rule(&session.rule_name)?;
        Ok(RevealResponse {
            name: rule.name.to_string(),
            description: rule.description.to_string(),
        })
    }

    /// Apply a player action, first reclaiming a session left in `testing`
    /// by a verifier that never reported back.
    fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut GameSession) -> Result<T, GameError>,
    ) -> Result<T, GameError> {
        let grace = self.config.submission_grace();
        self.store.update(id, |session| {
            if session.release_stale_testing(Utc::now(), grace) {
                log::warn!("session {id}: abandoned verification, back to {}", session.phase);
            }
            f(session)
        })
    }

    pub fn session(&self, id: &str) -> Result<GameSession, GameError> {
        self.store
            .get(id)?
            .ok_or_else(|| GameError::SessionNotFound(id.to_string()))
    }

    pub fn summary(&self, id: &str) -> Result<SessionSummary, GameError> {
        Ok(SessionSummary::from(&self.session(id)?))
    }

    /// Every live session of `player`, oldest first.
    pub fn history(&self, player: &str) -> Result<Vec<SessionSummary>, GameError> {
        let mut sessions: Vec<GameSession> = self
            .store
            .list()?
            .into_iter()
            .filter(|s| s.player_name.as_deref() == Some(player))
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions.iter().map(SessionSummary::from).collect())
    }

    /// Drop sessions past their TTL. Run on a schedule by the host.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, GameError> {
        let removed = self.store.sweep_expired(now)?;
        log::info!("swept {removed} expired sessions");
        Ok(removed)
    }

    fn rule(&self, name: &str) -> Result<Rule, GameError> {
        self.catalog
            .lookup(name)
            .ok_or_else(|| GameError::RuleNotFound(name.to_string()))
    }
}
