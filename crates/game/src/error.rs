use thiserror::Error;

use crate::session::{Action, Phase};

/// An action the session cannot take in its current state.
///
/// Raised before anything is mutated, so a rejected action leaves the
/// session exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("cannot {action} while the game is {phase}")]
    InvalidPhase { action: Action, phase: Phase },

    #[error("Maximum checks exceeded ({max} allowed)")]
    ChecksExhausted { max: u32 },

    #[error("Hint already used for this game")]
    HintAlreadyUsed,

    #[error("the rule is only revealed once the game is over")]
    GameInProgress,
}

#[derive(Debug, Error)]
pub enum GameError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Unknown rule: {0}")]
    RuleNotFound(String),

    #[error("no rules available for {0}")]
    EmptyCatalog(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("session store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
