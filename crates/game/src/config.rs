use std::fs;
use std::path::Path;
use std::time::Duration;

use mystery_sandbox::ExecutionLimits;
use serde::{Deserialize, Serialize};

use crate::error::GameError;

/// Largest integer magnitude a guest number holds exactly.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;
const MAX_ARRAY_LENGTH: usize = 10_000;
/// Added to the corpus time budget before a `testing` session is abandoned.
const SUBMISSION_SLACK_MS: i64 = 60_000;

/// Shape of the generated test corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub num_tests: usize,
    pub max_array_length: usize,
    pub min_value: i64,
    pub max_value: i64,
    /// Fixed seed for reproducible corpora; `None` draws a fresh one per submission.
    pub seed: Option<u64>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        CorpusConfig {
            num_tests: 1000,
            max_array_length: 20,
            min_value: -100,
            max_value: 100,
            seed: None,
        }
    }
}

/// Ceilings applied to every sandboxed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    pub time_ms: u64,
    pub memory_mb: u64,
    pub max_steps: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        SandboxLimits {
            time_ms: 100,
            memory_mb: 128,
            max_steps: 5_000_000,
        }
    }
}

impl SandboxLimits {
    pub fn execution_limits(&self) -> ExecutionLimits {
        let memory = self.memory_mb.saturating_mul(1024 * 1024);
        ExecutionLimits {
            time: Duration::from_millis(self.time_ms),
            memory_bytes: usize::try_from(memory).unwrap_or(usize::MAX),
            max_steps: self.max_steps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub corpus: CorpusConfig,
    pub sandbox: SandboxLimits,
    pub max_checks: u32,
    pub session_ttl_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            corpus: CorpusConfig::default(),
            sandbox: SandboxLimits::default(),
            max_checks: 20,
            session_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl GameConfig {
    pub fn from_json(json: &str) -> Result<Self, GameError> {
        let config: GameConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. Keys left out keep their defaults.
    pub fn load(path: &Path) -> Result<Self, GameError> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GameError> {
        let corpus = &self.corpus;
        if corpus.min_value > corpus.max_value {
            return Err(GameError::Config(format!(
                "min_value {} is greater than max_value {}",
                corpus.min_value, corpus.max_value
            )));
        }
        if corpus.min_value < -MAX_SAFE_INTEGER || corpus.max_value > MAX_SAFE_INTEGER {
            return Err(GameError::Config(
                "corpus values must stay within +/-(2^53 - 1)".into(),
            ));
        }
        if corpus.max_array_length == 0 || corpus.max_array_length > MAX_ARRAY_LENGTH {
            return Err(GameError::Config(format!(
                "max_array_length must be between 1 and {MAX_ARRAY_LENGTH}"
            )));
        }
        if self.sandbox.time_ms == 0 {
            return Err(GameError::Config("sandbox time_ms must be positive".into()));
        }
        if self.sandbox.memory_mb == 0 {
            return Err(GameError::Config("sandbox memory_mb must be positive".into()));
        }
        if self.sandbox.max_steps == 0 {
            return Err(GameError::Config("sandbox max_steps must be positive".into()));
        }
        if self.max_checks == 0 {
            return Err(GameError::Config("max_checks must be positive".into()));
        }
        Ok(())
    }

    /// How long a session may sit in `testing` before it is treated as
    /// abandoned: twice the time the whole corpus may take, plus a minute.
    pub fn submission_grace(&self) -> chrono::Duration {
        let budget = (self.corpus.num_tests as u64)
            .saturating_mul(self.sandbox.time_ms)
            .saturating_mul(2);
        let ms = i64::try_from(budget)
            .unwrap_or(i64::MAX)
            .saturating_add(SUBMISSION_SLACK_MS);
        chrono::Duration::try_milliseconds(ms).unwrap_or(chrono::Duration::MAX)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
    }
}
