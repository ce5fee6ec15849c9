pub mod catalog;
pub mod config;
pub mod error;
pub mod fuzzer;
pub mod oracle;
pub mod pipeline;
pub mod scoring;
pub mod service;
pub mod session;
pub mod store;
#[cfg(test)]
mod tests;

pub use catalog::{BuiltinCatalog, Difficulty, Rule, RuleCatalog};
pub use config::{CorpusConfig, GameConfig, SandboxLimits};
pub use error::{GameError, StateError};
pub use fuzzer::{corpus_fingerprint, generate, generate_seeded, TestCase, EDGE_CASES};
pub use oracle::{evaluate, evaluate_candidate, Candidate, DifferentialResult, Predicate};
pub use pipeline::{run_submission, SubmissionReport};
pub use service::Game;
pub use session::{GameSession, Phase};
pub use store::{FileStore, MemoryStore, SessionStore};
