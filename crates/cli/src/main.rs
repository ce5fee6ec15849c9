use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use mystery_game::{
    corpus_fingerprint, generate, generate_seeded, run_submission, BuiltinCatalog, Difficulty,
    FileStore, Game, GameConfig, GameError, RuleCatalog,
};

#[derive(Parser)]
#[command(name = "mystery", about = "Mystery rule game: guess the hidden array rule")]
struct Cli {
    /// Game configuration file (JSON). Missing keys use defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding one JSON file per session.
    #[arg(long, global = true, default_value = ".sessions")]
    store: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new game.
    New {
        /// easy, medium or hard. Random when omitted.
        #[arg(short, long)]
        difficulty: Option<Difficulty>,
        /// Play a specific rule instead of a random one.
        #[arg(long, conflicts_with = "difficulty")]
        rule: Option<String>,
        /// Player name recorded for history.
        #[arg(short, long)]
        player: Option<String>,
    },
    /// Ask whether an array satisfies the hidden rule.
    Check {
        /// Session id
        id: String,
        /// JSON array of integers, e.g. "[1, 2, 3]"
        array: String,
    },
    /// Reveal the hint (costs 10 points, once per game).
    Hint {
        /// Session id
        id: String,
    },
    /// Submit a predicate source file for verification.
    Submit {
        /// Session id
        id: String,
        /// Source file (.js or .ts)
        file: PathBuf,
    },
    /// Give up the game.
    Quit {
        /// Session id
        id: String,
    },
    /// Show the rule of a finished game.
    Reveal {
        /// Session id
        id: String,
    },
    /// Show a session summary.
    Status {
        /// Session id
        id: String,
    },
    /// List every live session of a player.
    History {
        /// Player name
        player: String,
    },
    /// Delete sessions past their time-to-live.
    Sweep,
    /// List the built-in rules.
    Rules {
        /// Only rules of this difficulty.
        #[arg(short, long)]
        difficulty: Option<Difficulty>,
    },
    /// Print a test corpus and its fingerprint.
    Corpus {
        /// Seed for a reproducible corpus. Falls back to the configured seed.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Verify a source file against a rule without a session.
    Verify {
        /// Source file (.js or .ts)
        file: PathBuf,
        /// Rule name
        #[arg(long)]
        rule: String,
        /// Seed for a reproducible corpus. Falls back to the configured seed.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Compile a source file and print the bytecode module as JSON.
    Compile {
        /// Source file (.js or .ts)
        file: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };

    match cli.command {
        Command::New {
            difficulty,
            rule,
            player,
        } => {
            let game = open_game(&cli.store, config)?;
            let response = match rule {
                Some(name) => game.new_game_with_rule(&name, player)?,
                None => game.new_game(difficulty, player)?,
            };
            print_json(&response)?;
        }
        Command::Check { id, array } => {
            let array: Vec<i64> = serde_json::from_str(&array)
                .map_err(|e| GameError::InvalidInput(format!("expected a JSON array of integers: {e}")))?;
            print_json(&open_game(&cli.store, config)?.check(&id, array)?)?;
        }
        Command::Hint { id } => {
            print_json(&open_game(&cli.store, config)?.hint(&id)?)?;
        }
        Command::Submit { id, file } => {
            let source = read_source(&file)?;
            print_json(&open_game(&cli.store, config)?.submit(&id, &source)?)?;
        }
        Command::Quit { id } => {
            print_json(&open_game(&cli.store, config)?.quit(&id)?)?;
        }
        Command::Reveal { id } => {
            print_json(&open_game(&cli.store, config)?.reveal(&id)?)?;
        }
        Command::Status { id } => {
            print_json(&open_game(&cli.store, config)?.summary(&id)?)?;
        }
        Command::History { player } => {
            print_json(&open_game(&cli.store, config)?.history(&player)?)?;
        }
        Command::Sweep => {
            let removed = open_game(&cli.store, config)?.sweep_expired(Utc::now())?;
            println!("removed {removed} expired session(s)");
        }
        Command::Rules { difficulty } => {
            for rule in BuiltinCatalog.rules() {
                if difficulty.map_or(true, |d| d == rule.difficulty) {
                    println!("{:<24} {}", rule.name, rule.difficulty);
                }
            }
        }
        Command::Corpus { seed } => {
            config.validate()?;
            let seed = seed.or(config.corpus.seed);
            let cases = match seed {
                Some(seed) => generate_seeded(&config.corpus, seed),
                None => generate(&config.corpus),
            };
            print_json(&CorpusDump {
                seed,
                fingerprint: corpus_fingerprint(&cases),
                cases,
            })?;
        }
        Command::Verify { file, rule, seed } => {
            config.validate()?;
            let reference = BuiltinCatalog
                .lookup(&rule)
                .ok_or(GameError::RuleNotFound(rule))?;
            let source = read_source(&file)?;
            let report = run_submission(
                &reference,
                &source,
                &config.corpus,
                config.sandbox.execution_limits(),
                seed.or(config.corpus.seed),
            );
            print_json(&report)?;
            if !report.success {
                process::exit(2);
            }
        }
        Command::Compile { file } => {
            let source = read_source(&file)?;
            mystery_compiler::scan(&source)?;
            let unit = mystery_compiler::normalize(&source)?;
            print_json(&unit)?;
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct CorpusDump {
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    fingerprint: String,
    cases: Vec<Vec<i64>>,
}

fn open_game(store: &Path, config: GameConfig) -> Result<Game<FileStore, BuiltinCatalog>, GameError> {
    log::debug!("session store at {}", store.display());
    let store = FileStore::open(store, config.session_ttl())?;
    Game::new(store, BuiltinCatalog, config)
}

fn read_source(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
