#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;

    use chrono::{Duration, TimeZone, Utc};
    use mystery_sandbox::{ExecutionOutcome, FailureKind};

    use crate::config::MAX_SAFE_INTEGER;
    use crate::scoring::{self, ScoreInputs};
    use crate::service::MAX_CHECK_LENGTH;
    use crate::session::Action;
    use crate::*;

    fn rule(name: &str) -> Rule {
        BuiltinCatalog.lookup(name).unwrap()
    }

    fn session_for(name: &str, max_checks: u32) -> GameSession {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        GameSession::new("abc123".into(), &rule(name), Some("ada".into()), max_checks, now)
    }

    fn small_corpus() -> CorpusConfig {
        CorpusConfig {
            num_tests: 60,
            seed: Some(7),
            ..CorpusConfig::default()
        }
    }

    /// Answers like `reference` except on one case, where it disagrees or fails.
    struct Scripted {
        reference: Rule,
        diverge_at: usize,
        fail: bool,
        calls: Cell<usize>,
    }

    impl Scripted {
        fn new(reference: Rule, diverge_at: usize, fail: bool) -> Self {
            Scripted {
                reference,
                diverge_at,
                fail,
                calls: Cell::new(0),
            }
        }
    }

    impl Candidate for Scripted {
        fn run(&self, input: &[i64]) -> ExecutionOutcome {
            let index = self.calls.get();
            self.calls.set(index + 1);
            let expected = self.reference.holds(input);
            if index != self.diverge_at {
                ExecutionOutcome::Success(expected)
            } else if self.fail {
                ExecutionOutcome::failure(FailureKind::RuntimeError, "boom")
            } else {
                ExecutionOutcome::Success(!expected)
            }
        }
    }

    // --- Fuzzer ---

    #[test]
    fn test_corpus_opens_with_edge_cases() {
        let corpus = generate_seeded(&CorpusConfig::default(), 1);
        assert_eq!(corpus.len(), 1000);
        let expected: Vec<Vec<i64>> = vec![
            vec![],
            vec![0],
            vec![1],
            vec![-1],
            vec![0, 0],
            vec![1, 1, 1],
            vec![-1, -2, -3],
            vec![1, 2, 3, 4, 5],
            vec![5, 4, 3, 2, 1],
            vec![1, 3, 2, 5, 4],
        ];
        assert_eq!(&corpus[..10], expected.as_slice());
    }

    #[test]
    fn test_edge_cases_survive_tiny_corpus() {
        let config = CorpusConfig {
            num_tests: 3,
            ..CorpusConfig::default()
        };
        assert_eq!(generate_seeded(&config, 9).len(), 10);
        assert_eq!(generate(&config).len(), 10);
    }

    #[test]
    fn test_seeded_corpus_is_deterministic() {
        let config = CorpusConfig::default();
        let a = generate_seeded(&config, 42);
        let b = generate_seeded(&config, 42);
        assert_eq!(a, b);
        assert_eq!(corpus_fingerprint(&a), corpus_fingerprint(&b));
        let c = generate_seeded(&config, 43);
        assert_ne!(a, c);
        assert_ne!(corpus_fingerprint(&a), corpus_fingerprint(&c));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = corpus_fingerprint(&[vec![1, 2], vec![]]);
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(fp, corpus_fingerprint(&[vec![1], vec![2]]));
    }

    #[test]
    fn test_strategies_respect_their_shapes() {
        let config = CorpusConfig::default();
        let corpus = generate_seeded(&config, 2024);
        let in_range = |v: &i64| (config.min_value..=config.max_value).contains(v);
        for (i, case) in corpus.iter().enumerate().skip(10) {
            match (i - 10) % 5 {
                0 => {
                    assert!(case.len() <= config.max_array_length);
                    assert!(case.iter().all(in_range));
                }
                1 => {
                    assert!(case.len() <= 5);
                    assert!(case.iter().all(in_range));
                }
                2 => assert!(!case.is_empty() && case.len() <= config.max_array_length),
                3 => {
                    assert!(!case.is_empty());
                    let distinct: HashSet<_> = case.iter().collect();
                    assert!(distinct.len() <= case.len().div_ceil(2));
                    assert!(case.iter().all(in_range));
                }
                _ => {
                    assert!(!case.is_empty());
                    assert!(case.iter().all(|v| [config.min_value, config.max_value, 0].contains(v)));
                }
            }
        }
    }

    #[test]
    fn test_degenerate_value_range() {
        let config = CorpusConfig {
            num_tests: 200,
            min_value: 4,
            max_value: 4,
            seed: None,
            ..CorpusConfig::default()
        };
        let corpus = generate_seeded(&config, 5);
        for (i, case) in corpus.iter().enumerate().skip(10) {
            if (i - 10) % 5 == 3 {
                assert!(case.iter().all(|v| *v == 4));
            }
        }
    }

    // --- Oracle ---

    #[test]
    fn test_oracle_stops_at_first_mismatch() {
        let reference = rule("all-positive");
        let corpus = generate_seeded(&CorpusConfig::default(), 3);
        for k in [0, 3, 9, 250] {
            let candidate = Scripted::new(reference, k, false);
            let result = evaluate_candidate(&reference, &candidate, &corpus);
            assert_eq!(result.tests_run(), k + 1);
            assert_eq!(candidate.calls.get(), k + 1);
            match result {
                DifferentialResult::Mismatch {
                    test_case,
                    reference_result,
                    submitted_result,
                    ..
                } => {
                    assert_eq!(test_case, corpus[k]);
                    assert_eq!(reference_result, reference.holds(&corpus[k]));
                    assert_eq!(submitted_result, !reference_result);
                }
                other => panic!("expected mismatch, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_oracle_reports_sandbox_failure_separately() {
        let reference = rule("all-positive");
        let corpus = generate_seeded(&CorpusConfig::default(), 3);
        let candidate = Scripted::new(reference, 2, true);
        let result = evaluate_candidate(&reference, &candidate, &corpus);
        assert_eq!(
            result,
            DifferentialResult::ExecutionFailed {
                tests_run: 3,
                kind: FailureKind::RuntimeError,
                message: "boom".into(),
            }
        );
        assert_eq!(candidate.calls.get(), 3);
    }

    #[test]
    fn test_oracle_all_matched_runs_whole_corpus() {
        let reference = rule("sorted");
        let corpus = generate_seeded(&CorpusConfig::default(), 11);
        let candidate = Scripted::new(reference, usize::MAX, false);
        let result = evaluate_candidate(&reference, &candidate, &corpus);
        assert!(result.is_match());
        assert_eq!(result.tests_run(), corpus.len());
        assert_eq!(candidate.calls.get(), corpus.len());
    }

    // --- Session machine ---

    #[test]
    fn test_new_session_shape() {
        let s = session_for("sorted", 20);
        assert_eq!(s.phase, Phase::Playing);
        assert_eq!(s.free_checks, 2);
        assert_eq!(s.max_checks, 20);
        assert_eq!(s.example_arrays.len(), 2);
        assert_eq!(s.score, 1.0);
        assert!(s.completed_at.is_none());
    }

    #[test]
    fn test_check_records_history_and_score() {
        let mut s = session_for("all-positive", 20);
        let now = s.start_time;
        assert!(s.check(&rule("all-positive"), vec![1, 2], now).unwrap());
        assert!(!s.check(&rule("all-positive"), vec![0], now).unwrap());
        assert_eq!(s.checks_used, 2);
        assert_eq!(s.check_history.len(), 2);
        assert_eq!(s.check_history[1].array, vec![0]);
        assert!(!s.check_history[1].result);
        assert_eq!(s.score, 0.95);
        assert_eq!(s.checks_remaining(), 18);
    }

    #[test]
    fn test_check_cap_leaves_session_untouched() {
        let mut s = session_for("all-positive", 2);
        let now = s.start_time;
        s.check(&rule("all-positive"), vec![1], now).unwrap();
        s.check(&rule("all-positive"), vec![2], now).unwrap();
        let before = s.clone();
        let err = s.check(&rule("all-positive"), vec![3], now).unwrap_err();
        assert_eq!(err, StateError::ChecksExhausted { max: 2 });
        assert_eq!(s, before);
    }

    #[test]
    fn test_single_hint() {
        let mut s = session_for("palindrome", 20);
        s.use_hint().unwrap();
        assert!(s.hint_used);
        assert_eq!(s.score, 0.9);
        let before = s.clone();
        assert_eq!(s.use_hint().unwrap_err(), StateError::HintAlreadyUsed);
        assert_eq!(s, before);
    }

    #[test]
    fn test_submission_cycle() {
        let mut s = session_for("all-even", 20);
        let now = s.start_time;
        assert_eq!(s.begin_submission(s.start_time).unwrap(), Phase::Playing);
        assert_eq!(s.phase, Phase::Testing);
        assert!(matches!(
            s.check(&rule("all-even"), vec![2], now),
            Err(StateError::InvalidPhase {
                action: Action::Check,
                phase: Phase::Testing
            })
        ));
        assert!(s.begin_submission(s.start_time).is_err());
        assert_eq!(s.complete_submission(false, now).unwrap(), Phase::Failed);
        assert_eq!(s.submissions, 1);
        assert_eq!(s.score, 1.0);
        assert!(s.completed_at.is_none());

        // a check from `failed` returns the game to `playing`
        s.check(&rule("all-even"), vec![2], now).unwrap();
        assert_eq!(s.phase, Phase::Playing);

        s.begin_submission(s.start_time).unwrap();
        assert_eq!(s.complete_submission(true, now).unwrap(), Phase::Won);
        assert_eq!(s.submissions, 2);
        assert_eq!(s.score, 0.8);
        assert_eq!(s.completed_at, Some(now));

        let before = s.clone();
        assert!(s.begin_submission(s.start_time).is_err());
        assert!(s.use_hint().is_err());
        assert!(s.quit(now).is_err());
        assert_eq!(s, before);
    }

    #[test]
    fn test_complete_requires_testing() {
        let mut s = session_for("all-even", 20);
        let err = s.complete_submission(true, s.start_time).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidPhase {
                action: Action::Submit,
                phase: Phase::Playing
            }
        );
        assert_eq!(s.submissions, 0);
    }

    #[test]
    fn test_abort_restores_previous_phase() {
        let mut s = session_for("all-even", 20);
        let previous = s.begin_submission(s.start_time).unwrap();
        s.abort_submission(previous).unwrap();
        assert_eq!(s.phase, Phase::Playing);
        assert_eq!(s.submissions, 0);
        assert!(s.abort_submission(Phase::Playing).is_err());
    }

    #[test]
    fn test_quit_forfeits() {
        let mut s = session_for("all-even", 20);
        let now = s.start_time + Duration::minutes(3);
        s.quit(now).unwrap();
        assert_eq!(s.phase, Phase::Lost);
        assert_eq!(s.score, 0.0);
        assert_eq!(s.completed_at, Some(now));
        assert!(s.quit(now).is_err());
        assert!(s.check(&rule("all-even"), vec![1], now).is_err());
    }

    #[test]
    fn test_quit_allowed_after_failed_submission() {
        let mut s = session_for("all-even", 20);
        let now = s.start_time;
        s.begin_submission(s.start_time).unwrap();
        s.complete_submission(false, now).unwrap();
        s.quit(now).unwrap();
        assert_eq!(s.phase, Phase::Lost);
    }

    #[test]
    fn test_quit_rejected_while_testing() {
        let mut s = session_for("all-even", 20);
        s.begin_submission(s.start_time).unwrap();
        assert!(s.quit(s.start_time).is_err());
        assert_eq!(s.phase, Phase::Testing);
    }

    #[test]
    fn test_stale_testing_returns_to_previous_phase() {
        let mut s = session_for("all-even", 20);
        let now = s.start_time;
        s.begin_submission(now).unwrap();
        s.complete_submission(false, now).unwrap();
        let started = now + Duration::minutes(1);
        assert_eq!(s.begin_submission(started).unwrap(), Phase::Failed);
        assert_eq!(s.testing_since, Some(started));

        let grace = Duration::minutes(5);
        assert!(!s.release_stale_testing(started + Duration::minutes(4), grace));
        assert_eq!(s.phase, Phase::Testing);
        assert!(s.release_stale_testing(started + Duration::minutes(6), grace));
        assert_eq!(s.phase, Phase::Failed);
        assert_eq!(s.testing_since, None);
        assert_eq!(s.submissions, 1);

        assert!(!s.release_stale_testing(started + Duration::minutes(7), grace));
        s.quit(started + Duration::minutes(7)).unwrap();
        assert_eq!(s.phase, Phase::Lost);
    }

    #[test]
    fn test_testing_without_start_time_is_stale() {
        let mut s = session_for("all-even", 20);
        s.begin_submission(s.start_time).unwrap();
        let mut json = serde_json::to_value(&s).unwrap();
        let fields = json.as_object_mut().unwrap();
        fields.remove("testing_since");
        fields.remove("resume_phase");
        let mut older: GameSession = serde_json::from_value(json).unwrap();
        assert_eq!(older.phase, Phase::Testing);
        assert!(older.release_stale_testing(older.start_time, Duration::hours(1)));
        assert_eq!(older.phase, Phase::Playing);
    }

    #[test]
    fn test_finished_submission_clears_testing_marks() {
        let mut s = session_for("all-even", 20);
        let now = s.start_time;
        let previous = s.begin_submission(now).unwrap();
        s.abort_submission(previous).unwrap();
        assert_eq!((s.testing_since, s.resume_phase), (None, None));
        s.begin_submission(now).unwrap();
        s.complete_submission(true, now).unwrap();
        assert_eq!((s.testing_since, s.resume_phase), (None, None));
        assert!(!s.release_stale_testing(now + Duration::days(1), Duration::minutes(1)));
        assert_eq!(s.phase, Phase::Won);
    }

    #[test]
    fn test_record_check_validates_phase() {
        let mut s = session_for("all-even", 1);
        let now = s.start_time;
        s.record_check(vec![3], false, now).unwrap();
        assert!(!s.check_history[0].result);
        let before = s.clone();
        assert_eq!(
            s.record_check(vec![2], true, now).unwrap_err(),
            StateError::ChecksExhausted { max: 1 }
        );
        assert_eq!(s, before);
    }

    #[test]
    fn test_failed_submission_can_lose() {
        let mut s = session_for("all-even", 20);
        let now = s.start_time;
        // 100 - 20 * 4 = 20, then the hint and two extra checks leave zero
        for _ in 0..5 {
            s.begin_submission(s.start_time).unwrap();
            s.complete_submission(false, now).unwrap();
        }
        s.use_hint().unwrap();
        s.check(&rule("all-even"), vec![2], now).unwrap();
        s.check(&rule("all-even"), vec![2], now).unwrap();
        assert_eq!(s.phase, Phase::Playing);
        s.check(&rule("all-even"), vec![2], now).unwrap();
        assert_eq!(s.score, 0.0);
        assert_eq!(s.phase, Phase::Lost);
        assert!(s.completed_at.is_some());
    }

    #[test]
    fn test_score_never_drifts() {
        let mut s = session_for("sum-divisible-by-3", 20);
        let reference = rule("sum-divisible-by-3");
        let now = s.start_time;
        let mut last = (0, 0, false);
        for step in 0..40 {
            let _ = match step % 7 {
                0 | 2 | 4 => s.check(&reference, vec![step], now).map(|_| ()),
                1 => s.use_hint(),
                3 => s
                    .begin_submission(now)
                    .and_then(|_| s.complete_submission(step % 2 == 0, now))
                    .map(|_| ()),
                _ => s.check(&reference, vec![], now).map(|_| ()),
            };
            assert_eq!(s.score, scoring::score(s.score_inputs()));
            assert!(s.checks_used <= s.max_checks);
            assert!(s.checks_used >= last.0);
            assert!(s.submissions >= last.1);
            assert!(s.hint_used || !last.2);
            last = (s.checks_used, s.submissions, s.hint_used);
        }
    }

    #[test]
    fn test_session_expiry() {
        let s = session_for("all-even", 20);
        let ttl = Duration::days(7);
        assert!(!s.is_expired(s.start_time + Duration::days(6), ttl));
        assert!(s.is_expired(s.start_time + Duration::days(8), ttl));
    }

    #[test]
    fn test_session_json_round_trip() {
        let mut s = session_for("all-even", 20);
        s.check(&rule("all-even"), vec![4, 6], s.start_time).unwrap();
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"phase\":\"playing\""));
        assert!(json.contains("\"difficulty\":\"easy\""));
        let back: GameSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    // --- Scoring inputs ---

    #[test]
    fn test_score_inputs_mirror_counters() {
        let s = session_for("sorted", 20);
        assert_eq!(
            s.score_inputs(),
            ScoreInputs {
                checks_used: 0,
                free_checks: 2,
                submissions: 0,
                hint_used: false
            }
        );
    }

    // --- Catalog ---

    #[test]
    fn test_catalog_examples_satisfy_their_rules() {
        for rule in BuiltinCatalog.rules() {
            assert!(
                rule.examples.len() >= rule.difficulty.free_checks() as usize,
                "{} has too few examples",
                rule.name
            );
            for example in rule.examples {
                assert!(rule.holds(example), "{} rejects its example {example:?}", rule.name);
            }
        }
    }

    #[test]
    fn test_catalog_names_are_unique_and_tiers_populated() {
        let rules = BuiltinCatalog.rules();
        let names: HashSet<_> = rules.iter().map(|r| r.name).collect();
        assert_eq!(names.len(), rules.len());
        for difficulty in Difficulty::ALL {
            let picked = BuiltinCatalog.pick_random(Some(difficulty)).unwrap();
            assert_eq!(picked.difficulty, difficulty);
        }
        assert!(BuiltinCatalog.pick_random(None).is_some());
        assert!(BuiltinCatalog.lookup("no-such-rule").is_none());
    }

    #[test]
    fn test_catalog_rule_edges() {
        assert!(rule("first-equals-last").holds(&[]));
        assert!(rule("fibonacci-sequence").holds(&[3]));
        assert!(!rule("gcd-gt-one").holds(&[]));
        assert!(!rule("divisible-by-length").holds(&[]));
        assert!(rule("perfect-squares").holds(&[0, 49, 10_000]));
        assert!(!rule("perfect-squares").holds(&[-4]));
        assert!(rule("digit-sum-divisible").holds(&[-12]));
        assert!(rule("alternating-odd-even").holds(&[-3, 4, -5]));
        assert!(!rule("mountain-array").holds(&[1, 2, 3]));
        assert!(rule("arithmetic-or-geometric").holds(&[3, -6, 12]));
    }

    #[test]
    fn test_difficulty_parsing() {
        assert_eq!("Medium".parse::<Difficulty>().unwrap(), Difficulty::Medium);
        assert!("extreme".parse::<Difficulty>().is_err());
        assert_eq!(Difficulty::Hard.free_checks(), 3);
    }

    #[test]
    fn test_primality_on_large_values() {
        use crate::catalog::is_prime;
        let primes = [2, 3, 5, 37, 41, 7919, 2_147_483_647, 1_000_000_007, 9_007_199_254_740_881];
        for p in primes {
            assert!(is_prime(p), "{p}");
        }
        // Carmichael numbers and strong pseudoprimes to small bases
        let composites = [
            -7, 0, 1, 4, 561, 2047, 1_373_653, 25_326_001, 3_215_031_751, 9_007_199_254_740_883,
            1_000_000_007 * 3,
        ];
        for c in composites {
            assert!(!is_prime(c), "{c}");
        }
        assert!(is_prime(2_305_843_009_213_693_951));

        let reference = rule("even-prime-count");
        let big = MAX_SAFE_INTEGER - 110;
        assert!(reference.holds(&vec![big; 10_000]));
        assert!(!reference.holds(&[big, 4, 6]));
    }

    // --- Config ---

    #[test]
    fn test_config_defaults_fill_missing_keys() {
        let config = GameConfig::from_json(r#"{"corpus": {"num_tests": 50}, "max_checks": 30}"#).unwrap();
        assert_eq!(config.corpus.num_tests, 50);
        assert_eq!(config.corpus.max_array_length, 20);
        assert_eq!(config.max_checks, 30);
        assert_eq!(config.sandbox, SandboxLimits::default());
        assert_eq!(config.session_ttl_secs, 604_800);
    }

    #[test]
    fn test_config_validation() {
        let mut config = GameConfig::default();
        assert!(config.validate().is_ok());
        config.corpus.min_value = 10;
        config.corpus.max_value = 5;
        assert!(matches!(config.validate(), Err(GameError::Config(_))));

        let mut config = GameConfig::default();
        config.corpus.max_value = MAX_SAFE_INTEGER + 1;
        assert!(config.validate().is_err());

        for json in [
            r#"{"corpus": {"max_array_length": 0}}"#,
            r#"{"sandbox": {"time_ms": 0}}"#,
            r#"{"sandbox": {"memory_mb": 0}}"#,
            r#"{"max_checks": 0}"#,
        ] {
            assert!(GameConfig::from_json(json).is_err(), "{json} accepted");
        }
        assert!(matches!(GameConfig::from_json("{"), Err(GameError::Json(_))));
    }

    #[test]
    fn test_sandbox_limits_conversion() {
        let limits = SandboxLimits {
            time_ms: 250,
            memory_mb: 2,
            max_steps: 99,
        }
        .execution_limits();
        assert_eq!(limits.time, std::time::Duration::from_millis(250));
        assert_eq!(limits.memory_bytes, 2 * 1024 * 1024);
        assert_eq!(limits.max_steps, 99);
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.json");
        std::fs::write(&path, r#"{"session_ttl_secs": 60}"#).unwrap();
        let config = GameConfig::load(&path).unwrap();
        assert_eq!(config.session_ttl_secs, 60);
        assert_eq!(config.session_ttl(), Duration::seconds(60));
        assert!(matches!(
            GameConfig::load(&dir.path().join("missing.json")),
            Err(GameError::Io(_))
        ));
    }

    // --- Pipeline ---

    #[test]
    fn test_pipeline_accepts_equivalent_rule() {
        let report = run_submission(
            &rule("all-positive"),
            "function isValid(arr) { return arr.every(n => n > 0); }",
            &small_corpus(),
            SandboxLimits::default().execution_limits(),
            Some(7),
        );
        assert!(report.success, "{}", report.message);
        assert_eq!(report.tests_run, 60);
        assert_eq!(
            report.message,
            "Congratulations! You discovered the rule: \"All numbers must be positive\""
        );
        assert_eq!(report.entry_point.as_deref(), Some("isValid"));
        assert!(report.failed_case.is_none());
    }

    #[test]
    fn test_pipeline_reports_counterexample() {
        let report = run_submission(
            &rule("all-positive"),
            "const guess = (arr) => arr.every(n => n >= 0);",
            &small_corpus(),
            SandboxLimits::default().execution_limits(),
            Some(7),
        );
        assert!(!report.success);
        assert_eq!(report.failed_case, Some(vec![0]));
        assert_eq!(report.expected_result, Some(false));
        assert_eq!(report.player_result, Some(true));
        assert_eq!(report.tests_run, 2);
        assert_eq!(report.message, pipeline::MISMATCH_MESSAGE);
    }

    #[test]
    fn test_pipeline_scanner_rejects_before_running() {
        let report = run_submission(
            &rule("all-positive"),
            "function f(arr) { return eval('true'); }",
            &small_corpus(),
            SandboxLimits::default().execution_limits(),
            Some(7),
        );
        assert!(!report.success);
        assert_eq!(report.tests_run, 0);
        assert!(report.message.starts_with("Forbidden construct 'eval'"), "{}", report.message);
        assert!(report.entry_point.is_none());
        assert!(report.corpus_fingerprint.is_none());
    }

    #[test]
    fn test_pipeline_compile_errors_are_verbatim() {
        let limits = SandboxLimits::default().execution_limits();
        let report = run_submission(&rule("all-even"), "let x = 1;", &small_corpus(), limits, None);
        assert_eq!(report.tests_run, 0);
        assert_eq!(report.message, "No function was defined. Please define a function.");

        let report = run_submission(
            &rule("all-even"),
            "function a(x) { return true }\nfunction b(x) { return false }",
            &small_corpus(),
            limits,
            None,
        );
        assert_eq!(report.tests_run, 0);
        assert!(report.message.contains("a, b"), "{}", report.message);
    }

    #[test]
    fn test_pipeline_sandbox_failure() {
        let report = run_submission(
            &rule("all-even"),
            "function f(arr) { return arr.length; }",
            &small_corpus(),
            SandboxLimits::default().execution_limits(),
            Some(7),
        );
        assert!(!report.success);
        assert_eq!(report.tests_run, 1);
        assert_eq!(report.message, "Code execution error: expected boolean, got number");
        assert!(report.failed_case.is_none());
    }

    #[test]
    fn test_pipeline_timeout_is_a_failure() {
        let limits = SandboxLimits {
            time_ms: 50,
            memory_mb: 16,
            max_steps: 200_000,
        }
        .execution_limits();
        let report = run_submission(
            &rule("all-even"),
            "function spin(arr) { while (true) {} }",
            &small_corpus(),
            limits,
            Some(7),
        );
        assert_eq!(report.tests_run, 1);
        assert!(report.message.starts_with("Code execution error: Execution timeout"), "{}", report.message);
    }

    #[test]
    fn test_report_serializes_outward_shape() {
        let report = run_submission(
            &rule("all-positive"),
            "const guess = (arr) => true;",
            &small_corpus(),
            SandboxLimits::default().execution_limits(),
            Some(7),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["testsRun"], 2);
        assert_eq!(json["failedCase"], serde_json::json!([0]));
        assert_eq!(json["expectedResult"], false);
        assert_eq!(json["playerResult"], true);
    }

    // --- Stores ---

    #[test]
    fn test_memory_store_update_is_all_or_nothing() {
        let store = MemoryStore::new(Duration::days(7));
        let mut s = session_for("all-even", 20);
        s.start_time = Utc::now();
        store.create(s.clone()).unwrap();
        assert!(store.create(s.clone()).is_err());

        let err = store
            .update(&s.id, |session| {
                session.checks_used = 99;
                Err::<(), _>(GameError::InvalidInput("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, GameError::InvalidInput(_)));
        assert_eq!(store.get(&s.id).unwrap().unwrap().checks_used, 0);

        store.update(&s.id, |session| Ok(session.use_hint()?)).unwrap();
        assert!(store.get(&s.id).unwrap().unwrap().hint_used);
        assert!(matches!(
            store.update("missing", |_| Ok(())),
            Err(GameError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_memory_store_ttl_and_sweep() {
        let store = MemoryStore::new(Duration::hours(1));
        let mut stale = session_for("all-even", 20);
        stale.id = "stale".into();
        stale.start_time = Utc::now() - Duration::hours(2);
        let mut fresh = session_for("all-even", 20);
        fresh.id = "fresh".into();
        fresh.start_time = Utc::now();
        store.create(stale).unwrap();
        store.create(fresh).unwrap();

        assert!(store.get("stale").unwrap().is_none());
        assert!(matches!(
            store.update("stale", |_| Ok(())),
            Err(GameError::SessionNotFound(_))
        ));
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(store.sweep_expired(Utc::now()).unwrap(), 1);
        assert_eq!(store.sweep_expired(Utc::now()).unwrap(), 0);
        assert!(store.get("fresh").unwrap().is_some());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("sessions"), Duration::days(7)).unwrap();
        let mut s = session_for("all-even", 20);
        s.start_time = Utc::now();
        store.create(s.clone()).unwrap();
        assert_eq!(store.get(&s.id).unwrap(), Some(s.clone()));

        store
            .update(&s.id, |session| Ok(session.check(&rule("all-even"), vec![2], Utc::now())?))
            .unwrap();
        let reloaded = FileStore::open(store.dir(), Duration::days(7)).unwrap();
        let stored = reloaded.get(&s.id).unwrap().unwrap();
        assert_eq!(stored.checks_used, 1);
        assert_eq!(stored.check_history[0].array, vec![2]);

        let err = store
            .update(&s.id, |session| Ok(session.complete_submission(true, Utc::now())?))
            .unwrap_err();
        assert!(matches!(err, GameError::State(_)));
        assert_eq!(store.get(&s.id).unwrap().unwrap().phase, Phase::Playing);
    }

    #[test]
    fn test_file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), Duration::days(7)).unwrap();
        assert!(matches!(store.get("../etc/passwd"), Err(GameError::SessionNotFound(_))));
        assert!(matches!(store.get(""), Err(GameError::SessionNotFound(_))));
        assert_eq!(store.get("abcdef").unwrap(), None);
    }

    #[test]
    fn test_file_store_list_and_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), Duration::hours(1)).unwrap();
        let mut stale = session_for("all-even", 20);
        stale.id = "stale".into();
        stale.start_time = Utc::now() - Duration::hours(3);
        let mut fresh = session_for("sorted", 20);
        fresh.id = "fresh".into();
        fresh.start_time = Utc::now();
        store.create(stale).unwrap();
        store.create(fresh).unwrap();
        std::fs::write(dir.path().join("junk.json"), "not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let live = store.list().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, "fresh");
        assert_eq!(store.sweep_expired(Utc::now()).unwrap(), 1);
        assert!(!dir.path().join("stale.json").exists());
        assert!(dir.path().join("fresh.json").exists());
    }

    // --- Service input checks ---

    #[test]
    fn test_service_rejects_oversized_checks() {
        let game = Game::new(MemoryStore::new(Duration::days(1)), BuiltinCatalog, GameConfig::default()).unwrap();
        let id = game.new_game_with_rule("all-even", None).unwrap().session_id;
        let err = game.check(&id, vec![0; MAX_CHECK_LENGTH + 1]).unwrap_err();
        assert!(matches!(err, GameError::InvalidInput(_)));
        let err = game.check(&id, vec![i64::MIN]).unwrap_err();
        assert!(matches!(err, GameError::InvalidInput(_)));
        assert_eq!(game.session(&id).unwrap().checks_used, 0);
    }

    #[test]
    fn test_service_reclaims_abandoned_submission() {
        let dir = tempfile::tempdir().unwrap();
        let open = || FileStore::open(dir.path(), Duration::days(7)).unwrap();
        let game = Game::new(open(), BuiltinCatalog, GameConfig::default()).unwrap();
        let id = game.new_game_with_rule("all-even", None).unwrap().session_id;

        // a verifier that entered `testing` and never came back
        let other = open();
        other
            .update(&id, |s| Ok(s.begin_submission(Utc::now())?))
            .unwrap();
        assert!(matches!(
            game.check(&id, vec![2]),
            Err(GameError::State(StateError::InvalidPhase {
                phase: Phase::Testing,
                ..
            }))
        ));
        assert!(game.quit(&id).is_err());

        let grace = GameConfig::default().submission_grace();
        other
            .update(&id, |s| {
                s.testing_since = Some(Utc::now() - grace - Duration::seconds(1));
                Ok(())
            })
            .unwrap();
        assert!(game.check(&id, vec![2]).unwrap().result);
        let session = game.session(&id).unwrap();
        assert_eq!(session.phase, Phase::Playing);
        assert_eq!(session.submissions, 0);
        assert_eq!(session.checks_used, 1);
        assert_eq!(session.testing_since, None);

        other
            .update(&id, |s| Ok(s.begin_submission(Utc::now() - grace * 2)?))
            .unwrap();
        assert_eq!(game.quit(&id).unwrap().phase, Phase::Lost);
    }

    #[test]
    fn test_service_checks_large_primes() {
        let game = Game::new(MemoryStore::new(Duration::days(1)), BuiltinCatalog, GameConfig::default()).unwrap();
        let id = game.new_game_with_rule("even-prime-count", None).unwrap().session_id;
        let big = MAX_SAFE_INTEGER - 110;
        assert!(game.check(&id, vec![big; MAX_CHECK_LENGTH]).unwrap().result);
        assert!(!game.check(&id, vec![big, MAX_SAFE_INTEGER]).unwrap().result);
        assert_eq!(game.session(&id).unwrap().checks_used, 2);
    }

    #[test]
    fn test_service_rejects_invalid_config() {
        let config = GameConfig {
            max_checks: 0,
            ..GameConfig::default()
        };
        assert!(Game::new(MemoryStore::new(Duration::days(1)), BuiltinCatalog, config).is_err());
    }
}
