#[cfg(test)]
mod integration_tests {
    use crate::{
        CandidateGenerator, ChatTransport, Config, DedupStore, ErrorSeverity, IterationOutcome,
        Message, Metrics, MockResolver, MockValidator, Notifier, Pipeline, ScoutError,
    };
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::Instant;

    const SEED: u64 = 42;
    const IMAGE: &str = "https://img.example/x.png";

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, Message)>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<(String, Message)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn current_subscribers(&self) -> Vec<String> {
            vec!["!general:example.org".to_string()]
        }

        async fn send(&self, subscriber: &str, message: &Message) -> Result<(), ScoutError> {
            self.sent
                .lock()
                .unwrap()
                .push((subscriber.to_string(), message.clone()));
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        transport: Arc<RecordingTransport>,
        pipeline: Pipeline,
    }

    impl Harness {
        fn new(resolver: MockResolver, validator: MockValidator) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = Arc::new(Config {
                store_path: dir.path().join("tried.txt"),
                ..Config::default()
            });
            let metrics = Arc::new(Metrics::new());
            let transport = Arc::new(RecordingTransport::default());
            let pipeline = Pipeline::new(
                config.clone(),
                DedupStore::open(&config.store_path),
                CandidateGenerator::seeded(&config, SEED),
                Arc::new(resolver),
                Arc::new(validator),
                Notifier::new(transport.clone(), metrics.clone()),
                metrics,
            );
            Self {
                dir,
                transport,
                pipeline,
            }
        }

        fn log_lines(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir.path().join("tried.txt"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    /// The candidates a fresh pipeline seeded with `SEED` will draw, in order.
    fn expected_candidates(count: usize) -> Vec<String> {
        let mut generator = CandidateGenerator::seeded(&Config::default(), SEED);
        let mut store = DedupStore::in_memory();
        (0..count)
            .map(|_| generator.next(&mut store).as_str().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_image_is_announced_and_logged() {
        let expected = expected_candidates(1).remove(0);

        let mut resolver = MockResolver::new();
        let wanted = expected.clone();
        resolver
            .expect_resolve()
            .times(1)
            .withf(move |candidate| candidate.as_str() == wanted)
            .returning(|_| Ok(Some(IMAGE.to_string())));
        let mut validator = MockValidator::new();
        validator
            .expect_validate()
            .times(1)
            .withf(|url| url == IMAGE)
            .returning(|_| true);

        let mut harness = Harness::new(resolver, validator);
        let start = Instant::now();
        let outcome = harness.pipeline.tick().await;

        match outcome {
            IterationOutcome::Announced {
                candidate,
                url,
                report,
            } => {
                assert_eq!(candidate.as_str(), expected);
                assert_eq!(url, IMAGE);
                assert_eq!(report.delivered, vec!["!general:example.org"]);
                assert!(report.failed.is_empty());
            }
            other => panic!("expected an announcement, got {other:?}"),
        }

        let sent = harness.transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.plain.contains(&expected));
        assert!(sent[0].1.plain.contains(IMAGE));
        assert!(sent[0].1.html.contains(IMAGE));

        assert_eq!(harness.log_lines(), vec![expected]);

        let paused = start.elapsed();
        assert!(paused >= Duration::from_secs(3));
        assert!(paused <= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_found_skips_validation_and_notification() {
        let mut resolver = MockResolver::new();
        resolver.expect_resolve().times(1).returning(|_| Ok(None));
        let mut validator = MockValidator::new();
        validator.expect_validate().never();

        let mut harness = Harness::new(resolver, validator);
        let start = Instant::now();
        let outcome = harness.pipeline.tick().await;

        assert!(matches!(outcome, IterationOutcome::NotFound { .. }));
        assert!(harness.transport.sent().is_empty());
        assert_eq!(harness.log_lines().len(), 1);
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_link_is_not_announced() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_| Ok(Some(IMAGE.to_string())));
        let mut validator = MockValidator::new();
        validator.expect_validate().times(1).returning(|_| false);

        let mut harness = Harness::new(resolver, validator);
        let outcome = harness.pipeline.tick().await;

        match outcome {
            IterationOutcome::DeadLink { url, .. } => assert_eq!(url, IMAGE),
            other => panic!("expected a dead link, got {other:?}"),
        }
        assert!(harness.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolver_error_backs_off_and_moves_on() {
        let expected = expected_candidates(2);

        let mut resolver = MockResolver::new();
        let mut calls = 0;
        resolver.expect_resolve().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(ScoutError::Navigation("connection reset".to_string()))
            } else {
                Ok(None)
            }
        });
        let mut validator = MockValidator::new();
        validator.expect_validate().never();

        let mut harness = Harness::new(resolver, validator);

        let start = Instant::now();
        assert_eq!(harness.pipeline.tick().await, IterationOutcome::Failed);
        assert!(start.elapsed() >= Duration::from_secs(30));

        match harness.pipeline.tick().await {
            IterationOutcome::NotFound { candidate } => {
                assert_eq!(candidate.as_str(), expected[1]);
            }
            other => panic!("expected nothing found, got {other:?}"),
        }

        assert_eq!(harness.log_lines(), expected);
        assert!(harness.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_never_repeats_a_logged_candidate() {
        let mut resolver = MockResolver::new();
        resolver.expect_resolve().returning(|_| Ok(None));
        let mut harness = Harness::new(resolver, MockValidator::new());
        for _ in 0..5 {
            harness.pipeline.tick().await;
        }
        let first_run = harness.log_lines();
        assert_eq!(first_run.len(), 5);

        // Same seed, same log: every previously drawn candidate must be skipped.
        let mut store = DedupStore::open(harness.dir.path().join("tried.txt"));
        assert_eq!(store.len(), 5);
        let mut generator = CandidateGenerator::seeded(&Config::default(), SEED);
        for _ in 0..5 {
            let candidate = generator.next(&mut store);
            assert!(!first_run.contains(&candidate.as_str().to_string()));
        }
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_error_severity() {
        assert!(matches!(
            ScoutError::Timeout(Duration::from_secs(5)).severity(),
            ErrorSeverity::Low
        ));
        assert!(matches!(
            ScoutError::Network("reset".to_string()).severity(),
            ErrorSeverity::Medium
        ));
        assert!(matches!(
            ScoutError::Configuration("missing".to_string()).severity(),
            ErrorSeverity::High
        ));
        assert!(matches!(
            ScoutError::WorkerUnavailable.severity(),
            ErrorSeverity::High
        ));
    }
}
