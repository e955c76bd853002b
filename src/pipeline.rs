//! The probing loop
//!
//! One iteration walks `Generate -> Resolve -> Validate -> Notify` and then
//! pauses:
//!
//! | Outcome                       | Pause                              |
//! |-------------------------------|------------------------------------|
//! | announced                     | random cooldown in `[min, max]`    |
//! | nothing found / dead link     | fixed `skip_delay`                 |
//! | error or panic in the stages  | fixed `failure_backoff`            |
//!
//! Iterations never overlap, and nothing but a shutdown signal ends the loop.

use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    format_duration, Candidate, CandidateGenerator, Config, DedupStore, DeliveryReport,
    ErrorSeverity, Metrics, Notifier, Resolver, StageFailure, Validator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generate,
    Resolve,
    Validate,
    Notify,
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Announced {
        candidate: Candidate,
        url: String,
        report: DeliveryReport,
    },
    NotFound {
        candidate: Candidate,
    },
    DeadLink {
        candidate: Candidate,
        url: String,
    },
    Failed,
}

pub struct Pipeline {
    config: Arc<Config>,
    store: DedupStore,
    generator: CandidateGenerator,
    resolver: Arc<dyn Resolver>,
    validator: Arc<dyn Validator>,
    notifier: Notifier,
    metrics: Arc<Metrics>,
    rng: StdRng,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        store: DedupStore,
        generator: CandidateGenerator,
        resolver: Arc<dyn Resolver>,
        validator: Arc<dyn Validator>,
        notifier: Notifier,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            store,
            generator,
            resolver,
            validator,
            notifier,
            metrics,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    /// Run iterations until `shutdown` fires.
    ///
    /// Shutdown is honoured at any await point, mid-iteration included; the
    /// stage futures own no resources that outlive being dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Probing {} with {} candidates already tried",
            self.config.origin,
            self.store.len()
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Pipeline stopping");
                    break;
                }
                _ = self.tick() => {}
            }
        }
        let stats = self.metrics.stats();
        info!(
            "Pipeline stopped after {}: {} candidates, {} announcements, {} back-offs",
            format_duration(stats.uptime),
            stats.candidates_generated,
            stats.announcements,
            stats.loop_backoffs
        );
    }

    /// One full iteration including the pause that follows it.
    ///
    /// Errors and panics from the stages are absorbed here and turned into
    /// the long back-off.
    pub async fn tick(&mut self) -> IterationOutcome {
        let attempt = AssertUnwindSafe(self.run_iteration()).catch_unwind().await;

        let outcome = match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(failure)) => {
                self.log_failure(&failure);
                IterationOutcome::Failed
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Iteration panicked: {}", reason);
                IterationOutcome::Failed
            }
        };

        let pause = self.pause_after(&outcome);
        if matches!(outcome, IterationOutcome::Failed) {
            self.metrics.record_backoff();
            warn!("Backing off for {}", format_duration(pause));
        } else {
            debug!(stage = ?Stage::Cooldown, "Sleeping {}", format_duration(pause));
        }
        sleep(pause).await;
        outcome
    }

    async fn run_iteration(&mut self) -> Result<IterationOutcome, StageFailure> {
        let candidate = self.generator.next(&mut self.store);
        self.metrics.record_candidate();
        self.metrics.record_collisions(self.generator.last_collisions());
        info!(stage = ?Stage::Generate, "Testing {}...", candidate);

        let resolved = self
            .resolver
            .resolve(&candidate)
            .await
            .map_err(|e| StageFailure::new(Stage::Resolve, Some(candidate.clone()), e))?;

        let Some(url) = resolved else {
            return Ok(IterationOutcome::NotFound { candidate });
        };

        debug!(stage = ?Stage::Validate, "Checking {}", url);
        if !self.validator.validate(&url).await {
            self.metrics.record_validation_failure();
            info!("{} points at a dead image, skipping", candidate);
            return Ok(IterationOutcome::DeadLink { candidate, url });
        }

        debug!(stage = ?Stage::Notify, "Announcing {}", candidate);
        let report = self.notifier.announce(&candidate, &url).await;
        if report.delivered.is_empty() {
            warn!("{} was found but reached no subscriber", candidate);
        } else {
            self.metrics.record_announcement();
        }
        Ok(IterationOutcome::Announced {
            candidate,
            url,
            report,
        })
    }

    fn pause_after(&mut self, outcome: &IterationOutcome) -> Duration {
        match outcome {
            IterationOutcome::Announced { .. } => self.cooldown(),
            IterationOutcome::NotFound { .. } | IterationOutcome::DeadLink { .. } => {
                self.config.skip_delay
            }
            IterationOutcome::Failed => self.config.failure_backoff,
        }
    }

    /// Randomized pause after an announcement.
    fn cooldown(&mut self) -> Duration {
        let min = self.config.cooldown_min;
        let max = self.config.cooldown_max;
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    fn log_failure(&self, failure: &StageFailure) {
        let candidate = failure
            .candidate
            .as_ref()
            .map(Candidate::as_str)
            .unwrap_or("-");
        match failure.error.severity() {
            ErrorSeverity::Low => warn!(candidate, "Iteration failed: {}", failure),
            ErrorSeverity::Medium | ErrorSeverity::High => {
                error!(candidate, "Iteration failed: {}", failure)
            }
        }
    }
}
