//! Convergence poller — waits for the remote query surface to catch up.
//!
//! Every tick sleeps `interval`, samples once and records `(count, instant)`
//! in a sliding window used for rate and ETA estimates. The loop ends as
//! `Converged`, `TimedOut` after `max_attempts` ticks, or `Cancelled`.
//! A failed sample still uses up its tick, so termination never depends on
//! what the sampler returns.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use catsync_core::{ConfigError, EntityType, NaturalKey, PollConfig};

use crate::error::RemoteError;
use crate::remote::CatalogRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Converged,
    TimedOut,
    Cancelled,
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PollStatus::Converged => "converged",
            PollStatus::TimedOut => "timed out",
            PollStatus::Cancelled => "cancelled",
        })
    }
}

/// What a key-set target expects of its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExpectation {
    Present,
    Absent,
}

/// Progress emitted after every successful sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub attempt: u32,
    pub max_attempts: u32,
    pub current: usize,
    pub expected: usize,
    /// Items per second over the sliding window.
    pub rate: Option<f64>,
    pub eta: Option<Duration>,
    pub movement_detected: bool,
    pub elapsed: Duration,
}

pub type Observer = Arc<dyn Fn(&Observation) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollReport {
    pub status: PollStatus,
    pub attempts: u32,
    pub elapsed: Duration,
    pub current: usize,
    pub expected: usize,
    pub movement_detected: bool,
    /// Key-set targets only: keys that reached the expected state.
    pub confirmed: Vec<NaturalKey>,
    /// Key-set targets only: keys that never did.
    pub remaining: Vec<NaturalKey>,
    pub last_error: Option<String>,
}

impl PollReport {
    pub fn converged(&self) -> bool {
        self.status == PollStatus::Converged
    }

    /// Operator-facing one-liner.
    pub fn message(&self) -> String {
        let Self {
            current,
            expected,
            attempts,
            ..
        } = self;
        match self.status {
            PollStatus::Converged => {
                format!("converged: {current} of {expected} confirmed after {attempts} polls")
            }
            PollStatus::Cancelled => {
                format!("cancelled after {attempts} polls: {current} of {expected} confirmed")
            }
            PollStatus::TimedOut if !self.movement_detected => format!(
                "submitted but not yet processed: {current} of {expected} visible, \
                 no change in {attempts} polls"
            ),
            PollStatus::TimedOut => format!(
                "partially converged: {current} of {expected} confirmed after {attempts} polls"
            ),
        }
    }
}

/// Bounded `(count, instant)` history.
#[derive(Debug)]
struct RateWindow {
    samples: VecDeque<(usize, Instant)>,
    capacity: usize,
}

impl RateWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    fn push(&mut self, count: usize, at: Instant) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((count, at));
    }

    /// Δcount / Δtime over the window, when positive.
    fn rate(&self) -> Option<f64> {
        let (first_count, first_at) = *self.samples.front()?;
        let (last_count, last_at) = *self.samples.back()?;
        let dt = last_at.duration_since(first_at).as_secs_f64();
        if dt <= 0.0 || last_count <= first_count {
            return None;
        }
        Some((last_count - first_count) as f64 / dt)
    }

    fn eta(&self, current: usize, expected: usize) -> Option<Duration> {
        let rate = self.rate()?;
        let remaining = expected.saturating_sub(current) as f64;
        Some(Duration::from_secs_f64(remaining / rate))
    }
}

/// Per-loop bookkeeping shared by count and key-set targets.
struct Progress {
    expected: usize,
    max_attempts: u32,
    started: Instant,
    window: RateWindow,
    initial: Option<usize>,
    current: usize,
    movement_detected: bool,
    attempts: u32,
    last_error: Option<String>,
}

impl Progress {
    fn new(expected: usize, config: &PollConfig) -> Self {
        Self {
            expected,
            max_attempts: config.max_attempts,
            started: Instant::now(),
            window: RateWindow::new(config.window),
            initial: None,
            current: 0,
            movement_detected: false,
            attempts: 0,
            last_error: None,
        }
    }

    /// Count movement against a known starting point instead of the first sample.
    fn with_baseline(mut self, baseline: usize) -> Self {
        self.initial = Some(baseline);
        self
    }

    fn record(&mut self, attempt: u32, current: usize) -> Observation {
        let now = Instant::now();
        self.attempts = attempt;
        self.current = current;
        match self.initial {
            None => self.initial = Some(current),
            Some(initial) if initial != current => self.movement_detected = true,
            Some(_) => {}
        }
        self.window.push(current, now);
        Observation {
            attempt,
            max_attempts: self.max_attempts,
            current,
            expected: self.expected,
            rate: self.window.rate(),
            eta: self.window.eta(current, self.expected),
            movement_detected: self.movement_detected,
            elapsed: now.duration_since(self.started),
        }
    }

    fn record_error(&mut self, attempt: u32, err: &RemoteError) {
        self.attempts = attempt;
        self.last_error = Some(err.to_string());
    }

    fn finish(self, status: PollStatus) -> PollReport {
        PollReport {
            status,
            attempts: self.attempts,
            elapsed: self.started.elapsed(),
            current: self.current,
            expected: self.expected,
            movement_detected: self.movement_detected,
            confirmed: Vec::new(),
            remaining: Vec::new(),
            last_error: self.last_error,
        }
    }
}

/// Polls a count or key-set target until it converges or times out.
#[derive(Clone)]
pub struct ConvergencePoller {
    config: PollConfig,
    cancel: CancellationToken,
    observer: Option<Observer>,
}

impl fmt::Debug for ConvergencePoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvergencePoller")
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl ConvergencePoller {
    pub fn new(config: PollConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
            observer: None,
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Sleep one interval. Returns `false` if cancelled first.
    pub async fn wait_interval(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.interval) => true,
        }
    }

    fn emit(&self, label: &str, observation: &Observation) {
        tracing::info!(
            target_name = label,
            attempt = observation.attempt,
            max_attempts = observation.max_attempts,
            count = observation.current,
            expected = observation.expected,
            eta_secs = observation.eta.map(|d| d.as_secs()),
            "convergence poll",
        );
        if let Some(observer) = &self.observer {
            observer(observation);
        }
    }

    /// Poll until `sample()` reports at least `expected`.
    pub async fn poll_count<F, Fut>(
        &self,
        label: &str,
        expected: usize,
        mut sample: F,
    ) -> PollReport
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<usize, RemoteError>>,
    {
        let mut progress = Progress::new(expected, &self.config);
        for attempt in 1..=self.config.max_attempts {
            if !self.wait_interval().await {
                return progress.finish(PollStatus::Cancelled);
            }
            match sample().await {
                Ok(current) => {
                    let observation = progress.record(attempt, current);
                    self.emit(label, &observation);
                    if current >= expected {
                        return progress.finish(PollStatus::Converged);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        target_name = label,
                        attempt,
                        error = %err,
                        "poll sample failed",
                    );
                    progress.record_error(attempt, &err);
                }
            }
        }
        let report = progress.finish(PollStatus::TimedOut);
        tracing::warn!(target_name = label, "{}", report.message());
        report
    }

    /// Poll until every key in `keys` is `expectation` (present or absent).
    ///
    /// Each tick re-queries only the keys not yet confirmed, in sub-batches
    /// of `sample_batch_size`.
    pub async fn poll_keys(
        &self,
        remote: &dyn CatalogRemote,
        entity_type: EntityType,
        keys: &[NaturalKey],
        expectation: KeyExpectation,
    ) -> PollReport {
        let mut seen = HashSet::new();
        let mut remaining: Vec<NaturalKey> = keys
            .iter()
            .filter(|k| seen.insert(*k))
            .cloned()
            .collect();
        let expected = remaining.len();
        let label = format!("{entity_type} {}", match expectation {
            KeyExpectation::Present => "present",
            KeyExpectation::Absent => "absent",
        });

        // Nothing is confirmed before the first tick.
        let mut progress = Progress::new(expected, &self.config).with_baseline(0);
        let mut confirmed: Vec<NaturalKey> = Vec::new();
        let mut status = PollStatus::TimedOut;

        if remaining.is_empty() {
            status = PollStatus::Converged;
        }

        let mut attempt = 0;
        while status == PollStatus::TimedOut && attempt < self.config.max_attempts {
            attempt += 1;
            if !self.wait_interval().await {
                status = PollStatus::Cancelled;
                break;
            }

            let mut still = Vec::with_capacity(remaining.len());
            let mut sample_error = None;
            for chunk in remaining.chunks(self.config.sample_batch_size) {
                match remote.query_by_keys(entity_type, chunk).await {
                    Ok(response) => {
                        let found: HashSet<&NaturalKey> = response.found.iter().collect();
                        for key in chunk {
                            let done = match expectation {
                                KeyExpectation::Present => found.contains(key),
                                KeyExpectation::Absent => !found.contains(key),
                            };
                            if done {
                                confirmed.push(key.clone());
                            } else {
                                still.push(key.clone());
                            }
                        }
                    }
                    Err(err) => {
                        still.extend(chunk.iter().cloned());
                        sample_error = Some(err);
                    }
                }
            }
            remaining = still;

            if let Some(err) = &sample_error {
                tracing::warn!(target_name = %label, attempt, error = %err, "poll sample failed");
                progress.record_error(attempt, err);
            }
            let observation = progress.record(attempt, confirmed.len());
            self.emit(&label, &observation);
            if remaining.is_empty() {
                status = PollStatus::Converged;
            }
        }

        let mut report = progress.finish(status);
        report.current = confirmed.len();
        report.confirmed = confirmed;
        report.remaining = remaining;
        if status == PollStatus::TimedOut {
            tracing::warn!(target_name = %label, "{}", report.message());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::memory::{InMemoryRemote, Operation};

    fn config(interval_secs: u64, max_attempts: u32) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(interval_secs),
            max_attempts,
            ..PollConfig::default()
        }
    }

    fn recording_poller(config: PollConfig) -> (ConvergencePoller, Arc<Mutex<Vec<Observation>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let poller = ConvergencePoller::new(config)
            .unwrap()
            .with_observer(Arc::new(move |o: &Observation| sink.lock().unwrap().push(o.clone())));
        (poller, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn converges_on_fourth_tick_after_forty_seconds() {
        let (poller, seen) = recording_poller(config(10, 60));
        let mut samples = vec![0usize, 0, 40, 100].into_iter();

        let report = poller
            .poll_count("products", 100, || {
                let next = samples.next().unwrap_or(100);
                async move { Ok(next) }
            })
            .await;

        assert_eq!(report.status, PollStatus::Converged);
        assert_eq!(report.attempts, 4);
        assert_eq!(report.elapsed, Duration::from_secs(40));
        assert!(report.movement_detected);

        let seen = seen.lock().unwrap();
        let movement: Vec<bool> = seen.iter().map(|o| o.movement_detected).collect();
        assert_eq!(movement, [false, false, true, true]);
        // 40 items over the 20s between tick 1 and tick 3.
        assert_eq!(seen[2].rate, Some(2.0));
        assert_eq!(seen[2].eta, Some(Duration::from_secs(30)));
        assert_eq!(seen[1].eta, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_sampler_times_out_within_max_attempts() {
        let poller = ConvergencePoller::new(config(10, 5)).unwrap();
        let mut calls = 0;
        let report = poller
            .poll_count("stuck", 10, || {
                calls += 1;
                async { Ok(3) }
            })
            .await;

        assert_eq!(report.status, PollStatus::TimedOut);
        assert_eq!(report.attempts, 5);
        assert_eq!(calls, 5);
        assert!(!report.movement_detected);
        assert!(report.message().starts_with("submitted but not yet processed"));
        assert!(report.elapsed <= poller.config().ceiling());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_sampler_still_terminates() {
        let poller = ConvergencePoller::new(config(1, 3)).unwrap();
        let report = poller
            .poll_count("broken", 1, || async {
                Err(RemoteError::status(500, "boom"))
            })
            .await;
        assert_eq!(report.status, PollStatus::TimedOut);
        assert_eq!(report.attempts, 3);
        assert!(report.last_error.unwrap().contains("500"));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_progress_is_reported_as_such() {
        let poller = ConvergencePoller::new(config(1, 3)).unwrap();
        let mut samples = vec![1usize, 4, 6].into_iter();
        let report = poller
            .poll_count("partial", 10, || {
                let next = samples.next().unwrap_or(6);
                async move { Ok(next) }
            })
            .await;
        assert_eq!(
            report.message(),
            "partially converged: 6 of 10 confirmed after 3 polls"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling_early() {
        let cancel = CancellationToken::new();
        let poller = ConvergencePoller::new(config(10, 60))
            .unwrap()
            .with_cancellation(cancel.clone());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            trigger.cancel();
        });

        let report = poller.poll_count("cancel", 1, || async { Ok(0) }).await;
        assert_eq!(report.status, PollStatus::Cancelled);
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn key_polling_narrows_to_remaining_keys() {
        let remote = InMemoryRemote::new()
            .with_existing(EntityType::Product, &["A1", "A2", "A3"]);
        let poller = ConvergencePoller::new(PollConfig {
            sample_batch_size: 2,
            ..config(1, 10)
        })
        .unwrap();
        let keys: Vec<NaturalKey> = ["A1", "A2", "A3", "A4", "A5"]
            .into_iter()
            .map(NaturalKey::from)
            .collect();

        let report = poller
            .poll_keys(&remote, EntityType::Product, &keys, KeyExpectation::Present)
            .await;

        assert_eq!(report.status, PollStatus::TimedOut);
        assert_eq!(report.confirmed.len(), 3);
        assert_eq!(report.remaining, vec![NaturalKey::from("A4"), "A5".into()]);
        assert_eq!(report.attempts, 10);

        let sizes = remote.batch_sizes(Operation::Query, EntityType::Product);
        // Tick 1 checks all five in chunks of 2; later ticks only A4 and A5.
        assert_eq!(&sizes[..4], &[2, 2, 1, 2]);
        assert!(sizes[3..].iter().all(|s| *s == 2));
        assert_eq!(sizes.len(), 3 + 9);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_confirmed_on_first_tick_count_as_movement() {
        let remote = InMemoryRemote::new()
            .with_existing(EntityType::Product, &["A1", "A2", "A3"]);
        let poller = ConvergencePoller::new(config(1, 3)).unwrap();
        let keys: Vec<NaturalKey> = ["A1", "A2", "A3", "A4", "A5"]
            .into_iter()
            .map(NaturalKey::from)
            .collect();

        let report = poller
            .poll_keys(&remote, EntityType::Product, &keys, KeyExpectation::Present)
            .await;

        assert_eq!(report.status, PollStatus::TimedOut);
        assert!(report.movement_detected);
        assert_eq!(
            report.message(),
            "partially converged: 3 of 5 confirmed after 3 polls"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_visible_is_reported_as_unprocessed() {
        let remote = InMemoryRemote::new();
        let poller = ConvergencePoller::new(config(1, 3)).unwrap();
        let keys: Vec<NaturalKey> = vec!["Z1".into(), "Z2".into()];

        let report = poller
            .poll_keys(&remote, EntityType::Product, &keys, KeyExpectation::Present)
            .await;

        assert!(!report.movement_detected);
        assert_eq!(
            report.message(),
            "submitted but not yet processed: 0 of 2 visible, no change in 3 polls"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn key_polling_waits_for_indexing_lag() {
        let remote = InMemoryRemote::new().with_indexing_lag(2);
        let entities: Vec<_> = ["B1", "B2"]
            .into_iter()
            .map(|k| catsync_core::Entity::new(EntityType::Variant, k))
            .collect();
        remote.create(EntityType::Variant, &entities).await.unwrap();
        let keys: Vec<NaturalKey> = entities.iter().map(|e| e.key.clone()).collect();

        let poller = ConvergencePoller::new(config(10, 60)).unwrap();
        let report = poller
            .poll_keys(&remote, EntityType::Variant, &keys, KeyExpectation::Present)
            .await;

        assert!(report.converged());
        assert_eq!(report.attempts, 3);
        assert_eq!(report.elapsed, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn absence_polling_confirms_deletes() {
        let remote = InMemoryRemote::new().with_existing(EntityType::Price, &["X1", "X2"]);
        let keys: Vec<NaturalKey> = vec!["X1".into(), "X2".into()];
        remote.delete(EntityType::Price, &keys).await.unwrap();

        let poller = ConvergencePoller::new(config(1, 5)).unwrap();
        let report = poller
            .poll_keys(&remote, EntityType::Price, &keys, KeyExpectation::Absent)
            .await;
        assert!(report.converged());
        assert_eq!(report.confirmed.len(), 2);
    }

    #[tokio::test]
    async fn empty_key_set_converges_without_polling() {
        let remote = InMemoryRemote::new();
        let poller = ConvergencePoller::new(config(10, 5)).unwrap();
        let report = poller
            .poll_keys(&remote, EntityType::Price, &[], KeyExpectation::Present)
            .await;
        assert!(report.converged());
        assert_eq!(report.attempts, 0);
        assert!(remote.calls().is_empty());
    }
}
