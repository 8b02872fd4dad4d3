//! Circuit breaker pattern implementation.
//!
//! Breakers track call outcomes in a sliding window and open once the failure
//! rate (or slow-call rate) reaches its threshold. An open breaker rejects
//! calls until its wait duration elapses, then lets a limited number of trial
//! calls through in the half-open state. A failed trial re-opens the breaker;
//! enough successful trials close it. There is no direct path from open to
//! closed.

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{ErrorKind, RestClientError, Result};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, limited requests are allowed for testing.
    HalfOpen,
}

/// How the sliding window aggregates outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlidingWindowType {
    /// The last `sliding_window_size` calls.
    #[default]
    CountBased,
    /// Calls from the last `sliding_window_size` seconds.
    TimeBased,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate in percent at which the circuit opens.
    pub failure_rate_threshold: f32,
    /// Slow-call rate in percent at which the circuit opens.
    pub slow_call_rate_threshold: f32,
    /// Calls taking at least this long are slow.
    pub slow_call_duration_threshold: Duration,
    /// Window type.
    pub sliding_window_type: SlidingWindowType,
    /// Window size, in calls or seconds depending on the type.
    pub sliding_window_size: u32,
    /// Calls required in the window before rates are evaluated.
    pub minimum_number_of_calls: u32,
    /// Time to stay open before allowing trial calls.
    pub wait_duration_in_open_state: Duration,
    /// Trial calls allowed, and successes required, in the half-open state.
    pub permitted_calls_in_half_open_state: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            sliding_window_type: SlidingWindowType::CountBased,
            sliding_window_size: 100,
            minimum_number_of_calls: 100,
            wait_duration_in_open_state: Duration::from_secs(60),
            permitted_calls_in_half_open_state: 10,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a count-based config opening at `failure_rate_threshold` percent.
    pub fn new(failure_rate_threshold: f32, wait_duration: Duration) -> Self {
        Self {
            failure_rate_threshold,
            wait_duration_in_open_state: wait_duration,
            ..Default::default()
        }
    }

    /// Use a count-based window of `size` calls.
    pub fn count_based(mut self, size: u32) -> Self {
        self.sliding_window_type = SlidingWindowType::CountBased;
        self.sliding_window_size = size;
        self
    }

    /// Use a time-based window of `seconds` seconds.
    pub fn time_based(mut self, seconds: u32) -> Self {
        self.sliding_window_type = SlidingWindowType::TimeBased;
        self.sliding_window_size = seconds;
        self
    }

    /// Set the minimum number of calls before rates are evaluated.
    pub fn with_minimum_calls(mut self, calls: u32) -> Self {
        self.minimum_number_of_calls = calls;
        self
    }

    /// Set the slow-call thresholds.
    pub fn with_slow_calls(mut self, rate: f32, duration: Duration) -> Self {
        self.slow_call_rate_threshold = rate;
        self.slow_call_duration_threshold = duration;
        self
    }

    /// Set the number of half-open trial calls.
    pub fn with_half_open_calls(mut self, calls: u32) -> Self {
        self.permitted_calls_in_half_open_state = calls;
        self
    }

    /// Check the configuration for values the breaker cannot work with.
    pub fn validate(&self) -> Result<()> {
        let rate_ok = |rate: f32| rate > 0.0 && rate <= 100.0;
        if !rate_ok(self.failure_rate_threshold) {
            return Err(RestClientError::config(format!(
                "failure_rate_threshold must be in (0, 100], got {}",
                self.failure_rate_threshold
            )));
        }
        if !rate_ok(self.slow_call_rate_threshold) {
            return Err(RestClientError::config(format!(
                "slow_call_rate_threshold must be in (0, 100], got {}",
                self.slow_call_rate_threshold
            )));
        }
        if self.sliding_window_size == 0 {
            return Err(RestClientError::config("sliding_window_size must be positive"));
        }
        if self.minimum_number_of_calls == 0 {
            return Err(RestClientError::config("minimum_number_of_calls must be positive"));
        }
        if self.permitted_calls_in_half_open_state == 0 {
            return Err(RestClientError::config(
                "permitted_calls_in_half_open_state must be positive",
            ));
        }
        Ok(())
    }

    fn minimum_calls(&self) -> u32 {
        match self.sliding_window_type {
            SlidingWindowType::CountBased => {
                self.minimum_number_of_calls.min(self.sliding_window_size)
            }
            SlidingWindowType::TimeBased => self.minimum_number_of_calls,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    failed: bool,
    slow: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    calls: u32,
    failed: u32,
    slow: u32,
}

impl Totals {
    fn add(&mut self, outcome: Outcome) {
        self.calls += 1;
        self.failed += u32::from(outcome.failed);
        self.slow += u32::from(outcome.slow);
    }

    fn remove(&mut self, outcome: Outcome) {
        self.calls -= 1;
        self.failed -= u32::from(outcome.failed);
        self.slow -= u32::from(outcome.slow);
    }

    fn failure_rate(&self) -> f32 {
        self.failed as f32 * 100.0 / self.calls as f32
    }

    fn slow_call_rate(&self) -> f32 {
        self.slow as f32 * 100.0 / self.calls as f32
    }
}

#[derive(Debug)]
struct SlidingWindow {
    kind: SlidingWindowType,
    size: u32,
    entries: VecDeque<(Instant, Outcome)>,
    totals: Totals,
}

impl SlidingWindow {
    fn new(kind: SlidingWindowType, size: u32) -> Self {
        Self {
            kind,
            size,
            entries: VecDeque::new(),
            totals: Totals::default(),
        }
    }

    fn record(&mut self, now: Instant, outcome: Outcome) {
        self.evict(now);
        if self.kind == SlidingWindowType::CountBased && self.entries.len() >= self.size as usize {
            if let Some((_, oldest)) = self.entries.pop_front() {
                self.totals.remove(oldest);
            }
        }
        self.entries.push_back((now, outcome));
        self.totals.add(outcome);
    }

    fn totals(&mut self, now: Instant) -> Totals {
        self.evict(now);
        self.totals
    }

    fn evict(&mut self, now: Instant) {
        if self.kind != SlidingWindowType::TimeBased {
            return;
        }
        let span = Duration::from_secs(u64::from(self.size));
        while let Some(&(at, outcome)) = self.entries.front() {
            if now.duration_since(at) < span {
                break;
            }
            self.entries.pop_front();
            self.totals.remove(outcome);
        }
    }
}

#[derive(Debug)]
enum Phase {
    Closed(SlidingWindow),
    Open { until: Instant },
    HalfOpen { outstanding: u32, successes: u32 },
}

impl Phase {
    fn state(&self) -> CircuitState {
        match self {
            Self::Closed(_) => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    generation: u64,
    last_transition: Instant,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    /// Current state.
    pub state: CircuitState,
    /// Failure rate in percent, once the minimum number of calls is buffered.
    pub failure_rate: Option<f32>,
    /// Slow-call rate in percent, once the minimum number of calls is buffered.
    pub slow_call_rate: Option<f32>,
    /// Calls in the window (or trial successes while half-open).
    pub buffered_calls: u32,
    /// Failed calls in the window.
    pub failed_calls: u32,
    /// Slow calls in the window.
    pub slow_calls: u32,
    /// Calls rejected since the breaker was created.
    pub not_permitted_calls: u64,
    /// When the breaker last changed state.
    pub last_transition: Instant,
}

/// Circuit breaker implementation.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    not_permitted: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window = SlidingWindow::new(config.sliding_window_type, config.sliding_window_size);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed(window),
                generation: 0,
                last_transition: Instant::now(),
            }),
            not_permitted: AtomicU64::new(0),
        }
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.phase.state()
    }

    /// Check whether a call would currently be permitted, without taking a permit.
    pub fn is_call_permitted(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        match inner.phase {
            Phase::Closed(_) => true,
            Phase::Open { .. } => false,
            Phase::HalfOpen { outstanding, .. } => {
                outstanding < self.config.permitted_calls_in_half_open_state
            }
        }
    }

    /// Acquire a permit for one call, or fail with [`RestClientError::CircuitOpen`].
    pub fn try_acquire(&self) -> Result<CallPermit<'_>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);

        let permitted = match &mut inner.phase {
            Phase::Closed(_) => true,
            Phase::Open { .. } => false,
            Phase::HalfOpen { outstanding, .. } => {
                if *outstanding < self.config.permitted_calls_in_half_open_state {
                    *outstanding += 1;
                    true
                } else {
                    false
                }
            }
        };

        if !permitted {
            self.not_permitted.fetch_add(1, Ordering::Relaxed);
            debug!(breaker = %self.name, "Call not permitted");
            return Err(RestClientError::CircuitOpen {
                name: self.name.clone(),
            });
        }

        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            started: now,
            settled: false,
        })
    }

    /// Snapshot the breaker's counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        let last_transition = inner.last_transition;
        let minimum = self.config.minimum_calls();

        let (totals, rated) = match &mut inner.phase {
            Phase::Closed(window) => {
                let totals = window.totals(now);
                (totals, totals.calls >= minimum)
            }
            Phase::HalfOpen { successes, .. } => (
                Totals {
                    calls: *successes,
                    ..Totals::default()
                },
                false,
            ),
            Phase::Open { .. } => (Totals::default(), false),
        };

        CircuitBreakerMetrics {
            state: inner.phase.state(),
            failure_rate: rated.then(|| totals.failure_rate()),
            slow_call_rate: rated.then(|| totals.slow_call_rate()),
            buffered_calls: totals.calls,
            failed_calls: totals.failed,
            slow_calls: totals.slow,
            not_permitted_calls: self.not_permitted.load(Ordering::Relaxed),
            last_transition,
        }
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if let Phase::Open { until } = inner.phase
            && now >= until
        {
            self.transition(inner, CircuitState::HalfOpen, now);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.phase.state();
        inner.phase = match to {
            CircuitState::Closed => Phase::Closed(SlidingWindow::new(
                self.config.sliding_window_type,
                self.config.sliding_window_size,
            )),
            CircuitState::Open => Phase::Open {
                until: now + self.config.wait_duration_in_open_state,
            },
            CircuitState::HalfOpen => Phase::HalfOpen {
                outstanding: 0,
                successes: 0,
            },
        };
        inner.generation += 1;
        inner.last_transition = now;

        match to {
            CircuitState::Open => warn!(breaker = %self.name, ?from, "Circuit breaker opening"),
            CircuitState::Closed => info!(breaker = %self.name, ?from, "Circuit breaker closing"),
            CircuitState::HalfOpen => {
                debug!(breaker = %self.name, ?from, "Circuit breaker transitioning to half-open")
            }
        }
    }

    fn on_result(&self, generation: u64, elapsed: Duration, failed: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }

        let permitted = self.config.permitted_calls_in_half_open_state;
        let next = match &mut inner.phase {
            Phase::Closed(window) => {
                let slow = elapsed >= self.config.slow_call_duration_threshold;
                window.record(now, Outcome { failed, slow });
                let totals = window.totals(now);
                let tripped = totals.calls >= self.config.minimum_calls()
                    && (totals.failure_rate() >= self.config.failure_rate_threshold
                        || totals.slow_call_rate() >= self.config.slow_call_rate_threshold);
                tripped.then_some(CircuitState::Open)
            }
            Phase::HalfOpen {
                outstanding,
                successes,
            } => {
                *outstanding = outstanding.saturating_sub(1);
                if failed {
                    Some(CircuitState::Open)
                } else {
                    *successes += 1;
                    (*successes >= permitted).then_some(CircuitState::Closed)
                }
            }
            Phase::Open { .. } => None,
        };

        if let Some(to) = next {
            self.transition(&mut inner, to, now);
        }
    }

    fn on_release(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        if let Phase::HalfOpen { outstanding, .. } = &mut inner.phase {
            *outstanding = outstanding.saturating_sub(1);
        }
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
///
/// Dropping the permit without recording an outcome frees its half-open slot
/// and leaves the window untouched.
#[derive(Debug)]
#[must_use = "record the call outcome or drop the permit to release it"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    started: Instant,
    settled: bool,
}

impl CallPermit<'_> {
    /// Record a successful call.
    pub fn on_success(mut self) {
        self.settled = true;
        self.breaker
            .on_result(self.generation, self.started.elapsed(), false);
    }

    /// Record a failed call.
    pub fn on_failure(mut self) {
        self.settled = true;
        self.breaker
            .on_result(self.generation, self.started.elapsed(), true);
    }

    /// Record the outcome of a call that ended in `error`.
    ///
    /// Transient failures count as failures and 4xx responses as successes.
    /// Anything else is not recorded.
    pub fn on_error(self, error: &RestClientError) {
        match error.kind() {
            ErrorKind::TransientTransport => self.on_failure(),
            ErrorKind::PermanentTransport if error.status_code().is_some() => self.on_success(),
            _ => self.release(),
        }
    }

    /// Give the permit back without recording an outcome.
    pub fn release(self) {}
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.generation);
        }
    }
}

/// Granularity at which breakers are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    /// One breaker per client (service).
    #[default]
    PerClient,
    /// One breaker per endpoint.
    PerEndpoint,
}

impl BreakerScope {
    /// Registry name of the breaker guarding `endpoint` of `service`.
    pub fn breaker_name(&self, service: &str, endpoint: &str) -> String {
        match self {
            Self::PerClient => service.to_string(),
            Self::PerEndpoint => format!("{service}.{endpoint}"),
        }
    }
}

/// Named circuit breakers shared between clients.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the breaker called `name`, creating it with `config` if absent.
    pub fn get_or_create(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }

        self.breakers
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config.clone())))
            .clone()
    }

    /// Get an existing breaker.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Names of all registered breakers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }
}
