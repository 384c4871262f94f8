//! Circuit breaker state machine.
//!
//! Three states — `closed`, `open`, `half-open` — driven by a
//! caller-supplied `ready_to_trip(&Counts) -> bool` predicate rather than a
//! fixed failure threshold, and a generation counter that invalidates
//! completions racing a state transition.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::Mutex;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow through normally.
    Closed,
    /// Requests fail fast without executing the wrapped call.
    Open,
    /// A limited number of probe requests are admitted to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        write!(f, "{s}")
    }
}

/// Running counters for one circuit, cleared on every generation change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Requests admitted since the last clear.
    pub requests: u64,
    /// Successful completions since the last clear.
    pub total_successes: u64,
    /// Failed completions since the last clear.
    pub total_failures: u64,
    /// Successes in an unbroken streak.
    pub consecutive_successes: u64,
    /// Failures in an unbroken streak.
    pub consecutive_failures: u64,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests += 1;
    }

    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

/// Error returned when a call is rejected because the circuit is open.
#[derive(Debug, Clone)]
pub struct CircuitOpenError {
    /// Name of the circuit.
    pub circuit: String,
    /// Time remaining until the circuit probes `half-open`.
    pub retry_after: Duration,
}

impl std::fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "circuit '{}' is open, retry after {:?}",
            self.circuit, self.retry_after
        )
    }
}

impl std::error::Error for CircuitOpenError {}

/// Error returned when a `half-open` circuit has already admitted
/// `max_requests` concurrent probes.
#[derive(Debug, Clone)]
pub struct TooManyRequestsError {
    /// Name of the circuit.
    pub circuit: String,
}

impl std::fmt::Display for TooManyRequestsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "circuit '{}' rejected request: too many requests", self.circuit)
    }
}

impl std::error::Error for TooManyRequestsError {}

/// The outcome of a call made through [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The circuit was open; `f` never ran.
    CircuitOpen(CircuitOpenError),
    /// The circuit was half-open and already at its probe limit; `f` never
    /// ran.
    TooManyRequests(TooManyRequestsError),
    /// `f` ran and returned this error.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen(e) => write!(f, "{e}"),
            CircuitBreakerError::TooManyRequests(e) => write!(f, "{e}"),
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitBreakerError::CircuitOpen(e) => Some(e),
            CircuitBreakerError::TooManyRequests(e) => Some(e),
            CircuitBreakerError::Inner(e) => Some(e),
        }
    }
}

/// Configuration for a [`CircuitBreaker`].
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Concurrent probes admitted while `half-open`. Treated as `1` if
    /// zero.
    pub max_requests: u32,
    /// While `closed`, how often [`Counts`] are cleared even without a
    /// trip. Zero means never (counts only clear on a state change).
    pub interval: Duration,
    /// How long the circuit stays `open` before probing `half-open`.
    pub timeout: Duration,
    /// Consulted on every failure while `closed`; `true` trips the
    /// circuit to `open`.
    pub ready_to_trip: Arc<dyn Fn(&Counts) -> bool + Send + Sync>,
    /// Consulted on every `Err` the wrapped call returns; `true` means the
    /// error should still be recorded as a circuit success (e.g. a client
    /// validation error that says nothing about the dependency's health).
    pub is_successful: Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>,
    /// Notified on every state transition with `(name, from, to)`.
    pub on_state_change: Option<Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>>,
}

impl std::fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_requests: 1,
            interval: Duration::ZERO,
            timeout: Duration::from_secs(60),
            ready_to_trip: Arc::new(|counts| counts.consecutive_failures > 5),
            is_successful: Arc::new(|_err| false),
            on_state_change: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// A config whose `ready_to_trip` fires once `consecutive_failures`
    /// exceeds `threshold`.
    pub fn new(threshold: u64) -> Self {
        Self {
            ready_to_trip: Arc::new(move |counts| counts.consecutive_failures > threshold),
            ..Default::default()
        }
    }

    /// Set the half-open probe limit.
    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Set the closed-state counter reset period.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the open-state duration before probing half-open.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the trip predicate.
    pub fn with_ready_to_trip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Arc::new(f);
        self
    }

    /// Replace the success predicate applied to `Err` outcomes.
    pub fn with_is_successful<F>(mut self, f: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.is_successful = Arc::new(f);
        self
    }

    /// Register a state-change callback.
    pub fn with_on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(f));
        self
    }
}

struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Instant,
    state_changed_at: Instant,
}

/// A single named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Construct a breaker in the `closed` state.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: Self::closed_expiry(&config, now),
                state_changed_at: now,
            }),
            config,
        }
    }

    fn closed_expiry(config: &CircuitBreakerConfig, now: Instant) -> Instant {
        if config.interval.is_zero() {
            now + Duration::from_secs(60 * 60 * 24 * 365)
        } else {
            now + config.interval
        }
    }

    /// This circuit's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute `f` through the circuit: fails fast with a distinguished
    /// error while `open` or admission-limited `half-open`, otherwise runs
    /// `f` and records the outcome against the pre-call generation.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let generation = self.before_call().map_err(|e| match e {
            BeforeCallError::Open(e) => CircuitBreakerError::CircuitOpen(e),
            BeforeCallError::TooMany(e) => CircuitBreakerError::TooManyRequests(e),
        })?;

        match f().await {
            Ok(value) => {
                self.after_call(generation, true);
                Ok(value)
            }
            Err(err) => {
                let successful = (self.config.is_successful)(&err);
                self.after_call(generation, successful);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    fn before_call(&self) -> Result<u64, BeforeCallError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let state = self.current_state(&mut inner, now);

        match state {
            CircuitState::Open => Err(BeforeCallError::Open(CircuitOpenError {
                circuit: self.name.clone(),
                retry_after: inner.expiry.saturating_duration_since(now),
            })),
            CircuitState::HalfOpen => {
                let limit = self.config.max_requests.max(1) as u64;
                if inner.counts.requests >= limit {
                    Err(BeforeCallError::TooMany(TooManyRequestsError {
                        circuit: self.name.clone(),
                    }))
                } else {
                    inner.counts.on_request();
                    Ok(inner.generation)
                }
            }
            CircuitState::Closed => {
                inner.counts.on_request();
                Ok(inner.generation)
            }
        }
    }

    fn after_call(&self, before_generation: u64, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let state = self.current_state(&mut inner, now);
        if inner.generation != before_generation {
            // A state transition happened mid-call; this completion is stale.
            return;
        }
        if success {
            self.on_success(&mut inner, state, now);
        } else {
            self.on_failure(&mut inner, state, now);
        }
    }

    fn on_success(&self, inner: &mut Inner, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => inner.counts.on_success(),
            CircuitState::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.config.max_requests.max(1) as u64 {
                    self.set_state(inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut Inner, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => {
                inner.counts.on_failure();
                if (self.config.ready_to_trip)(&inner.counts) {
                    self.set_state(inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                self.set_state(inner, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Resolve lazy transitions (`open` past its timeout, `closed` past
    /// its interval) before reading or mutating state.
    fn current_state(&self, inner: &mut Inner, now: Instant) -> CircuitState {
        match inner.state {
            CircuitState::Closed if !self.config.interval.is_zero() && now >= inner.expiry => {
                inner.generation += 1;
                inner.counts = Counts::default();
                inner.expiry = now + self.config.interval;
            }
            CircuitState::Open if now >= inner.expiry => {
                self.set_state(inner, CircuitState::HalfOpen, now);
            }
            _ => {}
        }
        inner.state
    }

    fn set_state(&self, inner: &mut Inner, new_state: CircuitState, now: Instant) {
        if inner.state == new_state {
            return;
        }
        let old_state = inner.state;
        inner.state = new_state;
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.state_changed_at = now;
        inner.expiry = match new_state {
            CircuitState::Closed => Self::closed_expiry(&self.config, now),
            CircuitState::Open => now + self.config.timeout,
            CircuitState::HalfOpen => now + Duration::from_secs(60 * 60 * 24 * 365),
        };
        if let Some(callback) = &self.config.on_state_change {
            callback(&self.name, old_state, new_state);
        }
        tracing::info!(
            circuit = %self.name,
            from = %old_state,
            to = %new_state,
            "circuit breaker state changed"
        );
    }

    /// Current state, resolving any lazy `open` → `half-open` transition
    /// first.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.current_state(&mut inner, now)
    }

    /// A snapshot of current state and counts.
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let state = self.current_state(&mut inner, now);
        CircuitBreakerStats {
            state,
            counts: inner.counts,
            time_in_state: now.saturating_duration_since(inner.state_changed_at),
        }
    }

    /// Force the circuit back to `closed`, clearing counts.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.state = CircuitState::Closed;
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.state_changed_at = now;
        inner.expiry = Self::closed_expiry(&self.config, now);
    }
}

enum BeforeCallError {
    Open(CircuitOpenError),
    TooMany(TooManyRequestsError),
}

/// A point-in-time view of a circuit's state and counters.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Counters since the last clear.
    pub counts: Counts,
    /// Time elapsed since the last state transition.
    pub time_in_state: Duration,
}

/// A registry of named circuit breakers sharing a default configuration,
/// so handlers and adapters calling the same downstream dependency by
/// name share one breaker instead of each constructing their own.
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    /// A manager that creates breakers on demand with `default_config`.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Get or lazily create the named breaker using the default config.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.default_config.clone())))
            .clone()
    }

    /// Create (or replace) the named breaker with a specific config.
    pub fn create_with_config(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        self.breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// An existing breaker, if one has been created under this name.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|r| r.clone())
    }

    /// Stats for every breaker the manager knows about.
    pub fn all_stats(&self) -> Vec<(String, CircuitBreakerStats)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }

    /// Reset every breaker to `closed`.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Number of breakers tracked.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker has been created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn io_err(msg: &str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, msg.to_string())
    }

    #[tokio::test]
    async fn opens_after_ready_to_trip_fires() {
        let config = CircuitBreakerConfig::new(2).with_timeout(Duration::from_millis(50));
        let cb = CircuitBreaker::new("db", config);

        for _ in 0..3 {
            let _ = cb.call(|| async { Err::<(), _>(io_err("boom")) }).await;
        }

        assert_eq!(cb.state(), CircuitState::Open);
        let result = cb.call(|| async { Ok::<_, io::Error>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn transitions_through_half_open_to_closed() {
        let config = CircuitBreakerConfig::new(0)
            .with_timeout(Duration::from_millis(20))
            .with_max_requests(2);
        let cb = CircuitBreaker::new("db", config);

        let _ = cb.call(|| async { Err::<(), _>(io_err("boom")) }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.call(|| async { Ok::<_, io::Error>(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.call(|| async { Ok::<_, io::Error>(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let config = CircuitBreakerConfig::new(0).with_timeout(Duration::from_millis(10));
        let cb = CircuitBreaker::new("db", config);

        let _ = cb.call(|| async { Err::<(), _>(io_err("boom")) }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let _ = cb.call(|| async { Err::<(), _>(io_err("boom again")) }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_admission_limit_rejects_extra_probes() {
        let config = CircuitBreakerConfig::new(0)
            .with_timeout(Duration::from_millis(10))
            .with_max_requests(1);
        let cb = Arc::new(CircuitBreaker::new("db", config));

        let _ = cb.call(|| async { Err::<(), _>(io_err("boom")) }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Hold the first admitted slot open across an await point.
        let first = cb.before_call();
        assert!(first.is_ok());
        let second = cb.call(|| async { Ok::<_, io::Error>(()) }).await;
        assert!(matches!(second, Err(CircuitBreakerError::TooManyRequests(_))));
    }

    #[tokio::test]
    async fn stale_generation_does_not_update_counts() {
        let config = CircuitBreakerConfig::new(0).with_timeout(Duration::from_millis(5));
        let cb = CircuitBreaker::new("db", config);

        let generation = cb.before_call().ok().unwrap();
        // Force a state change behind the in-flight call's back.
        cb.reset();
        cb.after_call(generation, false);
        assert_eq!(cb.stats().counts.total_failures, 0);
    }

    #[tokio::test]
    async fn is_successful_predicate_avoids_tripping_on_client_errors() {
        let config = CircuitBreakerConfig::new(1).with_is_successful(|_err| true);
        let cb = CircuitBreaker::new("db", config);

        for _ in 0..5 {
            let _ = cb.call(|| async { Err::<(), _>(io_err("client error")) }).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn on_state_change_callback_fires() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let config = CircuitBreakerConfig::new(0).with_on_state_change(move |_, _, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        let cb = CircuitBreaker::new("db", config);
        let _ = cb.call(|| async { Err::<(), _>(io_err("boom")) }).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manager_reuses_breaker_by_name() {
        let manager = CircuitBreakerManager::default();
        let a = manager.get_or_create("svc");
        let b = manager.get_or_create("svc");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
