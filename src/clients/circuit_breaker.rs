use std::{
    collections::VecDeque,
    future::Future,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitSnapshot, CircuitState},
};

struct Bucket {
    started: Instant,
    successes: u32,
    failures: u32,
}

/// Outcome counts over the last `window`, kept in fixed-width buckets.
struct RollingWindow {
    window: Duration,
    bucket_width: Duration,
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    fn new(window: Duration, buckets: u32) -> Self {
        let bucket_width = window / buckets.max(1);

        Self {
            window,
            bucket_width: bucket_width.max(Duration::from_millis(1)),
            buckets: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.buckets.front() {
            if now.duration_since(oldest.started) >= self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant, failed: bool) {
        self.prune(now);

        let needs_bucket = self
            .buckets
            .back()
            .is_none_or(|bucket| now.duration_since(bucket.started) >= self.bucket_width);

        if needs_bucket {
            self.buckets.push_back(Bucket {
                started: now,
                successes: 0,
                failures: 0,
            });
        }

        if let Some(bucket) = self.buckets.back_mut() {
            if failed {
                bucket.failures += 1;
            } else {
                bucket.successes += 1;
            }
        }
    }

    fn totals(&mut self, now: Instant) -> (u32, u32) {
        self.prune(now);

        self.buckets.iter().fold((0, 0), |(successes, failures), bucket| {
            (successes + bucket.successes, failures + bucket.failures)
        })
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }
}

struct BreakerInner {
    state: CircuitState,
    window: RollingWindow,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Process-local breaker guarding calls to one peer service.
///
/// `Closed` lets calls through and trips to `Open` once the error percentage
/// over the rolling window reaches the threshold. `Open` rejects calls without
/// running them until `reset_timeout` has passed, then admits exactly one probe
/// (`HalfOpen`). The probe's outcome closes the breaker or reopens it.
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Releases a half-open probe slot if the guarded call is dropped before it finishes.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(service_name: &str, config: CircuitBreakerConfig) -> Self {
        info!(
            service = %service_name,
            error_threshold_percentage = config.error_threshold_percentage,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        let window = RollingWindow::new(config.rolling_window, config.rolling_buckets);

        Self {
            service_name: service_name.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut inner = self.inner.lock();
        let (successes, failures) = inner.window.totals(Instant::now());

        CircuitSnapshot {
            service: self.service_name.clone(),
            state: inner.state,
            successes,
            failures,
            error_percentage: error_percentage(successes, failures),
        }
    }

    /// Forces the breaker closed and clears its counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.window.reset();
        inner.opened_at = None;
        inner.probe_in_flight = false;

        info!(service = %self.service_name, "Circuit breaker manually reset");
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let is_probe = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: is_probe,
        };

        let outcome = match tokio::time::timeout(self.config.call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout {
                service: self.service_name.clone(),
                timeout_ms: self.config.call_timeout.as_millis() as u64,
            }),
        };

        guard.armed = false;

        match &outcome {
            Err(e) if e.counts_as_failure() => self.record_failure(is_probe),
            _ => self.record_success(is_probe),
        }

        outcome
    }

    /// Returns whether the admitted call is the half-open probe.
    fn admit(&self) -> Result<bool, ServiceError> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_none_or(|opened_at| opened_at.elapsed() >= self.config.reset_timeout);

                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(service = %self.service_name, "Circuit breaker half-open, allowing probe request");
                    Ok(true)
                } else {
                    debug!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    debug!(service = %self.service_name, "Probe already in flight, rejecting request");
                    Err(self.open_error())
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn record_success(&self, is_probe: bool) {
        let mut inner = self.inner.lock();

        if is_probe {
            inner.state = CircuitState::Closed;
            inner.window.reset();
            inner.opened_at = None;
            inner.probe_in_flight = false;
            info!(service = %self.service_name, "Circuit breaker closed after successful probe");
            return;
        }

        if inner.state == CircuitState::Closed {
            inner.window.record(Instant::now(), false);
        }
    }

    fn record_failure(&self, is_probe: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if is_probe {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.probe_in_flight = false;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed probe");
            return;
        }

        if inner.state != CircuitState::Closed {
            return;
        }

        inner.window.record(now, true);
        let (successes, failures) = inner.window.totals(now);
        let total = successes + failures;
        let percentage = error_percentage(successes, failures);

        debug!(
            service = %self.service_name,
            failures,
            total,
            error_percentage = percentage,
            "Circuit breaker failure recorded"
        );

        if total >= self.config.volume_threshold
            && percentage >= self.config.error_threshold_percentage
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            warn!(
                service = %self.service_name,
                failures,
                total,
                error_percentage = percentage,
                "Circuit breaker opened"
            );
        }
    }

    fn open_error(&self) -> ServiceError {
        ServiceError::CircuitOpen {
            service: self.service_name.clone(),
        }
    }
}

fn error_percentage(successes: u32, failures: u32) -> u32 {
    let total = successes + failures;
    if total == 0 {
        return 0;
    }
    failures * 100 / total
}
