//! Venue-aware weighted multi-endpoint rate limiter.
//!
//! A per-endpoint token bucket (discrete whole-interval refill) gates
//! admission; a priority queue orders contending requests by ascending
//! priority, ties broken by insertion order. Requests that come back
//! rate-limited (HTTP 429 or transport equivalent) are retried with
//! truncated exponential backoff and jitter rather than surfaced to the
//! caller, using `parking_lot::Mutex` plus `tokio::sync::Notify` to gate
//! and wake waiters per endpoint.

use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::PipelineError;

const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(60);

/// Outcome an `execute` callback must report so the limiter can distinguish
/// "rate limited, retry under backoff" from any other failure.
pub enum CallOutcome<T> {
    Success(T),
    RateLimited,
    Other(anyhow::Error),
}

struct TokenState {
    tokens: f64,
    last_refill: Instant,
}

/// FIFO-within-priority ticket. `Ord` is defined so a max-heap pops the
/// *smallest* `priority` first (ties broken by the *smallest* `seq`, i.e.
/// earliest insertion), giving an ascending-priority queue order.
#[derive(Clone, Copy, Eq, PartialEq)]
struct Ticket {
    priority: i32,
    seq: u64,
}

impl Ord for Ticket {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Ticket {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct EndpointState {
    capacity: f64,
    refill_interval: Duration,
    tokens: Mutex<TokenState>,
    queue: Mutex<BinaryHeap<Ticket>>,
    notify: Notify,
    next_seq: AtomicU64,
    /// Optional server-feedback high-water mark, as a fraction of capacity
    /// per minute. When set, `report_usage` inserts a cooperative delay once
    /// crossed.
    high_water_mark: Option<f64>,
}

fn refill(state: &mut TokenState, capacity: f64, interval: Duration, now: Instant) {
    let elapsed = now.saturating_duration_since(state.last_refill);
    let intervals = (elapsed.as_secs_f64() / interval.as_secs_f64()).floor();
    if intervals >= 1.0 {
        state.tokens = (state.tokens + capacity * intervals).min(capacity);
        state.last_refill += interval.mul_f64(intervals);
    }
}

/// A weighted, multi-endpoint, priority-queued token-bucket rate limiter.
pub struct RateLimiter {
    endpoints: Mutex<HashMap<String, Arc<EndpointState>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Register an endpoint's bucket. `capacity` and `refill_interval`
    /// should already have the deployment's `RATE_LIMIT_BUFFER` applied by
    /// the caller.
    pub fn register_endpoint(&self, name: &str, capacity: f64, refill_interval: Duration) {
        self.register_endpoint_with_feedback(name, capacity, refill_interval, None)
    }

    pub fn register_endpoint_with_feedback(
        &self,
        name: &str,
        capacity: f64,
        refill_interval: Duration,
        high_water_mark: Option<f64>,
    ) {
        let state = Arc::new(EndpointState {
            capacity,
            refill_interval,
            tokens: Mutex::new(TokenState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
            high_water_mark,
        });
        self.endpoints.lock().insert(name.to_string(), state);
    }

    fn endpoint(&self, name: &str) -> Result<Arc<EndpointState>, PipelineError> {
        self.endpoints
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::UnregisteredEndpoint(name.to_string()))
    }

    /// Admit one request of `weight` at `priority` (smaller runs sooner) onto
    /// `endpoint`'s bucket, blocking until tokens are available and this
    /// ticket is at the head of the queue.
    async fn admit(&self, endpoint: &str, weight: u32, priority: i32) -> Result<(), PipelineError> {
        let ep = self.endpoint(endpoint)?;
        let seq = ep.next_seq.fetch_add(1, Ordering::Relaxed);
        ep.queue.lock().push(Ticket { priority, seq });
        ep.notify.notify_waiters();

        loop {
            let now = Instant::now();
            let outcome = {
                let mut tokens = ep.tokens.lock();
                refill(&mut tokens, ep.capacity, ep.refill_interval, now);
                let mut queue = ep.queue.lock();
                match queue.peek() {
                    Some(head) if head.priority == priority && head.seq == seq => {
                        if tokens.tokens >= weight as f64 {
                            tokens.tokens -= weight as f64;
                            queue.pop();
                            None
                        } else {
                            let deficit = weight as f64 - tokens.tokens;
                            let intervals_needed = (deficit / ep.capacity).max(0.0).ceil().max(1.0);
                            let target = tokens.last_refill
                                + ep.refill_interval.mul_f64(intervals_needed);
                            Some(target.saturating_duration_since(now).max(Duration::from_millis(1)))
                        }
                    }
                    _ => Some(Duration::from_millis(20)),
                }
            };

            match outcome {
                None => {
                    ep.notify.notify_waiters();
                    return Ok(());
                }
                Some(wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = ep.notify.notified() => {}
                    }
                }
            }
        }
    }

    /// Apply server-feedback throttling after a successful call: if
    /// `used_weight` crosses this endpoint's configured high-water mark
    /// (as a fraction of its 1-minute
    /// capacity), sleep an additional cooperative delay proportional to the
    /// overage, bounded at `RETRY_CAP`.
    pub async fn report_usage(&self, endpoint: &str, used_weight: f64) {
        let Ok(ep) = self.endpoint(endpoint) else {
            return;
        };
        let Some(hwm) = ep.high_water_mark else {
            return;
        };
        let threshold = ep.capacity * hwm;
        if used_weight <= threshold {
            return;
        }
        let overage_ratio = ((used_weight - threshold) / ep.capacity).max(0.0);
        let delay = RETRY_CAP.mul_f64(overage_ratio.min(1.0));
        if delay > Duration::ZERO {
            debug!(endpoint, used_weight, overage_ratio, ?delay, "rate_limit_feedback_delay");
            tokio::time::sleep(delay).await;
        }
    }

    /// Run `op` under this endpoint's admission control, retrying under
    /// truncated-exponential backoff when `op` reports `RateLimited`. Any
    /// other error is surfaced immediately.
    pub async fn execute<F, Fut, T>(
        &self,
        endpoint: &str,
        identifier: &str,
        weight: u32,
        priority: i32,
        mut op: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        if identifier.is_empty() {
            return Err(PipelineError::MissingIdentifier.into());
        }
        // Validate registration eagerly so callers get a clear error before
        // ever touching the network.
        self.endpoint(endpoint)?;

        let mut attempt: u32 = 0;
        loop {
            self.admit(endpoint, weight, priority).await?;
            match op().await {
                CallOutcome::Success(v) => return Ok(v),
                CallOutcome::RateLimited => {
                    attempt += 1;
                    let backoff = rate_limit_backoff(attempt);
                    warn!(endpoint, identifier, attempt, ?backoff, "rate_limited_retry");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                CallOutcome::Other(e) => return Err(e),
            }
        }
    }
}

/// `min(60s, base*2^(attempt-1) + jitter)`, `base = 1s`, `jitter ∈ [0, 1s)`.
fn rate_limit_backoff(attempt: u32) -> Duration {
    let base_ms = RETRY_BASE.as_millis() as f64 * 2f64.powi(attempt as i32 - 1);
    let jitter_ms = rand::thread_rng().gen_range(0.0..1000.0);
    let total_ms = (base_ms + jitter_ms).min(RETRY_CAP.as_millis() as f64);
    Duration::from_millis(total_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn executes_in_priority_order_within_capacity() {
        let limiter = RateLimiter::new();
        limiter.register_endpoint("e", 1.0, Duration::from_millis(1000));

        let order = Arc::new(Mutex::new(Vec::new()));
        let order_a = order.clone();
        let order_b = order.clone();

        let a = async {
            limiter
                .execute("e", "caller", 1, 0, || async {
                    order_a.lock().push("A");
                    CallOutcome::Success("A")
                })
                .await
        };
        let b = async {
            limiter
                .execute("e", "caller", 1, 0, || async {
                    order_b.lock().push("B");
                    CallOutcome::Success("B")
                })
                .await
        };

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap(), "A");
        assert_eq!(rb.unwrap(), "B");
        assert_eq!(*order.lock(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn retries_on_rate_limited_and_succeeds() {
        let limiter = RateLimiter::new();
        limiter.register_endpoint("e", 1.0, Duration::from_millis(1000));

        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result = limiter
            .execute("e", "caller", 1, 0, move || {
                let calls_ref = calls_ref.clone();
                async move {
                    let n = calls_ref.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        CallOutcome::RateLimited
                    } else {
                        CallOutcome::Success("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_identifier_is_rejected() {
        let limiter = RateLimiter::new();
        limiter.register_endpoint("e", 1.0, Duration::from_millis(1000));
        let result = limiter
            .execute("e", "", 1, 0, || async { CallOutcome::Success(()) })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unregistered_endpoint_is_rejected() {
        let limiter = RateLimiter::new();
        let result = limiter
            .execute("nope", "caller", 1, 0, || async { CallOutcome::Success(()) })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn backoff_is_one_second_on_first_attempt_with_zero_jitter() {
        // rate_limit_backoff draws jitter from rand; bound-check instead of
        // asserting an exact value.
        let d = rate_limit_backoff(1);
        assert!(d.as_millis() >= 1000 && d.as_millis() < 2000);
    }

    #[test]
    fn backoff_is_capped_at_sixty_seconds() {
        let d = rate_limit_backoff(10);
        assert!(d <= RETRY_CAP);
    }
}
