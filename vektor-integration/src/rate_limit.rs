//! Multi-bucket token-bucket rate limiting for exchange request/weight quotas.
//!
//! A real exchange enforces several independent quotas at once (requests and
//! weight, each over a second/minute/day window). [`RateLimiter`] models this
//! as six [`TokenBucket`]s and only admits a caller once every bucket has
//! capacity, debiting all of them atomically.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};

/// Priority levels for rate limited operations. Higher priority waiters are
/// served first once tokens become available.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// The six quota dimensions an exchange typically enforces.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RateQuota {
    pub requests_per_second: usize,
    pub requests_per_minute: usize,
    pub requests_per_day: usize,
    pub weight_per_second: usize,
    pub weight_per_minute: usize,
    pub weight_per_day: usize,
}

impl Default for RateQuota {
    /// Matches the defaults documented for Binance-compatible spot exchanges.
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            requests_per_minute: 1_200,
            requests_per_day: 200_000,
            weight_per_second: 1_200,
            weight_per_minute: 6_000,
            weight_per_day: 1_000_000,
        }
    }
}

struct Waiter {
    tx: oneshot::Sender<()>,
}

struct TokenBucket {
    capacity: usize,
    tokens: usize,
    interval: Duration,
    last_refill: Instant,
    base_interval: Duration,
    max_interval: Duration,
    high: VecDeque<Waiter>,
    normal: VecDeque<Waiter>,
    low: VecDeque<Waiter>,
}

impl TokenBucket {
    fn new(capacity: usize, period: Duration) -> Self {
        let interval = period / capacity.max(1) as u32;
        Self {
            capacity,
            tokens: capacity,
            interval,
            last_refill: Instant::now(),
            base_interval: interval,
            max_interval: interval * 16,
            high: VecDeque::new(),
            normal: VecDeque::new(),
            low: VecDeque::new(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        if elapsed >= self.interval {
            let periods = elapsed.as_millis() / self.interval.as_millis().max(1);
            let add_tokens = (periods as usize + 1) * self.capacity;
            self.last_refill = now;
            self.tokens = usize::min(self.tokens + add_tokens, self.capacity);
            self.drain_waiters();
        }
    }

    fn drain_waiters(&mut self) {
        while self.tokens > 0 {
            let Some(waiter) = self
                .high
                .pop_front()
                .or_else(|| self.normal.pop_front())
                .or_else(|| self.low.pop_front())
            else {
                break;
            };
            self.tokens -= 1;
            let _ = waiter.tx.send(());
        }
    }

    /// Attempt to take `count` tokens without waiting. Does not enqueue a waiter on failure.
    fn try_take(&mut self, count: usize) -> bool {
        self.refill();
        if self.tokens >= count {
            self.tokens -= count;
            true
        } else {
            false
        }
    }

    fn enqueue(&mut self, priority: Priority) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter { tx };
        match priority {
            Priority::High => self.high.push_back(waiter),
            Priority::Normal => self.normal.push_back(waiter),
            Priority::Low => self.low.push_back(waiter),
        }
        rx
    }

    fn report_violation(&mut self) {
        let next = self.interval * 2;
        self.interval = std::cmp::min(next, self.max_interval);
    }

    fn reset_backoff(&mut self) {
        self.interval = self.base_interval;
    }
}

struct Inner {
    requests_second: TokenBucket,
    requests_minute: TokenBucket,
    requests_day: TokenBucket,
    weight_second: TokenBucket,
    weight_minute: TokenBucket,
    weight_day: TokenBucket,
}

impl Inner {
    fn from_quota(quota: RateQuota) -> Self {
        Self {
            requests_second: TokenBucket::new(quota.requests_per_second, Duration::from_secs(1)),
            requests_minute: TokenBucket::new(quota.requests_per_minute, Duration::from_secs(60)),
            requests_day: TokenBucket::new(quota.requests_per_day, Duration::from_secs(86_400)),
            weight_second: TokenBucket::new(quota.weight_per_second, Duration::from_secs(1)),
            weight_minute: TokenBucket::new(quota.weight_per_minute, Duration::from_secs(60)),
            weight_day: TokenBucket::new(quota.weight_per_day, Duration::from_secs(86_400)),
        }
    }

    fn buckets_mut(&mut self) -> [&mut TokenBucket; 6] {
        [
            &mut self.requests_second,
            &mut self.requests_minute,
            &mut self.requests_day,
            &mut self.weight_second,
            &mut self.weight_minute,
            &mut self.weight_day,
        ]
    }

    /// Tries to debit 1 request and `weight` weight from every bucket atomically:
    /// either all six admit, or none are debited.
    fn try_acquire_all(&mut self, weight: usize) -> bool {
        for bucket in self.buckets_mut() {
            bucket.refill();
        }
        let request_ok = self.requests_second.tokens >= 1
            && self.requests_minute.tokens >= 1
            && self.requests_day.tokens >= 1;
        let weight_ok = self.weight_second.tokens >= weight
            && self.weight_minute.tokens >= weight
            && self.weight_day.tokens >= weight;
        if !(request_ok && weight_ok) {
            return false;
        }
        self.requests_second.tokens -= 1;
        self.requests_minute.tokens -= 1;
        self.requests_day.tokens -= 1;
        self.weight_second.tokens -= weight;
        self.weight_minute.tokens -= weight;
        self.weight_day.tokens -= weight;
        true
    }
}

/// Token-bucket rate limiter enforcing six independent quotas with priority
/// queuing and adaptive backoff on violation reports.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(quota: RateQuota) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::from_quota(quota))),
        }
    }

    /// Acquire one request and `weight` weight, waiting (honoring `priority`) until
    /// every bucket can admit. Debits happen atomically once admission succeeds.
    pub async fn acquire(&self, weight: usize, priority: Priority) {
        loop {
            let mut waiters = Vec::new();
            {
                let mut inner = self.inner.lock().await;
                if inner.try_acquire_all(weight) {
                    return;
                }
                // Not every bucket had room: park on whichever buckets were short,
                // then retry once any of them signals availability.
                for bucket in inner.buckets_mut() {
                    if bucket.tokens == 0 {
                        waiters.push(bucket.enqueue(priority));
                    }
                }
            }
            if waiters.is_empty() {
                // Contention from a concurrent acquirer consumed the margin; retry immediately.
                tokio::task::yield_now().await;
                continue;
            }
            let _ = futures::future::select_all(waiters).await;
        }
    }

    /// Non-blocking variant: returns `true` and debits iff every bucket could admit.
    pub async fn try_acquire(&self, weight: usize) -> bool {
        self.inner.lock().await.try_acquire_all(weight)
    }

    /// Replace all six buckets with a freshly observed exchange quota.
    pub async fn update_quota(&self, quota: RateQuota) {
        let mut inner = self.inner.lock().await;
        *inner = Inner::from_quota(quota);
    }

    /// Double the refill interval on every bucket (capped), used after a 429/418 response.
    pub async fn report_violation(&self) {
        let mut inner = self.inner.lock().await;
        for bucket in inner.buckets_mut() {
            bucket.report_violation();
        }
    }

    /// Restore every bucket's refill interval to its configured baseline.
    pub async fn reset_backoff(&self) {
        let mut inner = self.inner.lock().await;
        for bucket in inner.buckets_mut() {
            bucket.reset_backoff();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration, Instant};

    fn tiny_quota(n: usize) -> RateQuota {
        RateQuota {
            requests_per_second: n,
            requests_per_minute: n * 1000,
            requests_per_day: n * 100000,
            weight_per_second: n,
            weight_per_minute: n * 1000,
            weight_per_day: n * 100000,
        }
    }

    #[tokio::test]
    async fn burst_respects_per_second_bucket() {
        let rl = RateLimiter::new(tiny_quota(2));
        rl.acquire(1, Priority::Normal).await;
        rl.acquire(1, Priority::Normal).await;
        let start = Instant::now();
        rl.acquire(1, Priority::Normal).await;
        assert!(start.elapsed() >= Duration::from_millis(1));
    }

    #[tokio::test]
    async fn try_acquire_does_not_block() {
        let rl = RateLimiter::new(tiny_quota(1));
        assert!(rl.try_acquire(1).await);
        assert!(!rl.try_acquire(1).await);
    }

    #[tokio::test]
    async fn adaptive_backoff_widens_refill_interval() {
        let rl = RateLimiter::new(tiny_quota(1));
        rl.acquire(1, Priority::Normal).await;
        rl.report_violation().await;
        let start = Instant::now();
        rl.acquire(1, Priority::Normal).await;
        assert!(start.elapsed() >= Duration::from_millis(1));
        rl.reset_backoff().await;
    }

    #[tokio::test]
    async fn weight_budget_is_enforced_independently_of_request_count() {
        let quota = RateQuota {
            requests_per_second: 100,
            requests_per_minute: 1000,
            requests_per_day: 10000,
            weight_per_second: 5,
            weight_per_minute: 500,
            weight_per_day: 5000,
        };
        let rl = RateLimiter::new(quota);
        assert!(rl.try_acquire(5).await);
        assert!(!rl.try_acquire(1).await);
        sleep(Duration::from_millis(1100)).await;
        assert!(rl.try_acquire(1).await);
    }
}
