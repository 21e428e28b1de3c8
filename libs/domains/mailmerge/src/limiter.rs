//! Batch-wide send rate limiting.
//!
//! One [`DeliveryLimiter`] is shared by every delivery task of a batch. It
//! wraps a `governor` GCRA limiter (one permit per `interval`, up to `burst`
//! permits at once) and queues waiters behind a fair `tokio` mutex, so
//! permits are granted in arrival order and no waiter starves.

use crate::error::{MailMergeError, MailMergeResult};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::trace;

/// Rate limit settings for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Time for one permit to replenish.
    pub interval: Duration,
    /// Permits available at once.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            burst: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn new(interval: Duration, burst: u32) -> Self {
        Self { interval, burst }
    }

    /// Minimum time `count` acquisitions can take under this limit.
    pub fn min_duration_for(&self, count: usize) -> Duration {
        let gated = count.saturating_sub(self.burst as usize) as u32;
        self.interval * gated
    }
}

/// Shared admission gate for delivery tasks.
pub struct DeliveryLimiter {
    limiter: DefaultDirectRateLimiter,
    queue: Mutex<()>,
    config: RateLimitConfig,
}

impl DeliveryLimiter {
    /// Create a limiter. A zero interval or zero burst is rejected.
    pub fn new(config: RateLimitConfig) -> MailMergeResult<Self> {
        let burst = NonZeroU32::new(config.burst).ok_or_else(|| {
            MailMergeError::Configuration("rate limit burst must be at least 1".to_string())
        })?;
        let quota = Quota::with_period(config.interval)
            .ok_or_else(|| {
                MailMergeError::Configuration("rate limit interval must be non-zero".to_string())
            })?
            .allow_burst(burst);

        Ok(Self {
            limiter: RateLimiter::direct(quota),
            queue: Mutex::new(()),
            config,
        })
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Wait for one send permit.
    ///
    /// Returns `Cancelled` as soon as `shutdown` reads `true`, including when
    /// it already does on entry. A cancelled caller holds no permit.
    pub async fn acquire(&self, shutdown: &mut watch::Receiver<bool>) -> MailMergeResult<()> {
        if *shutdown.borrow_and_update() {
            return Err(MailMergeError::Cancelled);
        }

        let permit = async {
            let _turn = self.queue.lock().await;
            self.limiter.until_ready().await;
        };

        tokio::select! {
            _ = permit => {
                trace!("Send permit granted");
                Ok(())
            }
            _ = wait_for_shutdown(shutdown) => Err(MailMergeError::Cancelled),
        }
    }
}

/// Resolve once the shutdown flag is set. Never resolves if the sender is
/// dropped without signalling.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_zero_burst_rejected() {
        let result = DeliveryLimiter::new(RateLimitConfig::new(Duration::from_millis(10), 0));
        assert!(matches!(result, Err(MailMergeError::Configuration(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = DeliveryLimiter::new(RateLimitConfig::new(Duration::ZERO, 1));
        assert!(matches!(result, Err(MailMergeError::Configuration(_))));
    }

    #[test]
    fn test_min_duration_for() {
        let config = RateLimitConfig::new(Duration::from_millis(100), 5);
        assert_eq!(config.min_duration_for(3), Duration::ZERO);
        assert_eq!(config.min_duration_for(5), Duration::ZERO);
        assert_eq!(config.min_duration_for(8), Duration::from_millis(300));
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.burst, 5);
    }

    #[tokio::test]
    async fn test_burst_is_granted_immediately() {
        let limiter = DeliveryLimiter::new(RateLimitConfig::new(Duration::from_secs(10), 3)).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(&mut rx).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_rate_is_enforced_beyond_burst() {
        let config = RateLimitConfig::new(Duration::from_millis(50), 2);
        let limiter = DeliveryLimiter::new(config).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        let start = Instant::now();
        for _ in 0..6 {
            limiter.acquire(&mut rx).await.unwrap();
        }

        // 4 gated permits at 50ms each; allow a little clock slack.
        let elapsed = start.elapsed();
        assert!(
            elapsed >= config.min_duration_for(6) - Duration::from_millis(20),
            "elapsed {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_waiters_are_admitted_in_arrival_order() {
        let limiter = std::sync::Arc::new(
            DeliveryLimiter::new(RateLimitConfig::new(Duration::from_millis(50), 1)).unwrap(),
        );
        let (_tx, mut rx) = watch::channel(false);
        limiter.acquire(&mut rx).await.unwrap();

        let granted = std::sync::Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = limiter.clone();
            let granted = granted.clone();
            let mut rx = rx.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(&mut rx).await.unwrap();
                granted.lock().await.push(i);
            }));
            // Let waiter `i` queue up before the next one arrives.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*granted.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let limiter = DeliveryLimiter::new(RateLimitConfig::default()).unwrap();
        let (_tx, mut rx) = watch::channel(true);

        let err = limiter.acquire(&mut rx).await.unwrap_err();
        assert!(matches!(err, MailMergeError::Cancelled));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_waiting_acquire() {
        let limiter = DeliveryLimiter::new(RateLimitConfig::new(Duration::from_secs(30), 1)).unwrap();
        let (tx, mut rx) = watch::channel(false);

        limiter.acquire(&mut rx).await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), limiter.acquire(&mut rx))
            .await
            .expect("acquire should return promptly after shutdown");
        assert!(matches!(result, Err(MailMergeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let limiter = DeliveryLimiter::new(RateLimitConfig::new(Duration::from_millis(20), 1)).unwrap();
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        limiter.acquire(&mut rx).await.unwrap();
        limiter.acquire(&mut rx).await.unwrap();
    }
}
