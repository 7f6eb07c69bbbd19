//! Global request rate gate.
//!
//! One gate is shared by every worker of every stage, so the aggregate request
//! rate stays at or below the configured ceiling no matter how many workers
//! are running. Adding workers only adds concurrency.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Fixed-interval ticking source shared by all fetches.
#[derive(Debug, Clone)]
pub struct RateGate {
    ticker: Arc<Mutex<Interval>>,
    period: Duration,
}

impl RateGate {
    /// Gate allowing `requests_per_second` requests per second. Rates below
    /// one request per second are allowed (e.g. `0.5`).
    ///
    /// Must be called from within a tokio runtime.
    pub fn per_second(requests_per_second: f64) -> Self {
        let rate = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            requests_per_second
        } else {
            1.0
        };
        Self::with_period(Duration::from_secs_f64(1.0 / rate))
    }

    /// Gate that opens once per `period`.
    pub fn with_period(period: Duration) -> Self {
        let period = period.max(Duration::from_micros(1));
        let mut ticker = interval(period);
        // Never burst to catch up after an idle stretch.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker: Arc::new(Mutex::new(ticker)),
            period,
        }
    }

    /// Time between consecutive permits.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick. Waiters are served in FIFO order.
    pub async fn acquire(&self) {
        let mut ticker = self.ticker.lock().await;
        ticker.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_permits_are_spaced_by_period() {
        let gate = RateGate::with_period(Duration::from_millis(40));
        let start = Instant::now();
        for _ in 0..6 {
            gate.acquire().await;
        }
        // First tick is immediate, the following five wait one period each.
        assert!(start.elapsed() >= Duration::from_millis(195));
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_one_ceiling() {
        let gate = RateGate::per_second(50.0);
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // 20 permits at 50/s: the last one is granted ~380ms after the first.
        assert!(start.elapsed() >= Duration::from_millis(370));
    }

    #[test]
    fn test_invalid_rate_falls_back_to_one_per_second() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            assert_eq!(RateGate::per_second(0.0).period(), Duration::from_secs(1));
            assert_eq!(
                RateGate::per_second(4.0).period(),
                Duration::from_millis(250)
            );
        });
    }
}
