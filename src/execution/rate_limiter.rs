// =============================================================================
// Order Rate Limiter — rolling window cap with adaptive cooldown
// =============================================================================
//
// Process-wide, shared by every leg of every pair:
//
//   - At most 5 orders in any rolling 1-second window.  `acquire` waits for
//     the oldest stamp to leave the window instead of best-effort throttling,
//     so the cap is a hard guarantee.
//   - On broker rate-limit / IOC errors, an adaptive cooldown of
//     min(30, 2 * 2^(n-1)) seconds blocks all callers; n is the count of
//     consecutive errors and resets on any successful order.
//
// Timekeeping uses `tokio::time::Instant` so paused-clock tests are
// deterministic.  The internal lock is never held across an await point.
// =============================================================================

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

const MAX_ORDERS_PER_WINDOW: usize = 5;
const WINDOW: Duration = Duration::from_secs(1);
const BASE_COOLDOWN_SECS: f64 = 2.0;
const MAX_COOLDOWN_SECS: f64 = 30.0;

struct Inner {
    recent_orders: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
    consecutive_errors: u32,
}

/// Snapshot of the limiter state for diagnostics.
#[derive(Debug, Clone)]
pub struct RateLimiterStatus {
    pub orders_last_second: usize,
    pub in_cooldown: bool,
    pub cooldown_remaining_secs: f64,
    pub consecutive_errors: u32,
}

pub struct OrderRateLimiter {
    inner: Mutex<Inner>,
}

impl OrderRateLimiter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                recent_orders: VecDeque::with_capacity(MAX_ORDERS_PER_WINDOW + 1),
                cooldown_until: None,
                consecutive_errors: 0,
            }),
        }
    }

    /// Wait until an order may be placed, then record it.
    ///
    /// Blocks through any active cooldown, then for a free slot in the
    /// rolling window.
    pub async fn acquire(&self, symbol: &str) {
        loop {
            let wait = {
                let mut inner = self.inner.lock();
                let now = Instant::now();

                if let Some(until) = inner.cooldown_until {
                    if now < until {
                        let remaining = until.duration_since(now);
                        warn!(
                            symbol,
                            remaining_secs = remaining.as_secs_f64(),
                            "rate limiter in cooldown, waiting"
                        );
                        Some(remaining)
                    } else {
                        inner.cooldown_until = None;
                        info!(symbol, "rate limiter cooldown ended");
                        continue;
                    }
                } else {
                    while let Some(front) = inner.recent_orders.front() {
                        if now.duration_since(*front) >= WINDOW {
                            inner.recent_orders.pop_front();
                        } else {
                            break;
                        }
                    }

                    if inner.recent_orders.len() < MAX_ORDERS_PER_WINDOW {
                        inner.recent_orders.push_back(now);
                        return;
                    }

                    // Wait for the oldest stamp to age out of the window.
                    let oldest = *inner
                        .recent_orders
                        .front()
                        .expect("window is full, front exists");
                    Some((oldest + WINDOW).duration_since(now))
                }
            };

            if let Some(duration) = wait {
                tokio::time::sleep(duration).await;
            }
        }
    }

    /// Report a rate-limit / IOC error: arms the adaptive cooldown.
    pub fn report_error(&self, error_msg: &str) {
        let mut inner = self.inner.lock();
        inner.consecutive_errors += 1;

        let cooldown_secs = (BASE_COOLDOWN_SECS
            * 2f64.powi(inner.consecutive_errors.saturating_sub(1) as i32))
        .min(MAX_COOLDOWN_SECS);
        inner.cooldown_until = Some(Instant::now() + Duration::from_secs_f64(cooldown_secs));

        warn!(
            consecutive_errors = inner.consecutive_errors,
            cooldown_secs, error = error_msg, "order error, entering cooldown"
        );
    }

    /// Report a successful order: clears the consecutive-error counter.
    pub fn report_success(&self) {
        let mut inner = self.inner.lock();
        if inner.consecutive_errors > 0 {
            info!(
                was = inner.consecutive_errors,
                "order succeeded, resetting error counter"
            );
            inner.consecutive_errors = 0;
        }
    }

    pub fn status(&self) -> RateLimiterStatus {
        let inner = self.inner.lock();
        let now = Instant::now();
        let orders_last_second = inner
            .recent_orders
            .iter()
            .filter(|t| now.duration_since(**t) < WINDOW)
            .count();
        let cooldown_remaining_secs = inner
            .cooldown_until
            .map(|until| until.duration_since(now).as_secs_f64())
            .unwrap_or(0.0);

        RateLimiterStatus {
            orders_last_second,
            in_cooldown: cooldown_remaining_secs > 0.0,
            cooldown_remaining_secs,
            consecutive_errors: inner.consecutive_errors,
        }
    }
}

impl Default for OrderRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OrderRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("OrderRateLimiter")
            .field("orders_last_second", &status.orders_last_second)
            .field("in_cooldown", &status.in_cooldown)
            .field("consecutive_errors", &status.consecutive_errors)
            .finish()
    }
}

// =============================================================================
// Tests (paused clock: sleeps advance virtual time instantly)
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_five_acquires_are_immediate() {
        let limiter = OrderRateLimiter::new();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire("BTCUSDT").await;
        }
        assert_eq!(Instant::now().duration_since(start), Duration::ZERO);
        assert_eq!(limiter.status().orders_last_second, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_five_in_any_window() {
        let limiter = OrderRateLimiter::new();
        let mut stamps: Vec<Instant> = Vec::new();
        for _ in 0..17 {
            limiter.acquire("BTCUSDT").await;
            stamps.push(Instant::now());
        }
        // Every rolling 1-second window holds at most 5 acquisitions.
        for (i, &start) in stamps.iter().enumerate() {
            let in_window = stamps[i..]
                .iter()
                .filter(|t| t.duration_since(start) < WINDOW)
                .count();
            assert!(in_window <= 5, "window starting at stamp {i} holds {in_window}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_acquire_waits_for_the_window() {
        let limiter = OrderRateLimiter::new();
        let start = Instant::now();
        for _ in 0..6 {
            limiter.acquire("BTCUSDT").await;
        }
        let elapsed = Instant::now().duration_since(start);
        assert!(elapsed >= WINDOW, "sixth acquire returned after {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_blocks_acquire_for_base_duration() {
        let limiter = OrderRateLimiter::new();
        limiter.report_error("retCode 10006: too many visits");

        let start = Instant::now();
        limiter.acquire("BTCUSDT").await;
        let elapsed = Instant::now().duration_since(start);
        assert!(
            elapsed >= Duration::from_secs(2),
            "first cooldown must be 2s, waited {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_backs_off_exponentially_and_caps() {
        let limiter = OrderRateLimiter::new();

        limiter.report_error("ioc");
        assert!((limiter.status().cooldown_remaining_secs - 2.0).abs() < 0.01);
        limiter.report_error("ioc");
        assert!((limiter.status().cooldown_remaining_secs - 4.0).abs() < 0.01);
        limiter.report_error("ioc");
        assert!((limiter.status().cooldown_remaining_secs - 8.0).abs() < 0.01);

        // Two more: 16, then capped at 30.
        limiter.report_error("ioc");
        limiter.report_error("ioc");
        assert!((limiter.status().cooldown_remaining_secs - 30.0).abs() < 0.01);
        assert_eq!(limiter.status().consecutive_errors, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_errors() {
        let limiter = OrderRateLimiter::new();
        limiter.report_error("ioc");
        limiter.report_error("ioc");
        limiter.report_success();
        assert_eq!(limiter.status().consecutive_errors, 0);

        // Next error starts the ladder from the base again.
        limiter.report_error("ioc");
        assert!((limiter.status().cooldown_remaining_secs - 2.0).abs() < 0.01);
    }
}
