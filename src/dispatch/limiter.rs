// Request rate limiter.
// Spaces admissions evenly so at most `rate` requests start per second.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Async limiter shared by all workers of a dispatcher.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// Admit `rate` requests per second; 0 disables limiting.
    pub fn per_second(rate: u32) -> Self {
        let interval = if rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / rate
        };

        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next free slot.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}
