//! Request throttle shared by all prediction workers.
//!
//! Enforces a minimum spacing of `60_000 / rate_limit_rpm` ms between call
//! starts across the whole pool. `rate_limit_rpm = 0` disables it.

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};

pub struct Throttle {
    spacing: Option<Duration>,
    next_slot: Mutex<Instant>,
}

impl Throttle {
    pub fn per_minute(rate_limit_rpm: u32) -> Self {
        let spacing = (rate_limit_rpm > 0)
            .then(|| Duration::from_millis(60_000 / u64::from(rate_limit_rpm)));
        Self {
            spacing,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn spacing(&self) -> Option<Duration> {
        self.spacing
    }

    /// Wait for this caller's slot. Slots are handed out in arrival order.
    pub async fn acquire(&self) {
        let Some(spacing) = self.spacing else {
            return;
        };

        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + spacing;
            slot
        };

        sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rpm_disables() {
        assert!(Throttle::per_minute(0).spacing().is_none());
        assert_eq!(
            Throttle::per_minute(120).spacing(),
            Some(Duration::from_millis(500))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced() {
        let throttle = Throttle::per_minute(600); // 100ms
        let start = Instant::now();

        throttle.acquire().await;
        throttle.acquire().await;
        throttle.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_disabled_throttle_does_not_wait() {
        let throttle = Throttle::per_minute(0);
        let start = Instant::now();
        for _ in 0..100 {
            throttle.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
