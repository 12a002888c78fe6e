//! Deadline waiting shared by the master fire path and the slave engine.

use std::time::Duration;

use twincam_types::monotonic_us;

/// Remaining budget below which cooperative sleeping stops and the wait
/// busy-spins. Scheduler tick jitter is about a millisecond, which would
/// otherwise eat the whole negotiated budget.
const SPIN_THRESHOLD_US: i64 = 2_000;

/// Sleep-then-spin until `monotonic_us()` reaches `deadline_us`.
///
/// Coarse waiting uses 1 ms cooperative sleeps; the final stretch
/// busy-waits on the monotonic clock.
pub async fn wait_until_us(deadline_us: i64) {
    loop {
        let remaining = deadline_us - monotonic_us();
        if remaining <= 0 {
            return;
        }
        if remaining > SPIN_THRESHOLD_US {
            tokio::time::sleep(Duration::from_millis(1)).await;
        } else {
            while monotonic_us() < deadline_us {
                std::hint::spin_loop();
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reaches_deadline_closely() {
        let deadline = monotonic_us() + 20_000;
        wait_until_us(deadline).await;
        let now = monotonic_us();
        assert!(now >= deadline);
        // The overshoot should be well under the coarse tick.
        assert!(now - deadline < 5_000, "overshoot {}us", now - deadline);
    }

    #[tokio::test]
    async fn past_deadline_returns_immediately() {
        let before = monotonic_us();
        wait_until_us(before - 1000).await;
        assert!(monotonic_us() - before < 5_000);
    }
}
