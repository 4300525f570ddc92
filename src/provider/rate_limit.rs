//! Token-bucket rate limiter: `capacity` tokens refilled continuously over
//! a rolling `window`. Callers suspend on [`TokenBucket::acquire`] until a
//! slot is granted — never more than `capacity` requests in any window of
//! `window` ms.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;

struct State {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_ms: f64,
    state: Mutex<State>,
}

impl TokenBucket {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1) as f64;
        let refill_per_ms = capacity / window.as_millis().max(1) as f64;
        Self {
            capacity,
            refill_per_ms,
            state: Mutex::new(State {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut State) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(state.last_refill).as_millis() as f64;
        if elapsed_ms > 0.0 {
            state.tokens = (state.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
            state.last_refill = now;
        }
    }

    /// Suspends until a token is available, then consumes one.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("rate limiter mutex poisoned");
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_millis((deficit / self.refill_per_ms).ceil() as u64))
                }
            };
            match wait {
                None => return,
                Some(d) => sleep(d.max(Duration::from_millis(1))).await,
            }
        }
    }

    /// Non-blocking check, used by tests and by the health endpoint to
    /// report current headroom without mutating state.
    #[cfg(test)]
    fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn never_exceeds_capacity_in_window() {
        let bucket = TokenBucket::new(3, Duration::from_millis(100));
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(bucket.available() < 1.0);
    }

    #[tokio::test]
    async fn refills_over_time() {
        let bucket = TokenBucket::new(2, Duration::from_millis(20));
        bucket.acquire().await;
        bucket.acquire().await;
        assert!(bucket.available() < 1.0);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(bucket.available() >= 1.0);
    }
}
