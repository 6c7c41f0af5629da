//! Token-bucket rate limiter (C3), ported from the monotonic-clock refill in
//! the pre-port implementation. The critical invariant is that sleeps happen
//! outside the mutex: the lock only guards the refill/decrement/threshold
//! check, never the wait itself, so other tasks can still observe/update
//! quota while one task is parked waiting for a token.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use crate::error::{IngestError, Result};

struct BucketState {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
    daily_remaining: Option<i64>,
}

pub struct RateLimiter {
    state: Mutex<BucketState>,
    emergency_stop_threshold: Option<i64>,
}

impl RateLimiter {
    pub fn new(max_tokens: u32, refill_rate: f64, emergency_stop_threshold: Option<i64>) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: max_tokens as f64,
                max_tokens: max_tokens as f64,
                refill_rate,
                last_refill: Instant::now(),
                daily_remaining: None,
            }),
            emergency_stop_threshold,
        }
    }

    /// Starts with fewer tokens than the cap, to avoid a burst at process start.
    pub fn with_initial_tokens(max_tokens: u32, refill_rate: f64, initial_tokens: f64, emergency_stop_threshold: Option<i64>) -> Self {
        let limiter = Self::new(max_tokens, refill_rate, emergency_stop_threshold);
        limiter.state.lock().unwrap().tokens = initial_tokens.min(max_tokens as f64);
        limiter
    }

    fn refill_locked(state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * state.refill_rate).min(state.max_tokens);
        state.last_refill = now;
    }

    fn check_emergency_locked(&self, state: &BucketState) -> Result<()> {
        if let (Some(threshold), Some(remaining)) = (self.emergency_stop_threshold, state.daily_remaining) {
            if remaining < threshold {
                return Err(IngestError::EmergencyStop { remaining, threshold });
            }
        }
        Ok(())
    }

    /// Blocks (via short async sleeps outside the lock) until a token is
    /// available, then decrements by one. Re-checks the emergency threshold
    /// on every refill pass.
    pub async fn acquire_token(&self) -> Result<()> {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                Self::refill_locked(&mut state);
                self.check_emergency_locked(&state)?;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    let secs = if state.refill_rate > 0.0 { deficit / state.refill_rate } else { 1.0 };
                    Some(Duration::from_secs_f64(secs.clamp(0.01, 5.0)))
                }
            };
            match wait {
                None => return Ok(()),
                Some(d) => sleep(d).await,
            }
        }
    }

    /// Clamps the local bucket to the observed minute-remaining, records the
    /// observed daily-remaining, and re-checks the emergency threshold.
    pub fn update_from_headers(&self, headers: &HashMap<String, String>) -> Result<()> {
        let minute_remaining = headers
            .get("X-RateLimit-Remaining")
            .or_else(|| headers.get("x-ratelimit-remaining"))
            .and_then(|v| v.parse::<f64>().ok());
        let daily_remaining = headers
            .get("x-ratelimit-requests-remaining")
            .and_then(|v| v.parse::<i64>().ok());

        let mut state = self.state.lock().unwrap();
        Self::refill_locked(&mut state);
        if let Some(minute_remaining) = minute_remaining {
            state.tokens = state.tokens.min(minute_remaining);
        }
        if let Some(remaining) = daily_remaining {
            // Direct assignment: the daily quota legitimately resets (midnight
            // UTC / rolling window), so a later observation is allowed to be
            // higher than an earlier one.
            state.daily_remaining = Some(remaining);
        }
        self.check_emergency_locked(&state)
    }

    pub fn observed_daily_remaining(&self) -> Option<i64> {
        self.state.lock().unwrap().daily_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_token_does_not_block_while_tokens_available() {
        let limiter = RateLimiter::new(5, 1.0, None);
        for _ in 0..5 {
            limiter.acquire_token().await.unwrap();
        }
    }

    #[test]
    fn update_from_headers_clamps_to_minute_remaining() {
        let limiter = RateLimiter::new(300, 5.0, None);
        let mut headers = HashMap::new();
        headers.insert("X-RateLimit-Remaining".to_string(), "2".to_string());
        limiter.update_from_headers(&headers).unwrap();
        assert!(limiter.state.lock().unwrap().tokens <= 2.0);
    }

    #[test]
    fn update_from_headers_raises_emergency_stop_below_threshold() {
        let limiter = RateLimiter::new(300, 5.0, Some(50));
        let mut headers = HashMap::new();
        headers.insert("x-ratelimit-requests-remaining".to_string(), "10".to_string());
        let err = limiter.update_from_headers(&headers).unwrap_err();
        assert!(matches!(err, IngestError::EmergencyStop { remaining: 10, threshold: 50 }));
    }

    #[test]
    fn daily_remaining_observation_tracks_latest_value() {
        let limiter = RateLimiter::new(300, 5.0, None);
        let mut h1 = HashMap::new();
        h1.insert("x-ratelimit-requests-remaining".to_string(), "100".to_string());
        limiter.update_from_headers(&h1).unwrap();
        assert_eq!(limiter.observed_daily_remaining(), Some(100));

        let mut h2 = HashMap::new();
        h2.insert("x-ratelimit-requests-remaining".to_string(), "40".to_string());
        limiter.update_from_headers(&h2).unwrap();
        assert_eq!(limiter.observed_daily_remaining(), Some(40));

        // A daily reset (midnight UTC / rolling window) must be observable again.
        let mut h3 = HashMap::new();
        h3.insert("x-ratelimit-requests-remaining".to_string(), "500".to_string());
        limiter.update_from_headers(&h3).unwrap();
        assert_eq!(limiter.observed_daily_remaining(), Some(500));
    }

    #[tokio::test]
    async fn emergency_stop_raised_at_next_acquire_after_header_update() {
        let limiter = RateLimiter::new(300, 5.0, Some(50));
        let mut headers = HashMap::new();
        headers.insert("x-ratelimit-requests-remaining".to_string(), "10".to_string());
        // update_from_headers itself raises; acquire_token would too since the
        // threshold check runs on every refill pass.
        assert!(limiter.update_from_headers(&headers).is_err());
        assert!(limiter.acquire_token().await.is_err());
    }
}
