//! One-second window rate limiter
//!
//! The limiter is fed the cumulative number of bytes read so far. If more
//! than `limit` bytes arrived since the current window opened, and the
//! window is still younger than a second, the caller sleeps out the rest of
//! the window. Windows are wall-clock based: a reader that stalls for more
//! than a second simply starts a fresh window. This is a best-effort shaper;
//! bursts up to the limit inside one window are allowed.

use crate::error::RangedlError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(1);

/// Windowed limiter owned by a single download
#[derive(Debug)]
pub struct RateLimiter {
    /// Bytes per second (0 = unlimited)
    limit: u64,
    /// Cumulative byte count when the current window opened
    bytes_at_window_start: u64,
    /// None until the first check opens a window
    window_start: Option<Instant>,
}

impl RateLimiter {
    /// Create a limiter with a given bytes-per-second ceiling
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            limit: bytes_per_second,
            bytes_at_window_start: 0,
            window_start: None,
        }
    }

    /// Create an unlimited limiter (no throttling)
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }

    /// Wait, if needed, before the next read.
    ///
    /// `cumulative_bytes` is the total read so far by everything sharing this
    /// limiter. Returns `Cancelled` if the token fires while sleeping.
    pub async fn wait(
        &mut self,
        cumulative_bytes: u64,
        cancel: &CancellationToken,
    ) -> Result<(), RangedlError> {
        if self.is_unlimited() {
            return Ok(());
        }

        let now = Instant::now();
        let elapsed = match self.window_start {
            Some(start) => now.duration_since(start),
            None => {
                self.reset(cumulative_bytes, now);
                return Ok(());
            }
        };

        if elapsed > WINDOW {
            self.reset(cumulative_bytes, now);
            return Ok(());
        }

        let consumed = cumulative_bytes.saturating_sub(self.bytes_at_window_start);
        if consumed > self.limit {
            let remaining = WINDOW - elapsed;
            debug!(
                "Rate limit reached ({} > {} bytes), sleeping {:?}",
                consumed, self.limit, remaining
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RangedlError::Cancelled),
                _ = tokio::time::sleep(remaining) => {}
            }
            self.reset(cumulative_bytes, Instant::now());
        }

        Ok(())
    }

    fn reset(&mut self, cumulative_bytes: u64, now: Instant) {
        self.bytes_at_window_start = cumulative_bytes;
        self.window_start = Some(now);
    }
}

/// Split an optional `<kbps>:` rate prefix off a URL.
///
/// `"200:https://host/f"` yields `(Some(200_000), "https://host/f")`. A
/// prefix that is not an integer is not a prefix at all, so plain URLs pass
/// through untouched. Non-positive values mean unlimited; values too large
/// to express in bytes saturate.
pub fn parse_rate_prefix(url: &str) -> (Option<u64>, &str) {
    let Some((head, rest)) = url.split_once(':') else {
        return (None, url);
    };
    match head.trim().parse::<i64>() {
        Ok(kbps) if kbps > 0 => (Some((kbps as u64).saturating_mul(1000)), rest),
        Ok(_) => (None, rest),
        Err(_) => (None, url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn unlimited_never_waits() {
        let mut limiter = RateLimiter::unlimited();
        let token = CancellationToken::new();
        let start = Instant::now();
        for read in (0..100u64).map(|i| i * 1_000_000) {
            limiter.wait(read, &token).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeding_the_limit_sleeps_out_the_window() {
        let mut limiter = RateLimiter::new(1000);
        let token = CancellationToken::new();

        limiter.wait(0, &token).await.unwrap();
        tokio::time::advance(Duration::from_millis(300)).await;

        let before = Instant::now();
        limiter.wait(1001, &token).await.unwrap();
        let waited = before.elapsed();
        assert!(waited >= Duration::from_millis(700), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn reading_exactly_the_limit_does_not_wait() {
        let mut limiter = RateLimiter::new(1000);
        let token = CancellationToken::new();

        limiter.wait(0, &token).await.unwrap();
        let before = Instant::now();
        limiter.wait(1000, &token).await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_window_resets_instead_of_waiting() {
        let mut limiter = RateLimiter::new(1000);
        let token = CancellationToken::new();

        limiter.wait(0, &token).await.unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;

        let before = Instant::now();
        limiter.wait(50_000, &token).await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);

        // The new window starts at 50_000, so a small read is still free.
        limiter.wait(50_500, &token).await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn first_check_opens_window_at_resume_offset() {
        // A resumed task starts with its counter at the existing file size.
        let mut limiter = RateLimiter::new(1000);
        let token = CancellationToken::new();
        let before = Instant::now();
        limiter.wait(10_000_000, &token).await.unwrap();
        limiter.wait(10_000_500, &token).await.unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_sleep() {
        let mut limiter = RateLimiter::new(10);
        let token = CancellationToken::new();
        limiter.wait(0, &token).await.unwrap();
        token.cancel();
        let err = limiter.wait(1000, &token).await.unwrap_err();
        assert!(matches!(err, RangedlError::Cancelled));
    }

    #[test]
    fn rate_prefix_parsing() {
        assert_eq!(
            parse_rate_prefix("200:https://host/f.bin"),
            (Some(200_000), "https://host/f.bin")
        );
        assert_eq!(
            parse_rate_prefix("https://host/f.bin"),
            (None, "https://host/f.bin")
        );
        assert_eq!(parse_rate_prefix("0:https://host/f"), (None, "https://host/f"));
        assert_eq!(parse_rate_prefix("-5:https://host/f"), (None, "https://host/f"));
        assert_eq!(parse_rate_prefix("no-scheme"), (None, "no-scheme"));
        assert_eq!(
            parse_rate_prefix("99999999999999999:http://host/f.bin"),
            (Some(u64::MAX), "http://host/f.bin")
        );
    }
}
