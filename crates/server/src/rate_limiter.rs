//! Per-connection token bucket.
//!
//! Costs are per message kind: a chat turn costs far more than a ping since
//! it ends up in a reasoning call. The bucket is keyed by connection, never
//! by session, so one noisy client cannot starve another.
//!
//! - A message that exceeds the available tokens is rejected whole
//! - Rejections carry retry_after_ms
//! - Time comes from a `Clock` so tests are deterministic

use std::time::Instant;

use gridchat_config::RateLimitSettings;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitedError {
    /// Milliseconds until enough tokens are available. `u64::MAX` when the
    /// cost exceeds the burst size and can never succeed.
    pub retry_after_ms: u64,
    pub requested: u32,
    pub available: u32,
}

pub struct RateLimiter<C: Clock = RealClock> {
    /// Fractional so slow refill rates still accumulate.
    tokens: f64,
    max_tokens: u32,
    refill_rate: u32,
    last_refill: Instant,
    clock: C,
    settings: RateLimitSettings,
}

impl RateLimiter<RealClock> {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, RealClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(settings: RateLimitSettings, clock: C) -> Self {
        let now = clock.now();
        Self {
            tokens: settings.burst as f64,
            max_tokens: settings.burst,
            refill_rate: settings.per_sec,
            last_refill: now,
            clock,
            settings,
        }
    }

    fn refill(&mut self) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let refill_amount = elapsed.as_secs_f64() * self.refill_rate as f64;
        self.tokens = (self.tokens + refill_amount).min(self.max_tokens as f64);
        self.last_refill = now;
    }

    pub fn try_chat(&mut self) -> Result<(), RateLimitedError> {
        self.try_consume(self.settings.chat_cost)
    }

    /// Uploads and direct grid submissions.
    pub fn try_upload(&mut self) -> Result<(), RateLimitedError> {
        self.try_consume(self.settings.upload_cost)
    }

    /// Attach and snapshot, both of which serialize the full grid.
    pub fn try_snapshot(&mut self) -> Result<(), RateLimitedError> {
        self.try_consume(self.settings.snapshot_cost)
    }

    /// Ping, detach and close.
    pub fn try_ping(&mut self) -> Result<(), RateLimitedError> {
        self.try_consume(self.settings.ping_cost)
    }

    /// All-or-nothing: a rejected request consumes nothing.
    fn try_consume(&mut self, cost: u32) -> Result<(), RateLimitedError> {
        self.refill();
        let available = self.tokens.floor() as u32;

        if cost == 0 {
            return Ok(());
        }

        if cost > self.max_tokens {
            return Err(RateLimitedError {
                retry_after_ms: u64::MAX,
                requested: cost,
                available,
            });
        }

        if (cost as f64) <= self.tokens {
            self.tokens -= cost as f64;
            Ok(())
        } else {
            let tokens_needed = cost as f64 - self.tokens;
            let retry_after_ms = if self.refill_rate == 0 {
                u64::MAX
            } else {
                (tokens_needed / self.refill_rate as f64 * 1000.0).ceil() as u64
            };
            Err(RateLimitedError {
                retry_after_ms,
                requested: cost,
                available,
            })
        }
    }

    pub fn available_tokens(&mut self) -> u32 {
        self.refill();
        self.tokens.floor() as u32
    }
}
