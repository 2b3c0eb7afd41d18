//! Token bucket implementation.

use std::time::{Duration, Instant};

/// Time window a bucket's capacity applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
        }
    }

    /// Window length in whole seconds.
    pub fn as_secs(&self) -> u64 {
        self.duration().as_secs()
    }

    /// Refill rate, in tokens per second, that regenerates `capacity`
    /// tokens over one window.
    pub fn refill_rate(&self, capacity: u32) -> f64 {
        capacity as f64 / self.as_secs() as f64
    }
}

/// Outcome of a single consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consume {
    Accepted,
    Rejected,
}

impl Consume {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Consume::Accepted)
    }
}

/// A capacity-bounded counter that refills continuously.
///
/// Tokens are kept fractional between calls; callers see `floor(tokens)`.
/// The bucket holds `0 <= tokens <= capacity` after every operation and
/// `last_refill` never moves backwards.
///
/// A bucket is plain data. Serializing access to it is the registry's job.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_rate,
            last_refill: now,
        }
    }

    /// Create a full bucket whose capacity regenerates over `window`.
    pub fn for_window(capacity: u32, window: TimeWindow, now: Instant) -> Self {
        Self::new(capacity, window.refill_rate(capacity), now)
    }

    /// Add tokens for the time elapsed since the last refill.
    ///
    /// A `now` earlier than the last refill counts as zero elapsed time.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Refill, then take one token if a whole one is available.
    pub fn try_consume(&mut self, now: Instant) -> Consume {
        self.refill(now);
        if self.tokens < 1.0 {
            return Consume::Rejected;
        }
        self.tokens -= 1.0;
        Consume::Accepted
    }

    /// Give back one token, clamped to capacity.
    pub fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }

    /// Change capacity and refill rate.
    ///
    /// Tokens are clamped down to a smaller capacity but never raised;
    /// only later refills grow them.
    pub fn apply_capacity(&mut self, capacity: u32, refill_rate: f64) {
        self.capacity = capacity as f64;
        self.refill_rate = refill_rate;
        if self.tokens > self.capacity {
            self.tokens = self.capacity;
        }
    }

    /// Whole tokens available without refilling.
    pub fn remaining(&self) -> u32 {
        self.tokens.floor() as u32
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }
}
