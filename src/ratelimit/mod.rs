//! Sliding-window admission control.
//!
//! A [`SlidingWindow`] counts recent requests per identifier inside a trailing
//! time window. The [`TieredLimiter`] composes three independent windows — a
//! global bucket, a per-IP bucket and a per-API-key bucket — each with its own
//! budget; a request is admitted only if none of them rejects it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::clock::Clock;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub limited: bool,
    /// Requests left in the window after this one (0 when limited).
    pub remaining: u32,
    /// Suggested wait before retrying, in seconds (0 when admitted).
    pub wait_secs: i64,
}

pub struct SlidingWindow {
    window: Duration,
    max_requests: u32,
    records: Mutex<HashMap<String, Vec<(DateTime<Utc>, u32)>>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindow {
    pub fn new(window_secs: i64, max_requests: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            window: Duration::seconds(window_secs),
            max_requests,
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window_secs(&self) -> i64 {
        self.window.num_seconds()
    }

    /// Check the identifier's budget and, if admitted, record this request.
    pub fn check(&self, identifier: &str) -> RateDecision {
        let now = self.clock.now();
        let cutoff = now - self.window;

        let mut records = self.records.lock().unwrap();
        let samples = records.entry(identifier.to_string()).or_default();
        samples.retain(|(ts, _)| *ts > cutoff);

        let total: u32 = samples.iter().map(|(_, count)| count).sum();
        if total >= self.max_requests {
            // Seconds until the oldest sample leaves the window, rounded up
            // and clamped to [1, window].
            let wait_secs = samples
                .first()
                .map(|(oldest, _)| {
                    ((self.window - (now - *oldest)).num_seconds() + 1)
                        .clamp(1, self.window.num_seconds())
                })
                .unwrap_or_else(|| self.window.num_seconds());
            return RateDecision {
                limited: true,
                remaining: 0,
                wait_secs,
            };
        }

        samples.push((now, 1));
        RateDecision {
            limited: false,
            remaining: self.max_requests - total - 1,
            wait_secs: 0,
        }
    }
}

/// Which tier rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitTier {
    Global,
    Ip,
    ApiKey,
}

impl LimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitTier::Global => "global",
            LimitTier::Ip => "ip",
            LimitTier::ApiKey => "api_key",
        }
    }
}

/// Values for the `X-RateLimit-*` headers attached to admitted responses.
#[derive(Debug, Clone, Copy)]
pub struct RateHeaders {
    pub remaining: u32,
    pub limit: u32,
    /// Unix timestamp at which the current window rolls over.
    pub reset: i64,
}

/// Rejection carrying the retry hint for the 429 response.
#[derive(Debug, Clone, Copy)]
pub struct RateExceeded {
    pub tier: LimitTier,
    pub wait_secs: i64,
}

const GLOBAL_BUCKET: &str = "global";

pub struct TieredLimiter {
    global: SlidingWindow,
    per_ip: SlidingWindow,
    per_key: SlidingWindow,
    clock: Arc<dyn Clock>,
}

impl TieredLimiter {
    pub fn new(
        window_secs: i64,
        global_max: u32,
        ip_max: u32,
        api_key_max: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            global: SlidingWindow::new(window_secs, global_max, clock.clone()),
            per_ip: SlidingWindow::new(window_secs, ip_max, clock.clone()),
            per_key: SlidingWindow::new(window_secs, api_key_max, clock.clone()),
            clock,
        }
    }

    /// Evaluate all applicable tiers in order: global, IP, then API key.
    ///
    /// The returned headers reflect the most specific bucket that applied
    /// (API key when present, IP otherwise).
    pub fn check(
        &self,
        client_ip: &str,
        api_key: Option<&str>,
    ) -> Result<RateHeaders, RateExceeded> {
        let global = self.global.check(GLOBAL_BUCKET);
        if global.limited {
            warn!(wait_secs = global.wait_secs, "Global rate limit exceeded");
            return Err(RateExceeded {
                tier: LimitTier::Global,
                wait_secs: global.wait_secs,
            });
        }

        let ip = self.per_ip.check(client_ip);
        if ip.limited {
            warn!(client_ip, wait_secs = ip.wait_secs, "IP rate limit exceeded");
            return Err(RateExceeded {
                tier: LimitTier::Ip,
                wait_secs: ip.wait_secs,
            });
        }

        if let Some(key) = api_key {
            let by_key = self.per_key.check(key);
            if by_key.limited {
                warn!(wait_secs = by_key.wait_secs, "API key rate limit exceeded");
                return Err(RateExceeded {
                    tier: LimitTier::ApiKey,
                    wait_secs: by_key.wait_secs,
                });
            }
            return Ok(RateHeaders {
                remaining: by_key.remaining,
                limit: self.per_key.max_requests(),
                reset: self.clock.now().timestamp() + self.per_key.window_secs(),
            });
        }

        Ok(RateHeaders {
            remaining: ip.remaining,
            limit: self.per_ip.max_requests(),
            reset: self.clock.now().timestamp() + self.per_ip.window_secs(),
        })
    }
}
