//! Per-caller sliding window rate limiter.
//!
//! Each identity owns a log of accepted request timestamps. The log is
//! pruned to the trailing window before every decision, so at most
//! `max_requests` calls are accepted in any window-length interval ending
//! now.

use std::collections::VecDeque;
use std::time::Duration;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// Summary for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub tracked_identities: usize,
    pub max_requests: u32,
    pub window_secs: u64,
}

/// Sliding window limiter keyed by caller identity.
///
/// DashMap shards give per-identity mutual exclusion: the prune, check and
/// append for one identity happen under that entry's write lock.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests: max_requests as usize,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    /// Admit and record a request, or reject it without recording.
    pub fn is_allowed(&self, identity: &str) -> bool {
        let now = Instant::now();
        let mut log = self.windows.entry(identity.to_string()).or_default();
        prune(&mut log, now, self.window);

        if log.len() >= self.max_requests {
            metrics::record_rate_limited("window_full");
            return false;
        }
        log.push_back(now);
        true
    }

    /// Requests left in the current window. Does not mutate stored state.
    pub fn remaining(&self, identity: &str) -> u32 {
        let now = Instant::now();
        let used = self
            .windows
            .get(identity)
            .map(|log| log.iter().filter(|&&ts| now.duration_since(ts) < self.window).count())
            .unwrap_or(0);
        self.max_requests.saturating_sub(used) as u32
    }

    /// Time until the oldest request in the window ages out.
    pub fn retry_after(&self, identity: &str) -> Duration {
        let now = Instant::now();
        self.windows
            .get(identity)
            .and_then(|log| {
                log.iter()
                    .find(|&&ts| now.duration_since(ts) < self.window)
                    .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
            })
            .unwrap_or(Duration::ZERO)
    }

    /// Drop identities with nothing left in their window.
    ///
    /// Returns the number of identities removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, log| {
            prune(log, now, self.window);
            !log.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            tracked_identities: self.windows.len(),
            max_requests: self.max_requests as u32,
            window_secs: self.window.as_secs(),
        }
    }

    /// Periodically evict idle identities until shutdown.
    pub async fn run_eviction(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?interval, "Rate limiter sweeper starting");
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_idle();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.windows.len(), "Evicted idle identities");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limiter sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = log.front() {
        if now.duration_since(oldest) < window {
            break;
        }
        log.pop_front();
    }
}
