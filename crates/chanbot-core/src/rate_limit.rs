use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Interactions allowed inside one `check_period`.
    pub max_interactions: usize,
    pub check_period: Duration,
    /// How long an identity stays on the penalty bench after being limited.
    pub penalty: Duration,
    /// Interval of the background sweep that evicts stale timestamps.
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_interactions: 4,
            check_period: Duration::from_secs(10),
            penalty: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Sliding-window limiter keyed by identity.
///
/// All windows sit behind one lock shared with the periodic sweep, so every `limit`
/// call is an atomic prune-insert-count. The penalty bench is a separate map: its
/// writes are single-key upserts that never need to agree with a window.
pub struct RateLimiter {
    cfg: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
    bench: DashMap<String, u64>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            clock,
            windows: Mutex::new(HashMap::new()),
            bench: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.cfg
    }

    /// Record an interaction; `true` means it exceeds the allowed rate.
    pub fn limit(&self, nick: &str) -> bool {
        if !self.cfg.enabled {
            return false;
        }

        // The clock is read under the lock so racing callers see one order.
        let (now, size) = {
            let mut windows = self.windows.lock();
            let now = self.clock.now_millis();
            let window = windows.entry(nick.to_string()).or_default();
            prune(window, self.cutoff(now));
            window.push_back(now);
            (now, window.len())
        };

        if size > self.cfg.max_interactions {
            self.bench.insert(nick.to_string(), now);
            tracing::debug!(nick, size, "interaction over limit");
            return true;
        }
        false
    }

    /// Whether `nick` was limited within the last `penalty`.
    pub fn is_penalized(&self, nick: &str) -> bool {
        let Some(last) = self.bench.get(nick).map(|e| *e.value()) else {
            return false;
        };
        let now = self.clock.now_millis();
        now.saturating_sub(last) < self.cfg.penalty.as_millis() as u64
    }

    /// Evict stale timestamps from every window. Identities are kept even when empty.
    ///
    /// Returns the number of timestamps removed.
    pub fn sweep(&self) -> usize {
        let mut windows = self.windows.lock();
        let cutoff = self.cutoff(self.clock.now_millis());
        windows
            .values_mut()
            .map(|window| prune(window, cutoff))
            .sum()
    }

    /// Timestamps currently held for `nick`, stale ones included until the next prune.
    pub fn window_len(&self, nick: &str) -> usize {
        self.windows.lock().get(nick).map_or(0, VecDeque::len)
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.lock().len()
    }

    /// Run `sweep` every `sweep_interval` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(limiter.cfg.sweep_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let evicted = limiter.sweep();
                        if evicted > 0 {
                            tracing::debug!(evicted, "rate limiter sweep");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    fn cutoff(&self, now: u64) -> u64 {
        now.saturating_sub(self.cfg.check_period.as_millis() as u64)
    }
}

/// Drop timestamps older than `cutoff`, wherever they sit: a wall clock can step back.
fn prune(window: &mut VecDeque<u64>, cutoff: u64) -> usize {
    let before = window.len();
    window.retain(|&ts| ts >= cutoff);
    before - window.len()
}
