//! Restart Policy
//!
//! Decides how soon an exited worker is replaced.
//!
//! An isolated exit is replaced immediately. Exits that pile up inside the
//! restart window back off exponentially, and an optional ceiling stops the
//! supervisor once the window budget is spent.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::Config;

// == Restart Policy ==
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Delay for the second restart inside the window
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Span over which restarts count as recent
    pub window: Duration,
    /// Restarts allowed within the window, 0 = unlimited
    pub max_restarts: u32,
}

impl RestartPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.restart_backoff_ms),
            max_delay: Duration::from_millis(config.restart_backoff_max_ms),
            window: Duration::from_secs(config.restart_window_secs),
            max_restarts: config.max_restarts,
        }
    }

    /// Replace every exit at once, without limit.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            window: Duration::ZERO,
            max_restarts: 0,
        }
    }

    /// Delay before a restart given how many restarts already happened
    /// inside the window.
    pub fn delay_for(&self, recent: u32) -> Duration {
        if recent == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let initial_ms = self.initial_delay.as_millis() as f64;
        let exponent = (recent - 1).min(32) as i32;
        let delay_ms = initial_ms * 2f64.powi(exponent);
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Outcome of registering one worker exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Spawn a replacement after the delay
    Restart(Duration),
    /// The window budget is exhausted
    GiveUp,
}

// == Restart Tracker ==
/// Sliding history of restarts across the whole pool.
#[derive(Debug)]
pub struct RestartTracker {
    policy: RestartPolicy,
    history: VecDeque<Instant>,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            history: VecDeque::new(),
        }
    }

    /// Registers an exit observed at `now` and decides what to do about it.
    pub fn record(&mut self, now: Instant) -> RestartDecision {
        let window = self.policy.window;
        while let Some(oldest) = self.history.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let recent = self.history.len() as u32;
        if self.policy.max_restarts > 0 && recent >= self.policy.max_restarts {
            return RestartDecision::GiveUp;
        }

        self.history.push_back(now);
        RestartDecision::Restart(self.policy.delay_for(recent))
    }

    /// Restarts currently inside the window.
    pub fn recent(&self) -> usize {
        self.history.len()
    }

    pub fn window(&self) -> Duration {
        self.policy.window
    }
}
