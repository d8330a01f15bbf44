//! Reconnection backoff
//!
//! Delay schedule for the link supervisor: `initial_delay * multiplier^(n-1)`
//! after `n` consecutive failures, capped at `max_delay`, plus optional random jitter. After `max_attempts`
//! consecutive failures the supervisor sits out `cooldown` and starts over.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

/// Reconnection policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt after a fault
    pub initial_delay: Duration,
    /// 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each wait
    pub jitter: Duration,
    /// Consecutive failures before a cooldown; `None` retries forever
    pub max_attempts: Option<u32>,
    pub cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(3000),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_millis(30_000),
            jitter: Duration::ZERO,
            max_attempts: None,
            cooldown: Duration::from_millis(60_000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay after `failures` consecutive failed attempts, without jitter.
    ///
    /// Zero and one failure both wait `initial_delay`.
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let nanos = self.initial_delay.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay.max(self.initial_delay);
        }
        Duration::from_nanos(nanos.round() as u64)
    }
}

/// Reconnection statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful_reconnects: u64,
    pub failed_reconnects: u64,
    pub cooldowns: u64,
    pub last_connected: Option<chrono::DateTime<chrono::Utc>>,
}

/// Tracks consecutive failures and hands out the next wait
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    consecutive_failures: u32,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            stats: ReconnectStats::default(),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Wait before the next attempt.
    ///
    /// Returns the cooldown (and resets the failure counter) once
    /// `max_attempts` consecutive failures have accumulated.
    pub fn next_wait(&mut self) -> Duration {
        if let Some(max) = self.policy.max_attempts {
            if max > 0 && self.consecutive_failures >= max {
                info!(
                    "Reconnect: {} failures, cooldown {}ms",
                    self.consecutive_failures,
                    self.policy.cooldown.as_millis()
                );
                self.consecutive_failures = 0;
                self.stats.cooldowns += 1;
                return self.policy.cooldown;
            }
        }

        let mut delay = self.policy.base_delay(self.consecutive_failures);
        if !self.policy.jitter.is_zero() {
            let jitter_ms = self.policy.jitter.as_millis() as u64;
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        }
        debug!("Reconnect: wait {}ms", delay.as_millis());
        delay
    }

    pub fn record_attempt(&mut self) {
        self.stats.total_attempts += 1;
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.stats.successful_reconnects += 1;
        self.stats.last_connected = Some(chrono::Utc::now());
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.stats.failed_reconnects += 1;
    }
}
