//! Retry and polling policies

use crate::types::JobId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff between dispatch attempts after a transient failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total dispatches allowed, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay for retry n is `multiplier * 2^(n-1)` before clamping
    #[serde(default = "default_multiplier_ms")]
    pub multiplier_ms: u64,

    #[serde(default = "default_floor_ms")]
    pub floor_ms: u64,

    #[serde(default = "default_ceiling_ms")]
    pub ceiling_ms: u64,

    /// Add up to 25% jitter derived from the job id
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_multiplier_ms() -> u64 {
    2_000
}

fn default_floor_ms() -> u64 {
    5_000
}

fn default_ceiling_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            multiplier_ms: default_multiplier_ms(),
            floor_ms: default_floor_ms(),
            ceiling_ms: default_ceiling_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter (deterministic delays)
    pub fn fixed(max_attempts: u32, multiplier_ms: u64, floor_ms: u64, ceiling_ms: u64) -> Self {
        Self {
            max_attempts,
            multiplier_ms,
            floor_ms,
            ceiling_ms,
            jitter: false,
        }
    }

    fn cap_ms(&self) -> u64 {
        self.ceiling_ms.max(self.floor_ms)
    }

    fn base_delay_ms(&self, retry: u32) -> u64 {
        let exponent = retry.saturating_sub(1).min(32);
        let raw = self.multiplier_ms.saturating_mul(1u64 << exponent);
        raw.max(self.floor_ms).min(self.cap_ms())
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32, job_id: &JobId) -> Duration {
        let base = self.base_delay_ms(retry);
        if !self.jitter || base == 0 {
            return Duration::from_millis(base);
        }
        let bytes = job_id.as_bytes();
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&bytes[8..16]);
        let seed = u64::from_le_bytes(seed).rotate_left(retry * 7);
        let jitter = base.saturating_mul(seed % 26) / 100;
        // Jitter never pushes a delay past the ceiling
        Duration::from_millis((base + jitter).min(self.cap_ms()))
    }

    /// Longest total backoff a job can accumulate
    pub fn worst_case_backoff(&self) -> Duration {
        let total: u64 = (1..self.max_attempts.max(1))
            .map(|retry| {
                let base = self.base_delay_ms(retry);
                if self.jitter {
                    (base + base / 4).min(self.cap_ms())
                } else {
                    base
                }
            })
            .sum();
        Duration::from_millis(total)
    }
}

/// Polling of long-running operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingPolicy {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Wall-clock limit measured from the dispatch that returned the handle
    #[serde(default = "default_poll_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_poll_deadline_ms() -> u64 {
    300_000
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            deadline_ms: default_poll_deadline_ms(),
        }
    }
}

impl PollingPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}
