use crate::session::InteractionClock;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(45);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Directive sent in place of user text for a proactive check-in.
pub const PROACTIVE_DIRECTIVE: &str =
    "PROACTIVE_SYSTEM_CHECK: User is silent. Check in on them naturally based on your persona.";

/// Decides when the companion should speak without being asked.
#[derive(Clone, Debug)]
pub struct IdleMonitor {
    threshold: Duration,
    poll_interval: Duration,
    enabled: bool,
}

impl IdleMonitor {
    pub fn new(threshold: Duration, poll_interval: Duration, enabled: bool) -> Self {
        Self {
            threshold,
            poll_interval,
            enabled,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// One poll. Returns `true` when a synthetic turn should start now, in which
    /// case the clock has already been reset.
    pub fn check(&self, clock: &mut InteractionClock, turn_idle: bool, conversation_len: usize) -> bool {
        if !self.enabled || !turn_idle || conversation_len == 0 {
            return false;
        }
        let idle_for = clock.idle_for();
        if idle_for <= self.threshold {
            return false;
        }
        info!(?idle_for, "user is quiet, starting a proactive check-in");
        clock.touch();
        true
    }
}

impl Default for IdleMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_THRESHOLD, DEFAULT_POLL_INTERVAL, true)
    }
}
