//! Mutable rule and notifier state

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Per-rule progress through the current episode
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleState {
    /// Matching cycles in the current episode
    pub consecutive_hits: u32,
    /// Whether the last cycle matched
    pub violating: bool,
    /// A violation notification was delivered in the current episode
    pub notified_for_current_episode: bool,
    pub last_notified_at: Option<DateTime<Utc>>,
    /// When the current episode began
    pub episode_started_at: Option<DateTime<Utc>>,
    /// Violation notifications delivered in the current episode
    pub notifications_sent: u32,
    /// Bumped when an episode starts; outcomes for older episodes are stale
    pub episode: u64,
    /// A dispatch for this rule is waiting for its result
    pub in_flight: bool,
}

impl RuleState {
    /// Close the current episode
    pub(crate) fn reset_episode(&mut self) {
        self.consecutive_hits = 0;
        self.violating = false;
        self.notified_for_current_episode = false;
        self.notifications_sent = 0;
        self.episode_started_at = None;
    }
}

/// Process-wide halt and backoff state for the outbound channel
#[derive(Debug, Clone, Serialize)]
pub struct NotifierState {
    pub enabled: bool,
    /// Set by a 4xx response, never cleared
    pub client_halted: bool,
    pub client_halted_at: Option<DateTime<Utc>>,
    /// Set by a 5xx response; gating stops once this is in the past
    pub suspended_until: Option<DateTime<Utc>>,
    pub last_client_error_logged_at: Option<DateTime<Utc>>,
}

/// Shared handle used by the engine and the dispatcher
pub type SharedNotifierState = Arc<Mutex<NotifierState>>;

impl NotifierState {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            client_halted: false,
            client_halted_at: None,
            suspended_until: None,
            last_client_error_logged_at: None,
        }
    }

    pub fn shared(enabled: bool) -> SharedNotifierState {
        Arc::new(Mutex::new(Self::new(enabled)))
    }

    pub fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        self.suspended_until.is_some_and(|until| now < until)
    }

    /// Stop all sending for the rest of the process
    pub fn halt(&mut self, now: DateTime<Utc>) {
        if !self.client_halted {
            self.client_halted = true;
            self.client_halted_at = Some(now);
        }
    }

    /// Suspend sending for `period` starting at `now`
    pub fn suspend(&mut self, now: DateTime<Utc>, period: Duration) {
        self.suspended_until = Some(now + period);
    }

    /// Whether the halt message may be logged now; records the log time if so
    pub fn client_error_log_due(&mut self, now: DateTime<Utc>, frequency: Duration) -> bool {
        let due = match self.last_client_error_logged_at {
            None => true,
            Some(last) => now - last >= frequency,
        };
        if due {
            self.last_client_error_logged_at = Some(now);
        }
        due
    }
}

impl Default for NotifierState {
    fn default() -> Self {
        Self::new(true)
    }
}
