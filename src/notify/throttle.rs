//! Per-rule and global gating of candidate notifications

use chrono::{DateTime, Duration, Utc};

use super::evaluator::{Candidate, CandidateKind};
use super::rule::RuleDefinition;
use super::state::{NotifierState, RuleState};

/// Result of the global allow/deny check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Open,
    /// Notifications are switched off in configuration
    Disabled,
    /// A client error stopped all sending; `logged` is true when this check
    /// emitted the periodic halt message
    Halted { logged: bool },
    /// A server error suspended sending until the given time
    Suspended { until: DateTime<Utc> },
}

impl GateDecision {
    pub fn is_open(&self) -> bool {
        matches!(self, GateDecision::Open)
    }
}

/// Decides whether a candidate becomes a dispatch attempt
#[derive(Debug, Clone)]
pub struct ThrottleController {
    client_error_log_frequency: Duration,
}

impl ThrottleController {
    pub fn new(client_error_log_frequency: Duration) -> Self {
        Self {
            client_error_log_frequency,
        }
    }

    /// Per-rule timing check, independent of the global gate.
    ///
    /// Returns are never held back: the episode has already ended, and the
    /// dispatch queue keeps them behind any violation still in flight.
    pub fn rule_allows(
        rule: &RuleDefinition,
        state: &RuleState,
        candidate: &Candidate,
        now: DateTime<Utc>,
    ) -> bool {
        match candidate.kind {
            CandidateKind::Return => true,
            CandidateKind::Violation if state.in_flight => false,
            CandidateKind::Violation if !state.notified_for_current_episode => {
                state.consecutive_hits >= rule.count_threshold
            }
            CandidateKind::Violation => match state.last_notified_at {
                Some(last) => now - last >= rule.wait_time,
                None => true,
            },
        }
    }

    /// Global check against the shared notifier state
    pub fn gate(&self, notifier: &mut NotifierState, now: DateTime<Utc>) -> GateDecision {
        if !notifier.enabled {
            return GateDecision::Disabled;
        }

        if notifier.client_halted {
            let logged = notifier.client_error_log_due(now, self.client_error_log_frequency);
            if logged {
                tracing::error!(
                    halted_at = ?notifier.client_halted_at,
                    "Client error received earlier, notifications are halted"
                );
            }
            return GateDecision::Halted { logged };
        }

        if let Some(until) = notifier.suspended_until.filter(|until| now < *until) {
            tracing::debug!(until = %until, "Server error backoff active, skipping notification");
            return GateDecision::Suspended { until };
        }

        GateDecision::Open
    }

    /// Run both checks; an admitted candidate marks its rule in flight.
    ///
    /// Denied candidates leave the rule's notification bookkeeping untouched.
    pub fn admit(
        &self,
        rule: &RuleDefinition,
        state: &mut RuleState,
        candidate: &Candidate,
        notifier: &mut NotifierState,
        now: DateTime<Utc>,
    ) -> bool {
        if !Self::rule_allows(rule, state, candidate, now) {
            return false;
        }

        if !self.gate(notifier, now).is_open() {
            return false;
        }

        state.in_flight = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::rule::{RuleId, RuleKind};
    use crate::observation::Binding;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rule() -> RuleDefinition {
        RuleDefinition::new("outTemp", Binding::Loop, RuleKind::Max { value: 90.0 })
            .with_count(2)
            .with_wait_time(Duration::seconds(60))
    }

    fn candidate(kind: CandidateKind) -> Candidate {
        Candidate {
            rule: RuleId(0),
            kind,
            reading: Some(95.0),
            episode: 1,
            episode_started_at: at(0),
            notifications_sent: 0,
        }
    }

    #[test]
    fn test_count_threshold() {
        let rule = rule();
        let mut state = RuleState {
            consecutive_hits: 1,
            violating: true,
            ..Default::default()
        };
        let c = candidate(CandidateKind::Violation);

        assert!(!ThrottleController::rule_allows(&rule, &state, &c, at(0)));
        state.consecutive_hits = 2;
        assert!(ThrottleController::rule_allows(&rule, &state, &c, at(0)));
    }

    #[test]
    fn test_wait_time_after_notification() {
        let rule = rule();
        let state = RuleState {
            consecutive_hits: 5,
            violating: true,
            notified_for_current_episode: true,
            last_notified_at: Some(at(100)),
            ..Default::default()
        };
        let c = candidate(CandidateKind::Violation);

        assert!(!ThrottleController::rule_allows(&rule, &state, &c, at(159)));
        assert!(ThrottleController::rule_allows(&rule, &state, &c, at(160)));
    }

    #[test]
    fn test_return_ignores_wait_time() {
        let rule = rule();
        let state = RuleState {
            last_notified_at: Some(at(100)),
            ..Default::default()
        };

        assert!(ThrottleController::rule_allows(
            &rule,
            &state,
            &candidate(CandidateKind::Return),
            at(101)
        ));
    }

    #[test]
    fn test_in_flight_blocks_violations_only() {
        let rule = rule();
        let state = RuleState {
            consecutive_hits: 2,
            in_flight: true,
            ..Default::default()
        };

        assert!(!ThrottleController::rule_allows(
            &rule,
            &state,
            &candidate(CandidateKind::Violation),
            at(0)
        ));
        assert!(ThrottleController::rule_allows(
            &rule,
            &state,
            &candidate(CandidateKind::Return),
            at(0)
        ));
    }

    #[test]
    fn test_gate_states() {
        let throttle = ThrottleController::new(Duration::seconds(3600));

        let mut notifier = NotifierState::new(false);
        assert_eq!(throttle.gate(&mut notifier, at(0)), GateDecision::Disabled);

        let mut notifier = NotifierState::new(true);
        assert_eq!(throttle.gate(&mut notifier, at(0)), GateDecision::Open);

        notifier.suspend(at(0), Duration::seconds(3600));
        assert_eq!(
            throttle.gate(&mut notifier, at(1800)),
            GateDecision::Suspended { until: at(3600) }
        );
        assert_eq!(throttle.gate(&mut notifier, at(3601)), GateDecision::Open);

        notifier.halt(at(4000));
        assert_eq!(
            throttle.gate(&mut notifier, at(4000)),
            GateDecision::Halted { logged: true }
        );
        assert_eq!(
            throttle.gate(&mut notifier, at(4001)),
            GateDecision::Halted { logged: false }
        );
    }

    #[test]
    fn test_denied_admit_leaves_rule_untouched() {
        let throttle = ThrottleController::new(Duration::seconds(3600));
        let rule = rule();
        let mut state = RuleState {
            consecutive_hits: 2,
            violating: true,
            ..Default::default()
        };
        let mut notifier = NotifierState::new(true);
        notifier.suspend(at(0), Duration::seconds(100));

        let c = candidate(CandidateKind::Violation);
        assert!(!throttle.admit(&rule, &mut state, &c, &mut notifier, at(10)));
        assert!(!state.in_flight);
        assert!(state.last_notified_at.is_none());

        assert!(throttle.admit(&rule, &mut state, &c, &mut notifier, at(100)));
        assert!(state.in_flight);
    }
}
