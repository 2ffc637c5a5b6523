//! Batch processing and outcome bookkeeping
//!
//! [`NotifyEngine`] is the explicit context the rest of the pipeline works
//! against: the immutable rule store, one [`RuleState`] per rule, and the
//! shared [`NotifierState`]. A batch is evaluated and throttled under the
//! rule-state lock, so batches never interleave.

use std::sync::Arc;

use parking_lot::Mutex;

use super::dispatcher::{DispatchOutcome, DispatchStatus};
use super::evaluator::{evaluate_batch, CandidateKind};
use super::message::NotificationRequest;
use super::rule::{RuleId, RuleStore};
use super::state::{NotifierState, RuleState, SharedNotifierState};
use super::throttle::ThrottleController;
use crate::clock::Clock;
use crate::observation::ObservationBatch;

/// Rule store plus all mutable notification state
pub struct NotifyEngine {
    store: Arc<RuleStore>,
    states: Mutex<Vec<RuleState>>,
    notifier: SharedNotifierState,
    throttle: ThrottleController,
    clock: Arc<dyn Clock>,
}

impl NotifyEngine {
    pub fn new(
        store: RuleStore,
        notifier: SharedNotifierState,
        throttle: ThrottleController,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let states = vec![RuleState::default(); store.len()];
        Self {
            store: Arc::new(store),
            states: Mutex::new(states),
            notifier,
            throttle,
            clock,
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn notifier(&self) -> SharedNotifierState {
        Arc::clone(&self.notifier)
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Evaluate a batch and return the notifications allowed to go out.
    ///
    /// Every returned request marks its rule in flight until
    /// [`apply_outcome`](Self::apply_outcome) or [`release`](Self::release)
    /// is called for it.
    pub fn process_batch(&self, batch: &ObservationBatch) -> Vec<NotificationRequest> {
        let now = self.clock.now();
        let mut states = self.states.lock();

        let candidates = evaluate_batch(&self.store, &mut states, batch, now);
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut notifier = self.notifier.lock();
        let mut requests = Vec::new();

        for candidate in candidates {
            let Some(rule) = self.store.get(candidate.rule) else {
                continue;
            };
            let Some(state) = states.get_mut(candidate.rule.0) else {
                continue;
            };

            if self
                .throttle
                .admit(rule, state, &candidate, &mut notifier, now)
            {
                tracing::debug!(
                    rule = %rule.id,
                    observation = %rule.observation,
                    kind = ?candidate.kind,
                    "Notification admitted"
                );
                requests.push(NotificationRequest::build(rule, &candidate, now));
            }
        }

        requests
    }

    /// Record a dispatch result on the rule that produced it
    pub fn apply_outcome(&self, outcome: &DispatchOutcome) {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(outcome.rule.0) else {
            tracing::warn!(rule = %outcome.rule, "Outcome for unknown rule");
            return;
        };
        state.in_flight = false;

        if outcome.status != DispatchStatus::Delivered {
            return;
        }

        match outcome.kind {
            CandidateKind::Violation if state.violating && state.episode == outcome.episode => {
                state.notified_for_current_episode = true;
                state.last_notified_at = Some(outcome.at);
                state.notifications_sent = state.notifications_sent.saturating_add(1);
                tracing::info!(
                    rule = %outcome.rule,
                    sent = state.notifications_sent,
                    "Notification delivered"
                );
            }
            CandidateKind::Violation => {
                tracing::debug!(
                    rule = %outcome.rule,
                    episode = outcome.episode,
                    "Delivered notification belongs to an episode that already ended"
                );
            }
            CandidateKind::Return => {
                tracing::info!(rule = %outcome.rule, "Return notification delivered");
            }
        }
    }

    /// Clear the in-flight mark for a request that was never dispatched
    pub fn release(&self, rule: RuleId) {
        if let Some(state) = self.states.lock().get_mut(rule.0) {
            state.in_flight = false;
        }
    }

    pub fn rule_state(&self, rule: RuleId) -> Option<RuleState> {
        self.states.lock().get(rule.0).cloned()
    }

    pub fn rule_states(&self) -> Vec<RuleState> {
        self.states.lock().clone()
    }

    pub fn notifier_state(&self) -> NotifierState {
        self.notifier.lock().clone()
    }
}
