//! Per-cycle rule evaluation
//!
//! Pure state transitions: a batch goes in, rule states are advanced and at
//! most one candidate per rule comes out. Whether a candidate is actually
//! sent is decided later by the throttle.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::rule::{RuleDefinition, RuleId, RuleStore};
use super::state::RuleState;
use crate::observation::ObservationBatch;

/// What a candidate notification announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    /// The condition holds
    Violation,
    /// The condition cleared after a notification was sent
    Return,
}

/// A notification the evaluator would like to send
#[derive(Debug, Clone)]
pub struct Candidate {
    pub rule: RuleId,
    pub kind: CandidateKind,
    /// Reading in the batch that produced this candidate
    pub reading: Option<f64>,
    pub episode: u64,
    pub episode_started_at: DateTime<Utc>,
    /// Violation notifications already delivered in the episode
    pub notifications_sent: u32,
}

/// Advance one rule's state for a batch
pub fn evaluate_rule(
    rule: &RuleDefinition,
    state: &mut RuleState,
    batch: &ObservationBatch,
    now: DateTime<Utc>,
) -> Option<Candidate> {
    let reading = rule.reading(batch);
    let matched = rule.kind.matches(reading);

    tracing::debug!(
        rule = %rule.id,
        observation = %rule.observation,
        kind = rule.kind.name(),
        reading = ?reading,
        threshold = ?rule.kind.threshold(),
        matched,
        hits = state.consecutive_hits,
        "Evaluated rule"
    );

    if matched {
        if !state.violating {
            state.episode = state.episode.wrapping_add(1);
            state.episode_started_at = Some(now);
        }
        state.consecutive_hits = state.consecutive_hits.saturating_add(1);
        state.violating = true;

        return Some(Candidate {
            rule: rule.id,
            kind: CandidateKind::Violation,
            reading,
            episode: state.episode,
            episode_started_at: state.episode_started_at.unwrap_or(now),
            notifications_sent: state.notifications_sent,
        });
    }

    if !state.violating {
        return None;
    }

    let started = state.episode_started_at.unwrap_or(now);
    let candidate = if state.notified_for_current_episode {
        if rule.return_notification {
            Some(Candidate {
                rule: rule.id,
                kind: CandidateKind::Return,
                reading,
                episode: state.episode,
                episode_started_at: started,
                notifications_sent: state.notifications_sent,
            })
        } else {
            tracing::debug!(
                rule = %rule.id,
                observation = %rule.observation,
                "Condition cleared, return notification not requested"
            );
            None
        }
    } else {
        tracing::info!(
            rule = %rule.id,
            observation = %rule.observation,
            kind = rule.kind.name(),
            since = %started,
            hits = state.consecutive_hits,
            "Condition cleared before any notification was sent"
        );
        None
    };

    state.reset_episode();
    candidate
}

/// Evaluate every rule bound to the batch's stream.
///
/// `states` is indexed by [`RuleId`].
pub fn evaluate_batch(
    store: &RuleStore,
    states: &mut [RuleState],
    batch: &ObservationBatch,
    now: DateTime<Utc>,
) -> Vec<Candidate> {
    store
        .for_binding(batch.binding)
        .filter_map(|rule| {
            let state = states.get_mut(rule.id.0)?;
            evaluate_rule(rule, state, batch, now)
        })
        .collect()
}
