//! Notification text

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::evaluator::{Candidate, CandidateKind};
use super::rule::{RuleDefinition, RuleId, RuleKind};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// A notification ready to hand to a transport
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRequest {
    /// Rule that produced this notification
    pub rule: RuleId,
    pub kind: CandidateKind,
    /// Episode of the rule this notification belongs to
    pub episode: u64,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationRequest {
    pub fn build(rule: &RuleDefinition, candidate: &Candidate, now: DateTime<Utc>) -> Self {
        Self {
            rule: rule.id,
            kind: candidate.kind,
            episode: candidate.episode,
            title: format!("Unexpected value for {}.", rule.display_name()),
            message: build_message(rule, candidate),
            timestamp: now,
        }
    }
}

fn build_message(rule: &RuleDefinition, candidate: &Candidate) -> String {
    let name = match &rule.label {
        Some(label) => format!("{} ({})", rule.name, label),
        None => rule.name.clone(),
    };
    let since = candidate.episode_started_at.format(TIMESTAMP_FORMAT);
    let current = format_reading(candidate.reading);

    // a violation message counts itself
    let sent = candidate.notifications_sent.saturating_add(1);

    match (candidate.kind, rule.kind) {
        (CandidateKind::Violation, RuleKind::Min { value }) => format!(
            "At {since} {name} went below threshold of {value}. Current value is {current}. {sent} notifications sent."
        ),
        (CandidateKind::Violation, RuleKind::Max { value }) => format!(
            "At {since} {name} went above threshold of {value}. Current value is {current}. {sent} notifications sent."
        ),
        (CandidateKind::Violation, RuleKind::Equal { value }) => format!(
            "At {since} {name} is no longer equal to {value}. Current value is {current}. {sent} notifications sent."
        ),
        (CandidateKind::Violation, RuleKind::Missing) => {
            format!("{name} missing since {since}, {sent} notifications sent.")
        }
        (CandidateKind::Return, RuleKind::Missing) => format!(
            "{name} missing since {since} returned with value {current}, {} notifications sent.",
            candidate.notifications_sent
        ),
        (CandidateKind::Return, kind) => format!(
            "{name} outside {} threshold of {} since {since} is within threshold with value {current}, {} notifications sent.",
            kind.name(),
            kind.threshold().map(|t| t.to_string()).unwrap_or_default(),
            candidate.notifications_sent
        ),
    }
}

fn format_reading(reading: Option<f64>) -> String {
    match reading {
        Some(v) => v.to_string(),
        None => "unavailable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Binding;
    use chrono::TimeZone;

    fn candidate(kind: CandidateKind, reading: Option<f64>) -> Candidate {
        Candidate {
            rule: RuleId(3),
            kind,
            reading,
            episode: 1,
            episode_started_at: Utc.timestamp_opt(0, 0).unwrap(),
            notifications_sent: 2,
        }
    }

    #[test]
    fn test_violation_message() {
        let rule = RuleDefinition::new("outTemp", Binding::Loop, RuleKind::Min { value: 10.0 })
            .with_label("patio");
        let first = Candidate {
            notifications_sent: 0,
            ..candidate(CandidateKind::Violation, Some(5.0))
        };
        let req = NotificationRequest::build(&rule, &first, Utc::now());

        assert_eq!(req.title, "Unexpected value for patio.");
        assert_eq!(
            req.message,
            "At 1970-01-01 00:00:00 UTC outTemp (patio) went below threshold of 10. Current value is 5. 1 notifications sent."
        );

        let realert = Candidate {
            notifications_sent: 1,
            ..candidate(CandidateKind::Violation, Some(4.0))
        };
        let req = NotificationRequest::build(&rule, &realert, Utc::now());
        assert!(req.message.ends_with("Current value is 4. 2 notifications sent."));
    }

    #[test]
    fn test_missing_violation_message() {
        let rule = RuleDefinition::new("rain", Binding::Archive, RuleKind::Missing);
        let req = NotificationRequest::build(
            &rule,
            &candidate(CandidateKind::Violation, None),
            Utc::now(),
        );

        assert_eq!(
            req.message,
            "rain missing since 1970-01-01 00:00:00 UTC, 3 notifications sent."
        );
    }

    #[test]
    fn test_return_message_for_missing() {
        let rule = RuleDefinition::new("rain", Binding::Archive, RuleKind::Missing);
        let req = NotificationRequest::build(
            &rule,
            &candidate(CandidateKind::Return, Some(0.0)),
            Utc::now(),
        );

        assert_eq!(req.title, "Unexpected value for rain.");
        assert!(req.message.contains("returned with value 0"));
        assert!(req.message.contains("2 notifications sent"));
    }

    #[test]
    fn test_return_message_states_threshold() {
        let rule = RuleDefinition::new("outTemp", Binding::Loop, RuleKind::Max { value: 90.0 });
        let req = NotificationRequest::build(
            &rule,
            &candidate(CandidateKind::Return, None),
            Utc::now(),
        );

        assert!(req.message.contains("max threshold of 90"));
        assert!(req.message.contains("value unavailable"));
    }
}
