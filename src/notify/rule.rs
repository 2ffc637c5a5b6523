//! Rule definitions

use std::fmt;

use chrono::Duration;
use serde::Serialize;

use crate::observation::{Binding, ObservationBatch};

/// Index of a rule inside its [`RuleStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RuleId(pub usize);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule-{}", self.0)
    }
}

/// Condition a rule watches for
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuleKind {
    /// Fires while value < threshold
    Min { value: f64 },
    /// Fires while value > threshold
    Max { value: f64 },
    /// Fires while value != configured value
    Equal { value: f64 },
    /// Fires while the observation is absent from the batch
    Missing,
}

impl RuleKind {
    /// Configured threshold, `None` for `Missing`
    pub fn threshold(&self) -> Option<f64> {
        match self {
            RuleKind::Min { value } | RuleKind::Max { value } | RuleKind::Equal { value } => {
                Some(*value)
            }
            RuleKind::Missing => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Min { .. } => "min",
            RuleKind::Max { .. } => "max",
            RuleKind::Equal { .. } => "equal",
            RuleKind::Missing => "missing",
        }
    }

    /// Whether a reading (or its absence) violates this condition
    pub fn matches(&self, reading: Option<f64>) -> bool {
        match (self, reading) {
            (RuleKind::Missing, reading) => reading.is_none(),
            (_, None) => false,
            (RuleKind::Min { value }, Some(v)) => v < *value,
            (RuleKind::Max { value }, Some(v)) => v > *value,
            (RuleKind::Equal { value }, Some(v)) => v != *value,
        }
    }
}

/// One configured rule, immutable after startup
#[derive(Debug, Clone, Serialize)]
pub struct RuleDefinition {
    pub id: RuleId,
    /// Key looked up in each batch
    pub observation: String,
    /// Human-readable name used in messages
    pub name: String,
    pub label: Option<String>,
    pub binding: Binding,
    pub kind: RuleKind,
    /// Matching cycles needed before the first notification
    pub count_threshold: u32,
    /// Minimum time between repeated notifications in one episode
    #[serde(serialize_with = "serialize_secs")]
    pub wait_time: Duration,
    /// Notify when the condition clears after a notification was sent
    pub return_notification: bool,
}

impl RuleDefinition {
    pub fn new(observation: impl Into<String>, binding: Binding, kind: RuleKind) -> Self {
        let observation = observation.into();
        Self {
            id: RuleId(0),
            name: observation.clone(),
            observation,
            label: None,
            binding,
            kind,
            count_threshold: 10,
            wait_time: Duration::seconds(3600),
            return_notification: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count_threshold = count;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_return_notification(mut self, enabled: bool) -> Self {
        self.return_notification = enabled;
        self
    }

    /// Reading this rule looks at in `batch`
    pub fn reading(&self, batch: &ObservationBatch) -> Option<f64> {
        batch.get(&self.observation)
    }

    /// Label if set, otherwise the name
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

fn serialize_secs<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_i64(duration.num_seconds())
}

/// Immutable set of rules built once from configuration
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    rules: Vec<RuleDefinition>,
}

impl RuleStore {
    /// Build a store, assigning ids by position
    pub fn new(rules: Vec<RuleDefinition>) -> Self {
        let rules = rules
            .into_iter()
            .enumerate()
            .map(|(i, mut rule)| {
                rule.id = RuleId(i);
                rule
            })
            .collect();
        Self { rules }
    }

    pub fn get(&self, id: RuleId) -> Option<&RuleDefinition> {
        self.rules.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter()
    }

    /// Rules observing the given stream
    pub fn for_binding(&self, binding: Binding) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter().filter(move |r| r.binding == binding)
    }

    pub fn has_binding(&self, binding: Binding) -> bool {
        self.for_binding(binding).next().is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches() {
        let min = RuleKind::Min { value: 10.0 };
        assert!(min.matches(Some(5.0)));
        assert!(!min.matches(Some(10.0)));
        assert!(!min.matches(None));

        let max = RuleKind::Max { value: 10.0 };
        assert!(max.matches(Some(10.5)));
        assert!(!max.matches(Some(10.0)));

        let equal = RuleKind::Equal { value: 1.0 };
        assert!(equal.matches(Some(0.0)));
        assert!(!equal.matches(Some(1.0)));
        assert!(!equal.matches(None));
    }

    #[test]
    fn test_missing_matches_absence_only() {
        let missing = RuleKind::Missing;
        assert!(missing.matches(None));
        assert!(!missing.matches(Some(0.0)));
        assert_eq!(missing.threshold(), None);
    }

    #[test]
    fn test_store_assigns_ids_and_filters() {
        let store = RuleStore::new(vec![
            RuleDefinition::new("outTemp", Binding::Loop, RuleKind::Max { value: 100.0 }),
            RuleDefinition::new("rain", Binding::Archive, RuleKind::Missing),
            RuleDefinition::new("inTemp", Binding::Loop, RuleKind::Min { value: 40.0 }),
        ]);

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(RuleId(2)).unwrap().observation, "inTemp");

        let loop_rules: Vec<_> = store.for_binding(Binding::Loop).map(|r| r.id).collect();
        assert_eq!(loop_rules, vec![RuleId(0), RuleId(2)]);
        assert!(store.has_binding(Binding::Archive));
    }

    #[test]
    fn test_display_name_prefers_label() {
        let rule = RuleDefinition::new("extraTemp1", Binding::Loop, RuleKind::Missing)
            .with_name("Pool")
            .with_label("pool sensor");
        assert_eq!(rule.display_name(), "pool sensor");
    }
}
