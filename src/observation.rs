//! Observation batches delivered by the host

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which reading stream a batch (and a rule) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Binding {
    /// Real-time packets
    Loop,
    /// Periodic archive records
    Archive,
}

impl Binding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Binding::Loop => "loop",
            Binding::Archive => "archive",
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cycle's readings. A name that is absent was not reported this cycle.
#[derive(Debug, Clone)]
pub struct ObservationBatch {
    pub binding: Binding,
    /// When the station took the readings. Reported in logs only; rule
    /// timing always follows the engine clock.
    pub timestamp: DateTime<Utc>,
    values: HashMap<String, f64>,
}

impl ObservationBatch {
    pub fn new(binding: Binding, timestamp: DateTime<Utc>) -> Self {
        Self {
            binding,
            timestamp,
            values: HashMap::new(),
        }
    }

    /// Add a reading (builder style)
    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Reading for `name`, `None` when it was not reported
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build a batch from a JSON object, keeping numeric fields only.
    ///
    /// `null` and non-numeric values are dropped, so they count as missing.
    pub fn from_json(
        binding: Binding,
        timestamp: DateTime<Utc>,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut batch = Self::new(binding, timestamp);
        for (name, value) in fields {
            match value.as_f64() {
                Some(v) if v.is_finite() => batch.insert(name.clone(), v),
                _ => {
                    tracing::debug!(observation = %name, "Dropping non-numeric reading");
                }
            }
        }
        batch
    }
}
