//! Resolution of the nested rule tree into rule definitions

use super::{secs, BindingSection, ConfigError, KindOverrides, ObservationSection, Settings};
use crate::notify::{RuleDefinition, RuleKind, RuleStore};
use crate::observation::Binding;

/// Defaults in effect for one binding section
struct Defaults {
    count: u32,
    wait_time: u64,
    return_notification: bool,
}

/// Build the rule store, cascading defaults global → binding → rule
pub fn build_rule_store(settings: &Settings) -> Result<RuleStore, ConfigError> {
    let mut rules = Vec::new();

    for (binding, section) in [
        (Binding::Loop, &settings.loop_rules),
        (Binding::Archive, &settings.archive_rules),
    ] {
        let Some(section) = section else {
            continue;
        };
        resolve_binding(settings, binding, section, &mut rules)?;
    }

    for rule in &rules {
        tracing::info!(
            binding = %rule.binding,
            observation = %rule.observation,
            kind = rule.kind.name(),
            threshold = ?rule.kind.threshold(),
            count = rule.count_threshold,
            wait_time = rule.wait_time.num_seconds(),
            return_notification = rule.return_notification,
            "Monitoring"
        );
    }

    Ok(RuleStore::new(rules))
}

fn resolve_binding(
    settings: &Settings,
    binding: Binding,
    section: &BindingSection,
    rules: &mut Vec<RuleDefinition>,
) -> Result<(), ConfigError> {
    let defaults = Defaults {
        count: settings.count,
        wait_time: section.wait_time.unwrap_or(settings.wait_time),
        return_notification: section
            .return_notification
            .unwrap_or(settings.return_notification),
    };

    for (key, observation) in &section.observations {
        let before = rules.len();
        resolve_observation(binding, key, observation, &defaults, rules)?;
        if rules.len() == before {
            tracing::warn!(
                binding = %binding,
                section = %key,
                "Observation section has no min, max, equal or missing rule"
            );
        }
    }

    Ok(())
}

fn resolve_observation(
    binding: Binding,
    key: &str,
    section: &ObservationSection,
    defaults: &Defaults,
    rules: &mut Vec<RuleDefinition>,
) -> Result<(), ConfigError> {
    let observation = section.observation.as_deref().unwrap_or(key).trim();
    if observation.is_empty() {
        return Err(invalid(binding, key, "observation", "observation name is empty"));
    }

    let kinds = [
        section.min.as_ref().map(|t| (RuleKind::Min { value: t.value }, &t.overrides)),
        section.max.as_ref().map(|t| (RuleKind::Max { value: t.value }, &t.overrides)),
        section
            .equal
            .as_ref()
            .map(|t| (RuleKind::Equal { value: t.value }, &t.overrides)),
        section.missing.as_ref().map(|o| (RuleKind::Missing, o)),
    ];

    for (kind, overrides) in kinds.into_iter().flatten() {
        rules.push(resolve_rule(
            binding,
            key,
            observation,
            section,
            kind,
            overrides,
            defaults,
        )?);
    }

    Ok(())
}

fn resolve_rule(
    binding: Binding,
    key: &str,
    observation: &str,
    section: &ObservationSection,
    kind: RuleKind,
    overrides: &KindOverrides,
    defaults: &Defaults,
) -> Result<RuleDefinition, ConfigError> {
    if kind.threshold().is_some_and(|v| !v.is_finite()) {
        return Err(invalid(binding, key, kind.name(), "value must be a finite number"));
    }

    let count = overrides.count.unwrap_or(defaults.count);
    if count == 0 {
        return Err(invalid(binding, key, kind.name(), "count must be at least 1"));
    }

    let wait_time = secs("wait_time", overrides.wait_time.unwrap_or(defaults.wait_time))
        .map_err(|e| invalid(binding, key, kind.name(), &e.to_string()))?;

    let mut rule = RuleDefinition::new(observation, binding, kind)
        .with_name(section.name.as_deref().unwrap_or(key))
        .with_count(count)
        .with_wait_time(wait_time)
        .with_return_notification(
            overrides
                .return_notification
                .unwrap_or(defaults.return_notification),
        );

    if let Some(label) = section.label.as_deref().filter(|l| !l.is_empty()) {
        rule = rule.with_label(label);
    }

    Ok(rule)
}

fn invalid(binding: Binding, section: &str, kind: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidRule {
        binding: binding.to_string(),
        section: section.to_string(),
        kind: kind.to_string(),
        reason: reason.to_string(),
    }
}
