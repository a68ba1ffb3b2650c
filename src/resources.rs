//! Shapes the configured resources of an alarm into what is sent.

use std::collections::HashSet;

use crate::errors::ResourceError;
use crate::types::{AlarmDefinition, LabelRequirement, ResourceSpec};

/// Normalize the resources of an already validated alarm
///
/// Names are trimmed and blank names dropped. Scenario and unit names are
/// deduplicated in first-seen order; repeated labels are merged into the
/// first occurrence with their amounts added up.
pub fn resolve(alarm: &AlarmDefinition) -> Result<ResourceSpec, ResourceError> {
    let resolved = match &alarm.resources {
        ResourceSpec::AllUsers => ResourceSpec::AllUsers,
        ResourceSpec::Labels(labels) => ResourceSpec::Labels(merge_labels(labels)),
        ResourceSpec::Scenarios(names) => ResourceSpec::Scenarios(unique_names(names)),
        ResourceSpec::Units(names) => ResourceSpec::Units(unique_names(names)),
    };

    if resolved.is_empty() {
        return Err(ResourceError::Empty {
            kind: resolved.kind(),
        });
    }

    Ok(resolved)
}

fn merge_labels(labels: &[LabelRequirement]) -> Vec<LabelRequirement> {
    let mut merged: Vec<LabelRequirement> = Vec::with_capacity(labels.len());

    for label in labels {
        let name = label.name.trim();
        if name.is_empty() {
            continue;
        }

        match merged.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => existing.amount = existing.amount.saturating_add(label.amount),
            None => merged.push(LabelRequirement::new(name, label.amount.max(1))),
        }
    }

    merged
}

fn unique_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();

    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty() && seen.insert(*name))
        .map(str::to_string)
        .collect()
}
