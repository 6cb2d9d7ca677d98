use driftwatch_common::snapshot::{FieldValue, Snapshot};
use serde::Serialize;
use std::collections::BTreeMap;

/// Numeric change of one field between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScalarDelta {
    pub previous: f64,
    pub current: f64,
    pub absolute_change: f64,
    /// `None` when `previous` is zero.
    pub percent_change: Option<f64>,
}

impl ScalarDelta {
    pub fn new(previous: f64, current: f64) -> Self {
        Self {
            previous,
            current,
            absolute_change: current - previous,
            percent_change: percent_change(previous, current),
        }
    }
}

/// `(current - previous) / previous * 100`, undefined for a zero baseline.
///
/// Multiplying before dividing keeps round-number cases exact
/// (100 -> 95 is exactly -5.0).
pub fn percent_change(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    Some((current - previous) * 100.0 / previous)
}

/// Structural and numeric delta between two snapshots of one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffResult {
    /// No previous snapshot existed; every other field is empty.
    pub first_observation: bool,
    pub hash_changed: bool,
    pub scalar_deltas: BTreeMap<String, ScalarDelta>,
    pub new_sections: Vec<String>,
    pub removed_sections: Vec<String>,
    pub modified_sections: Vec<String>,
    /// Non-section fields that were added, removed or changed value.
    pub changed_fields: Vec<String>,
}

impl DiffResult {
    pub fn first_observation() -> Self {
        Self {
            first_observation: true,
            ..Self::default()
        }
    }

    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn has_section_changes(&self) -> bool {
        !(self.new_sections.is_empty()
            && self.removed_sections.is_empty()
            && self.modified_sections.is_empty())
    }
}

/// Computes the delta from `previous` to `current`.
///
/// Equal content hashes short-circuit to an empty, unchanged result. A
/// missing `previous` yields the distinguished first-observation result
/// rather than a diff against zero values.
pub fn diff(previous: Option<&Snapshot>, current: &Snapshot) -> DiffResult {
    let Some(previous) = previous else {
        return DiffResult::first_observation();
    };

    if previous.content_hash() == current.content_hash() {
        return DiffResult::unchanged();
    }

    let mut result = DiffResult {
        hash_changed: true,
        ..DiffResult::default()
    };

    let before = previous.sections();
    let after = current.sections();
    for (heading, text) in &after {
        match before.get(heading) {
            None => result.new_sections.push(heading.clone()),
            Some(old) if old != text => result.modified_sections.push(heading.clone()),
            Some(_) => {}
        }
    }
    result.removed_sections = before
        .keys()
        .filter(|h| !after.contains_key(*h))
        .cloned()
        .collect();

    for (name, value) in current.fields() {
        if matches!(value, FieldValue::Sections(_)) {
            continue;
        }
        let old = previous.get(name);
        if let (Some(p), Some(c)) = (old.and_then(FieldValue::as_number), value.as_number()) {
            result.scalar_deltas.insert(name.clone(), ScalarDelta::new(p, c));
        }
        if old != Some(value) {
            result.changed_fields.push(name.clone());
        }
    }
    for (name, value) in previous.fields() {
        if !matches!(value, FieldValue::Sections(_)) && current.get(name).is_none() {
            result.changed_fields.push(name.clone());
        }
    }
    result.changed_fields.sort();

    result
}
