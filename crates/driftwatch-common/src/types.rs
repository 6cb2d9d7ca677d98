use crate::snapshot::{ContentHash, FieldValue, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use driftwatch_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert_eq!(sev.to_string(), "warning");
/// assert!(Severity::Critical > Severity::Info);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// The kinds of alert rule the engine evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    ThresholdCrossing,
    SignificantDelta,
    StateTransition,
    StructuralChange,
    FirstObservation,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::ThresholdCrossing => "threshold_crossing",
            RuleKind::SignificantDelta => "significant_delta",
            RuleKind::StateTransition => "state_transition",
            RuleKind::StructuralChange => "structural_change",
            RuleKind::FirstObservation => "first_observation",
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked external resource.
///
/// `descriptor` is opaque to the engine and handed to the extractor as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub descriptor: serde_json::Value,
    /// Target value used by threshold rules that do not carry their own.
    #[serde(default)]
    pub target_value: Option<f64>,
    /// Numeric fields whose history is retained. Empty means every numeric field.
    #[serde(default)]
    pub tracked_fields: Vec<String>,
}

impl Entity {
    pub fn tracks(&self, field: &str) -> bool {
        self.tracked_fields.is_empty() || self.tracked_fields.iter().any(|f| f == field)
    }
}

/// A fired, de-duplicated alert ready for the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub entity_id: String,
    pub entity_name: String,
    pub rule_id: String,
    pub rule_name: String,
    pub kind: RuleKind,
    pub severity: Severity,
    /// The snapshot field the rule watched, if any.
    pub field: Option<String>,
    pub previous: Option<FieldValue>,
    pub current: Option<FieldValue>,
    /// Affected section headings for structural changes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Identity of the condition behind a repeatable alert, compared against
/// the last emitted one to suppress repeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Signature {
    /// Numeric components compared within an epsilon.
    Numeric(Vec<f64>),
    /// Exact-match digest.
    Digest(String),
}

/// Per (entity, rule) memory carried between cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleState {
    /// Whether the rule's condition held at the last evaluation where it
    /// could be decided. `None` until first decided.
    #[serde(default)]
    pub satisfied: Option<bool>,
    #[serde(default)]
    pub last_signature: Option<Signature>,
    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fire_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub value: f64,
    pub captured_at: DateTime<Utc>,
}

/// Everything the engine remembers about one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub entity_id: String,
    /// Latest accepted snapshot, verbatim.
    pub snapshot: Snapshot,
    pub snapshot_hash: ContentHash,
    /// Bounded, time-ordered scalar observations per numeric field.
    #[serde(default)]
    pub series: BTreeMap<String, VecDeque<SeriesPoint>>,
    #[serde(default)]
    pub rule_states: BTreeMap<String, RuleState>,
    pub first_seen_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    pub last_checked_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// A fresh record for an entity's first accepted snapshot.
    pub fn first(entity_id: impl Into<String>, snapshot: Snapshot) -> Self {
        let at = snapshot.captured_at;
        Self {
            entity_id: entity_id.into(),
            snapshot_hash: snapshot.content_hash(),
            snapshot,
            series: BTreeMap::new(),
            rule_states: BTreeMap::new(),
            first_seen_at: at,
            last_changed_at: at,
            last_checked_at: at,
        }
    }

    /// Appends a point to `field`'s series, evicting the oldest points once
    /// `cap` is exceeded.
    pub fn push_point(&mut self, field: &str, point: SeriesPoint, cap: usize) {
        let series = self.series.entry(field.to_string()).or_default();
        series.push_back(point);
        while series.len() > cap {
            series.pop_front();
        }
    }

    /// Records every tracked numeric field of the current snapshot.
    pub fn record_series(&mut self, entity: &Entity, cap: usize) {
        let at = self.snapshot.captured_at;
        let points: Vec<(String, f64)> = self
            .snapshot
            .fields()
            .iter()
            .filter(|(name, _)| entity.tracks(name))
            .filter_map(|(name, value)| value.as_number().map(|v| (name.clone(), v)))
            .collect();
        for (field, value) in points {
            self.push_point(
                &field,
                SeriesPoint {
                    value,
                    captured_at: at,
                },
                cap,
            );
        }
    }

    pub fn series(&self, field: &str) -> Option<&VecDeque<SeriesPoint>> {
        self.series.get(field)
    }

    /// Highest retained value of `field`.
    pub fn peak(&self, field: &str) -> Option<f64> {
        self.series(field)?
            .iter()
            .map(|p| p.value)
            .reduce(f64::max)
    }

    /// Lowest retained value of `field`.
    pub fn trough(&self, field: &str) -> Option<f64> {
        self.series(field)?
            .iter()
            .map(|p| p.value)
            .reduce(f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(tracked: &[&str]) -> Entity {
        Entity {
            id: "widget".into(),
            name: "Widget".into(),
            descriptor: json!({}),
            target_value: None,
            tracked_fields: tracked.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn series_evicts_oldest_past_cap() {
        let snap = Snapshot::from_json(json!({"price": 1}), Utc::now()).unwrap();
        let mut record = HistoryRecord::first("widget", snap);
        for i in 0..5 {
            record.push_point(
                "price",
                SeriesPoint {
                    value: i as f64,
                    captured_at: Utc::now(),
                },
                3,
            );
        }
        let values: Vec<f64> = record.series("price").unwrap().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(record.peak("price"), Some(4.0));
        assert_eq!(record.trough("price"), Some(2.0));
    }

    #[test]
    fn record_series_respects_tracked_fields() {
        let snap = Snapshot::from_json(json!({"price": 10, "rank": 3, "title": "x"}), Utc::now())
            .unwrap();
        let mut record = HistoryRecord::first("widget", snap.clone());
        record.record_series(&entity(&["price"]), 100);
        assert!(record.series("price").is_some());
        assert!(record.series("rank").is_none());

        let mut all = HistoryRecord::first("widget", snap);
        all.record_series(&entity(&[]), 100);
        assert!(all.series("rank").is_some());
        assert!(all.series("title").is_none());
    }

    #[test]
    fn rule_kind_display_matches_config_name() {
        assert_eq!(RuleKind::SignificantDelta.to_string(), "significant_delta");
        let encoded = serde_json::to_string(&RuleKind::ThresholdCrossing).unwrap();
        assert_eq!(encoded, format!("\"{}\"", RuleKind::ThresholdCrossing));
    }
}
