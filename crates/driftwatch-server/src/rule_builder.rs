use anyhow::{anyhow, bail, Result};
use driftwatch_alert::engine::{entity_matches, MAX_COOLDOWN_SECS};
use driftwatch_alert::rules::first_observation::FirstObservationRule;
use driftwatch_alert::rules::significant_delta::{Baseline, Direction, SignificantDeltaRule};
use driftwatch_alert::rules::state_transition::StateTransitionRule;
use driftwatch_alert::rules::structural_change::StructuralChangeRule;
use driftwatch_alert::rules::threshold::{CompareOp, ThresholdRule};
use driftwatch_alert::AlertRule;
use driftwatch_common::types::{Entity, RuleKind, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

// ---- Per-rule-type config schemas ----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSpec {
    ThresholdCrossing {
        field: String,
        operator: String,
        #[serde(default)]
        value: Option<f64>,
    },
    SignificantDelta {
        field: String,
        #[serde(default = "default_percent")]
        percent: f64,
        #[serde(default)]
        direction: Direction,
        #[serde(default)]
        baseline: Baseline,
    },
    StateTransition {
        field: String,
        #[serde(default = "default_to")]
        to: bool,
    },
    StructuralChange {
        #[serde(default)]
        headings: Option<Vec<String>>,
    },
    FirstObservation {},
}

fn default_percent() -> f64 {
    5.0
}

fn default_to() -> bool {
    true
}

impl RuleSpec {
    pub fn kind(&self) -> RuleKind {
        match self {
            RuleSpec::ThresholdCrossing { .. } => RuleKind::ThresholdCrossing,
            RuleSpec::SignificantDelta { .. } => RuleKind::SignificantDelta,
            RuleSpec::StateTransition { .. } => RuleKind::StateTransition,
            RuleSpec::StructuralChange { .. } => RuleKind::StructuralChange,
            RuleSpec::FirstObservation {} => RuleKind::FirstObservation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(flatten)]
    pub spec: RuleSpec,
}

/// A rule attached to every entity whose id matches `entity_pattern`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRuleConfig {
    #[serde(default = "default_entity_pattern")]
    pub entity_pattern: String,
    #[serde(flatten)]
    pub rule: RuleConfig,
}

fn default_entity_pattern() -> String {
    "*".to_string()
}

// ---- Config -> AlertRule trait object ----

/// Converts one rule config into a trait object for `entity`.
///
/// `index` is the rule's position in the entity's rule list and names rules
/// declared without an id.
pub fn build_rule(entity: &Entity, cfg: &RuleConfig, index: usize) -> Result<Arc<dyn AlertRule>> {
    let kind = cfg.spec.kind();
    let id = match &cfg.id {
        Some(id) if id.trim().is_empty() => bail!("rule id must not be empty"),
        Some(id) => id.clone(),
        None => format!("{kind}-{index}"),
    };
    let name = cfg.name.clone().unwrap_or_else(|| id.clone());
    let severity = cfg.severity.unwrap_or(match kind {
        RuleKind::FirstObservation => Severity::Info,
        _ => Severity::Warning,
    });
    let cooldown_secs = cfg.cooldown_secs;
    if cooldown_secs > MAX_COOLDOWN_SECS {
        bail!("rule '{id}': cooldown_secs must not exceed {MAX_COOLDOWN_SECS}");
    }

    let rule: Arc<dyn AlertRule> = match &cfg.spec {
        RuleSpec::ThresholdCrossing {
            field,
            operator,
            value,
        } => {
            let operator: CompareOp = operator
                .parse()
                .map_err(|e: String| anyhow!("rule '{id}': {e}"))?;
            if value.is_none() && entity.target_value.is_none() {
                bail!("rule '{id}': threshold needs a value or the entity's target_value");
            }
            Arc::new(ThresholdRule {
                id,
                name,
                severity,
                cooldown_secs,
                field: field.clone(),
                operator,
                value: *value,
            })
        }
        RuleSpec::SignificantDelta {
            field,
            percent,
            direction,
            baseline,
        } => {
            if !percent.is_finite() || *percent <= 0.0 {
                bail!("rule '{id}': percent must be a positive number");
            }
            if matches!(baseline, Baseline::Peak | Baseline::Trough) && !entity.tracks(field) {
                bail!("rule '{id}': a {baseline:?} baseline needs '{field}' in tracked_fields");
            }
            Arc::new(SignificantDeltaRule {
                id,
                name,
                severity,
                cooldown_secs,
                field: field.clone(),
                percent: *percent,
                direction: *direction,
                baseline: *baseline,
            })
        }
        RuleSpec::StateTransition { field, to } => Arc::new(StateTransitionRule {
            id,
            name,
            severity,
            cooldown_secs,
            field: field.clone(),
            to: *to,
        }),
        RuleSpec::StructuralChange { headings } => Arc::new(StructuralChangeRule {
            id,
            name,
            severity,
            cooldown_secs,
            headings: headings.clone(),
        }),
        RuleSpec::FirstObservation {} => Arc::new(FirstObservationRule { id, name, severity }),
    };
    Ok(rule)
}

/// Builds the entity's own rules followed by every global rule whose
/// pattern matches it. Rule ids must be unique within the entity.
pub fn build_entity_rules(
    entity: &Entity,
    own: &[RuleConfig],
    globals: &[GlobalRuleConfig],
) -> Result<Vec<Arc<dyn AlertRule>>> {
    let applicable = own.iter().chain(
        globals
            .iter()
            .filter(|g| entity_matches(&g.entity_pattern, &entity.id))
            .map(|g| &g.rule),
    );

    let mut rules = Vec::new();
    let mut ids = HashSet::new();
    for (index, cfg) in applicable.enumerate() {
        let rule = build_rule(entity, cfg, index)?;
        if !ids.insert(rule.id().to_string()) {
            bail!("duplicate rule id '{}'", rule.id());
        }
        rules.push(rule);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(id: &str, target: Option<f64>) -> Entity {
        Entity {
            id: id.into(),
            name: id.into(),
            descriptor: json!({}),
            target_value: target,
            tracked_fields: Vec::new(),
        }
    }

    fn rule(spec: RuleSpec) -> RuleConfig {
        RuleConfig {
            id: None,
            name: None,
            severity: None,
            cooldown_secs: 0,
            spec,
        }
    }

    #[test]
    fn default_ids_and_severities() {
        let e = entity("laptop", Some(300.0));
        let rules = build_entity_rules(
            &e,
            &[
                rule(RuleSpec::ThresholdCrossing {
                    field: "price".into(),
                    operator: "lte".into(),
                    value: None,
                }),
                rule(RuleSpec::FirstObservation {}),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(rules[0].id(), "threshold_crossing-0");
        assert_eq!(rules[0].severity(), Severity::Warning);
        assert_eq!(rules[1].id(), "first_observation-1");
        assert_eq!(rules[1].severity(), Severity::Info);
    }

    #[test]
    fn globals_follow_pattern() {
        let global = GlobalRuleConfig {
            entity_pattern: "laptop-*".into(),
            rule: rule(RuleSpec::StructuralChange { headings: None }),
        };
        let matched =
            build_entity_rules(&entity("laptop-x1", None), &[], std::slice::from_ref(&global))
                .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].kind(), RuleKind::StructuralChange);

        let skipped = build_entity_rules(&entity("phone-p7", None), &[], &[global]).unwrap();
        assert!(skipped.is_empty());
    }

    #[test]
    fn rejects_invalid_rules() {
        let e = entity("laptop", None);
        let no_target = rule(RuleSpec::ThresholdCrossing {
            field: "price".into(),
            operator: "lte".into(),
            value: None,
        });
        assert!(build_rule(&e, &no_target, 0).is_err());

        let bad_op = rule(RuleSpec::ThresholdCrossing {
            field: "price".into(),
            operator: "roughly".into(),
            value: Some(1.0),
        });
        let err = build_rule(&e, &bad_op, 0).err().unwrap();
        assert!(err.to_string().contains("unknown compare operator"));

        let zero_percent = rule(RuleSpec::SignificantDelta {
            field: "price".into(),
            percent: 0.0,
            direction: Direction::Any,
            baseline: Baseline::Previous,
        });
        assert!(build_rule(&e, &zero_percent, 0).is_err());
    }

    #[test]
    fn rejects_cooldown_beyond_timestamp_range() {
        let e = entity("laptop", None);
        let mut cfg = rule(RuleSpec::StructuralChange { headings: None });

        cfg.cooldown_secs = MAX_COOLDOWN_SECS;
        assert!(build_rule(&e, &cfg, 0).is_ok());

        cfg.cooldown_secs = u64::MAX / 2;
        let err = build_rule(&e, &cfg, 0).err().unwrap();
        assert!(err.to_string().contains("cooldown_secs"), "{err}");
    }

    #[test]
    fn history_baseline_needs_tracked_field() {
        let peak = |field: &str| {
            rule(RuleSpec::SignificantDelta {
                field: field.into(),
                percent: 5.0,
                direction: Direction::Drop,
                baseline: Baseline::Peak,
            })
        };
        let mut e = entity("laptop", None);
        e.tracked_fields = vec!["price".into()];

        assert!(build_rule(&e, &peak("price"), 0).is_ok());
        let err = build_rule(&e, &peak("rank"), 0).err().unwrap();
        assert!(err.to_string().contains("tracked_fields"), "{err}");

        // an unset list tracks every numeric field
        assert!(build_rule(&entity("laptop", None), &peak("rank"), 0).is_ok());

        let mut previous = peak("rank");
        if let RuleSpec::SignificantDelta { baseline, .. } = &mut previous.spec {
            *baseline = Baseline::Previous;
        }
        assert!(build_rule(&e, &previous, 0).is_ok());
    }

    #[test]
    fn rejects_duplicate_rule_ids() {
        let mut a = rule(RuleSpec::FirstObservation {});
        a.id = Some("same".into());
        let mut b = rule(RuleSpec::StructuralChange { headings: None });
        b.id = Some("same".into());
        let err = build_entity_rules(&entity("x", None), &[a, b], &[])
            .err()
            .unwrap();
        assert!(err.to_string().contains("duplicate rule id"));
    }

    #[test]
    fn parses_flattened_toml() {
        #[derive(Deserialize)]
        struct Doc {
            rules: Vec<GlobalRuleConfig>,
        }
        let doc: Doc = toml::from_str(
            r#"
[[rules]]
kind = "significant_delta"
field = "price"
cooldown_secs = 3600

[[rules]]
kind = "state_transition"
entity_pattern = "shop-*"
field = "in_stock"
"#,
        )
        .unwrap();
        assert_eq!(doc.rules[0].entity_pattern, "*");
        assert_eq!(doc.rules[0].rule.cooldown_secs, 3600);
        match &doc.rules[0].rule.spec {
            RuleSpec::SignificantDelta {
                percent, direction, ..
            } => {
                assert_eq!(*percent, 5.0);
                assert_eq!(*direction, Direction::Any);
            }
            other => panic!("unexpected spec: {other:?}"),
        }
        match &doc.rules[1].rule.spec {
            RuleSpec::StateTransition { to, .. } => assert!(*to),
            other => panic!("unexpected spec: {other:?}"),
        }
    }
}
