use crate::dedup::{dedup_mode, AlertDeduper, DedupMode};
use crate::diff::DiffResult;
use crate::{AlertRule, Outcome, RuleContext};
use chrono::{DateTime, Duration, Utc};
use driftwatch_common::types::{Alert, RuleKind, RuleState};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Largest cooldown a rule may declare; longer windows overflow the
/// millisecond range of a timestamp difference.
pub const MAX_COOLDOWN_SECS: u64 = (i64::MAX / 1000) as u64;

/// Rule evaluator for one entity's changed snapshot.
///
/// The engine holds no per-entity state of its own: rule memory is read
/// from and written to the `states` map the caller passes in, which the
/// orchestrator persists together with the entity's snapshot.
pub struct AlertEngine {
    deduper: AlertDeduper,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(AlertDeduper::default())
    }
}

impl AlertEngine {
    pub fn new(deduper: AlertDeduper) -> Self {
        Self { deduper }
    }

    /// Evaluates `rules` in declaration order and returns the alerts that
    /// survive de-duplication, in the same order.
    ///
    /// On a first observation every rule records its state but only
    /// first-observation rules may fire. A transition rule with no
    /// remembered state (added after the entity was first seen) takes its
    /// prior satisfaction from the previous snapshot.
    pub fn evaluate(
        &self,
        rules: &[Arc<dyn AlertRule>],
        ctx: &RuleContext<'_>,
        states: &mut BTreeMap<String, RuleState>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for rule in rules {
            let rule_id = rule.id();
            let outcome = rule.evaluate(ctx);
            let state = states.entry(rule_id.to_string()).or_default();
            if state.satisfied.is_none() && dedup_mode(rule.kind()) == DedupMode::Transition {
                state.satisfied = prior_satisfaction(rule.as_ref(), ctx);
            }

            let trigger = match outcome {
                Outcome::Unknown => continue,
                Outcome::Clear => {
                    state.satisfied = Some(false);
                    state.last_signature = None;
                    continue;
                }
                Outcome::Met(trigger) => trigger,
            };

            let was_satisfied = state.satisfied.replace(true);

            if ctx.diff.first_observation && rule.kind() != RuleKind::FirstObservation {
                continue;
            }

            if !self.deduper.should_emit(
                rule.kind(),
                was_satisfied,
                state,
                trigger.signature.as_ref(),
            ) {
                tracing::debug!(
                    rule_id,
                    entity_id = %ctx.entity.id,
                    "Alert suppressed (duplicate condition)"
                );
                continue;
            }

            let cooldown = i64::try_from(rule.cooldown_secs())
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX);
            let cooling = state
                .last_fired_at
                .is_some_and(|last| now.signed_duration_since(last) < cooldown);
            if cooling {
                tracing::debug!(
                    rule_id,
                    entity_id = %ctx.entity.id,
                    "Alert suppressed (cooldown period)"
                );
                continue;
            }

            state.last_signature = trigger.signature.clone();
            state.last_fired_at = Some(now);
            state.fire_count += 1;

            alerts.push(Alert {
                id: driftwatch_common::id::next_id(),
                entity_id: ctx.entity.id.clone(),
                entity_name: ctx.entity.name.clone(),
                rule_id: rule_id.to_string(),
                rule_name: rule.name().to_string(),
                kind: rule.kind(),
                severity: rule.severity(),
                field: trigger.field,
                previous: trigger.previous,
                current: trigger.current,
                sections: trigger.sections,
                message: trigger.message,
                timestamp: now,
            });
        }

        alerts
    }
}

/// Re-evaluates `rule` against the previous snapshot alone.
fn prior_satisfaction(rule: &dyn AlertRule, ctx: &RuleContext<'_>) -> Option<bool> {
    let previous = ctx.previous?;
    let unchanged = DiffResult::unchanged();
    let replay = RuleContext {
        entity: ctx.entity,
        diff: &unchanged,
        previous: None,
        current: previous,
        history: None,
    };
    match rule.evaluate(&replay) {
        Outcome::Unknown => None,
        Outcome::Clear => Some(false),
        Outcome::Met(_) => Some(true),
    }
}

/// Glob match of an entity id against a rule's entity pattern.
pub fn entity_matches(pattern: &str, entity_id: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    glob_match::glob_match(pattern, entity_id)
}
