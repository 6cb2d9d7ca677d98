use crate::{AlertRule, Outcome, RuleContext, Trigger};
use driftwatch_common::snapshot::FieldValue;
use driftwatch_common::types::{RuleKind, Severity};

/// Fires when a boolean field flips into `to` (e.g. `in_stock` becoming true).
pub struct StateTransitionRule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub cooldown_secs: u64,
    pub field: String,
    pub to: bool,
}

impl AlertRule for StateTransitionRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RuleKind {
        RuleKind::StateTransition
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Outcome {
        let Some(current) = ctx.current.boolean(&self.field) else {
            return Outcome::Unknown;
        };
        if current != self.to {
            return Outcome::Clear;
        }

        let previous = ctx.previous.and_then(|p| p.boolean(&self.field));
        Outcome::Met(Trigger {
            field: Some(self.field.clone()),
            previous: previous.map(FieldValue::Bool),
            current: Some(FieldValue::Bool(current)),
            message: format!(
                "{} {} changed from {} to {}",
                ctx.entity.name,
                self.field,
                !self.to,
                self.to
            ),
            ..Trigger::default()
        })
    }
}
