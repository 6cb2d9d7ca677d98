use crate::{AlertRule, Outcome, RuleContext, Trigger};
use driftwatch_common::types::{RuleKind, Severity};

/// Informational record of an entity's first successful snapshot.
pub struct FirstObservationRule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
}

impl AlertRule for FirstObservationRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RuleKind {
        RuleKind::FirstObservation
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Outcome {
        if !ctx.diff.first_observation {
            return Outcome::Unknown;
        }
        let fields: Vec<&str> = ctx.current.fields().keys().map(String::as_str).collect();
        Outcome::Met(Trigger {
            message: format!(
                "Now tracking {}: first snapshot captured ({})",
                ctx.entity.name,
                fields.join(", ")
            ),
            ..Trigger::default()
        })
    }
}
