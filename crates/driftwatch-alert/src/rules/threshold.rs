use crate::{AlertRule, Outcome, RuleContext, Trigger};
use driftwatch_common::snapshot::FieldValue;
use driftwatch_common::types::{RuleKind, Severity};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greater_than" | "gt" => Ok(Self::GreaterThan),
            "less_than" | "lt" => Ok(Self::LessThan),
            "greater_equal" | "gte" => Ok(Self::GreaterEqual),
            "less_equal" | "lte" => Ok(Self::LessEqual),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl CompareOp {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::GreaterThan => "above",
            Self::LessThan => "below",
            Self::GreaterEqual => "at or above",
            Self::LessEqual => "at or below",
        }
    }
}

/// Fires when a numeric field moves into the configured region
/// (e.g. `price <= target`) after having been outside it.
pub struct ThresholdRule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub cooldown_secs: u64,
    pub field: String,
    pub operator: CompareOp,
    /// Boundary; falls back to the entity's target value when unset.
    pub value: Option<f64>,
}

impl AlertRule for ThresholdRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RuleKind {
        RuleKind::ThresholdCrossing
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Outcome {
        let Some(boundary) = self.value.or(ctx.entity.target_value) else {
            return Outcome::Unknown;
        };
        let Some(current) = ctx.current.number(&self.field) else {
            return Outcome::Unknown;
        };

        if !self.operator.check(current, boundary) {
            return Outcome::Clear;
        }

        let previous = ctx.previous.and_then(|p| p.number(&self.field));
        Outcome::Met(Trigger {
            field: Some(self.field.clone()),
            previous: previous.map(FieldValue::Number),
            current: Some(FieldValue::Number(current)),
            message: format!(
                "{} {} is now {} ({} {}), was {}",
                ctx.entity.name,
                self.field,
                current,
                self.operator.describe(),
                boundary,
                super::fmt_value(previous),
            ),
            ..Trigger::default()
        })
    }
}
