use crate::diff::percent_change;
use crate::{AlertRule, Outcome, RuleContext, Trigger};
use driftwatch_common::snapshot::FieldValue;
use driftwatch_common::types::{RuleKind, Severity, Signature};
use serde::{Deserialize, Serialize};

/// Absorbs float noise so that a configured 5% matches a computed 4.999...%.
const PERCENT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Any,
    Drop,
    Rise,
}

impl Direction {
    fn allows(&self, percent: f64) -> bool {
        match self {
            Direction::Any => true,
            Direction::Drop => percent < 0.0,
            Direction::Rise => percent > 0.0,
        }
    }
}

/// What the current value is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Baseline {
    /// The value in the previous snapshot.
    #[default]
    Previous,
    /// The highest value in the retained series.
    Peak,
    /// The lowest value in the retained series.
    Trough,
}

/// Fires when a numeric field moved by at least `percent` (inclusive)
/// relative to its baseline.
pub struct SignificantDeltaRule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub cooldown_secs: u64,
    pub field: String,
    pub percent: f64,
    pub direction: Direction,
    pub baseline: Baseline,
}

impl SignificantDeltaRule {
    fn baseline_value(&self, ctx: &RuleContext<'_>) -> Option<f64> {
        match self.baseline {
            Baseline::Previous => ctx.diff.scalar_deltas.get(&self.field).map(|d| d.previous),
            Baseline::Peak => ctx.history?.peak(&self.field),
            Baseline::Trough => ctx.history?.trough(&self.field),
        }
    }
}

impl AlertRule for SignificantDeltaRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RuleKind {
        RuleKind::SignificantDelta
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Outcome {
        let Some(current) = ctx.current.number(&self.field) else {
            return Outcome::Unknown;
        };
        let Some(base) = self.baseline_value(ctx) else {
            return Outcome::Unknown;
        };
        // zero baseline: percent change is undefined
        let Some(percent) = percent_change(base, current) else {
            return Outcome::Unknown;
        };

        if !self.direction.allows(percent) || percent.abs() + PERCENT_TOLERANCE < self.percent {
            return Outcome::Clear;
        }

        let verb = if percent < 0.0 { "dropped" } else { "rose" };
        let against = match self.baseline {
            Baseline::Previous => "",
            Baseline::Peak => " from its peak",
            Baseline::Trough => " from its low",
        };
        Outcome::Met(Trigger {
            field: Some(self.field.clone()),
            previous: Some(FieldValue::Number(base)),
            current: Some(FieldValue::Number(current)),
            message: format!(
                "{} {} {verb} {:.2}%{against}: {} -> {} (threshold {}%)",
                ctx.entity.name,
                self.field,
                percent.abs(),
                base,
                current,
                self.percent,
            ),
            signature: Some(Signature::Numeric(vec![base, current])),
            ..Trigger::default()
        })
    }
}
