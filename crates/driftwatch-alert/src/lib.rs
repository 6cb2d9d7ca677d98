//! Change detection and alert rule evaluation.
//!
//! [`diff`] computes the delta between an entity's previous and current
//! snapshot. Registered [`AlertRule`]s turn that delta, the snapshots and
//! the entity's history into an [`Outcome`], and the
//! [`engine::AlertEngine`] applies each rule's transition or signature
//! de-duplication before producing [`Alert`]s.
//!
//! [`Alert`]: driftwatch_common::types::Alert

pub mod dedup;
pub mod diff;
pub mod engine;
pub mod rules;


use diff::DiffResult;
use driftwatch_common::snapshot::{FieldValue, Snapshot};
use driftwatch_common::types::{Entity, HistoryRecord, RuleKind, Severity, Signature};

/// Everything a rule may look at for one entity in one cycle.
pub struct RuleContext<'a> {
    pub entity: &'a Entity,
    pub diff: &'a DiffResult,
    pub previous: Option<&'a Snapshot>,
    pub current: &'a Snapshot,
    /// The entity's history as of the previous cycle.
    pub history: Option<&'a HistoryRecord>,
}

/// Result of evaluating a rule's condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The condition cannot be decided this cycle (e.g. the watched field
    /// is missing); the rule's remembered state is left alone.
    Unknown,
    /// The condition does not hold.
    Clear,
    /// The condition holds.
    Met(Trigger),
}

/// Details of a satisfied condition, turned into an alert if it survives
/// de-duplication.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trigger {
    pub field: Option<String>,
    pub previous: Option<FieldValue>,
    pub current: Option<FieldValue>,
    pub sections: Vec<String>,
    pub message: String,
    /// Identity of the condition for rules that may hold across cycles.
    pub signature: Option<Signature>,
}

/// An alert rule evaluated against each changed snapshot of the entities
/// it is attached to.
///
/// Rules are stateless; whatever must be remembered between cycles lives
/// in the entity's [`driftwatch_common::types::RuleState`], managed by the
/// engine.
pub trait AlertRule: Send + Sync {
    /// Unique identifier within an entity (e.g., `"price-target"`).
    fn id(&self) -> &str;

    /// Human-readable rule name.
    fn name(&self) -> &str;

    fn kind(&self) -> RuleKind;

    fn severity(&self) -> Severity;

    /// Minimum seconds between consecutive alerts for the same entity/rule pair.
    fn cooldown_secs(&self) -> u64 {
        0
    }

    /// Decides whether the rule's condition holds for this cycle.
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Outcome;
}
