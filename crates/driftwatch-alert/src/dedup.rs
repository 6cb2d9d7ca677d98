use driftwatch_common::types::{RuleKind, RuleState, Signature};

/// Default tolerance for comparing numeric signatures.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// How repeated satisfaction of a rule's condition is de-duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Emit only when the condition goes from not-held to held.
    Transition,
    /// Emit while the condition holds, unless its signature matches the
    /// last emitted one.
    Signature,
    /// Emit at most once per entity.
    Once,
}

pub fn dedup_mode(kind: RuleKind) -> DedupMode {
    match kind {
        RuleKind::ThresholdCrossing | RuleKind::StateTransition => DedupMode::Transition,
        RuleKind::SignificantDelta | RuleKind::StructuralChange => DedupMode::Signature,
        RuleKind::FirstObservation => DedupMode::Once,
    }
}

/// Decides whether a satisfied rule condition becomes an alert.
#[derive(Debug, Clone, Copy)]
pub struct AlertDeduper {
    epsilon: f64,
}

impl Default for AlertDeduper {
    fn default() -> Self {
        Self::new(DEFAULT_EPSILON)
    }
}

impl AlertDeduper {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon: epsilon.abs(),
        }
    }

    /// `was_satisfied` is the rule's remembered satisfaction before this
    /// cycle; `state` still holds the last emitted signature and fire count.
    pub fn should_emit(
        &self,
        kind: RuleKind,
        was_satisfied: Option<bool>,
        state: &RuleState,
        signature: Option<&Signature>,
    ) -> bool {
        match dedup_mode(kind) {
            // an unknown prior state is not a transition
            DedupMode::Transition => was_satisfied == Some(false),
            DedupMode::Signature => match (state.last_signature.as_ref(), signature) {
                (Some(last), Some(candidate)) => !self.same_signature(last, candidate),
                _ => true,
            },
            DedupMode::Once => state.fire_count == 0,
        }
    }

    pub fn same_signature(&self, a: &Signature, b: &Signature) -> bool {
        match (a, b) {
            (Signature::Numeric(x), Signature::Numeric(y)) => {
                x.len() == y.len()
                    && x.iter().zip(y).all(|(p, q)| (p - q).abs() <= self.epsilon)
            }
            (Signature::Digest(x), Signature::Digest(y)) => x == y,
            _ => false,
        }
    }
}
