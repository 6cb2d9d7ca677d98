use crate::{AlertRule, Outcome, RuleContext, Trigger};
use driftwatch_common::types::{RuleKind, Severity, Signature};
use sha2::{Digest, Sha256};

/// Fires when sections appear, disappear or change text.
///
/// The signature covers the affected headings and their current text, so
/// a repeat of an already reported change is suppressed while a further
/// edit of the same section is reported again.
pub struct StructuralChangeRule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub cooldown_secs: u64,
    /// Only these headings are watched when set.
    pub headings: Option<Vec<String>>,
}

impl StructuralChangeRule {
    fn watches(&self, heading: &str) -> bool {
        match &self.headings {
            Some(list) => list.iter().any(|h| h == heading),
            None => true,
        }
    }

    fn filtered(&self, headings: &[String]) -> Vec<String> {
        headings.iter().filter(|h| self.watches(h)).cloned().collect()
    }
}

impl AlertRule for StructuralChangeRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RuleKind {
        RuleKind::StructuralChange
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Outcome {
        if ctx.diff.first_observation {
            return Outcome::Unknown;
        }

        let added = self.filtered(&ctx.diff.new_sections);
        let removed = self.filtered(&ctx.diff.removed_sections);
        let modified = self.filtered(&ctx.diff.modified_sections);
        if added.is_empty() && removed.is_empty() && modified.is_empty() {
            return Outcome::Clear;
        }

        let current = ctx.current.sections();
        let mut hasher = Sha256::new();
        for (tag, list) in [("+", &added), ("-", &removed), ("~", &modified)] {
            for heading in list {
                hasher.update(tag.as_bytes());
                hasher.update((heading.len() as u64).to_be_bytes());
                hasher.update(heading.as_bytes());
                let text = current.get(heading).copied().unwrap_or_default();
                hasher.update((text.len() as u64).to_be_bytes());
                hasher.update(text.as_bytes());
            }
        }
        let signature = Signature::Digest(format!("{:x}", hasher.finalize()));

        let mut parts = Vec::new();
        if !added.is_empty() {
            parts.push(format!("new: {}", added.join(", ")));
        }
        if !removed.is_empty() {
            parts.push(format!("removed: {}", removed.join(", ")));
        }
        if !modified.is_empty() {
            parts.push(format!("modified: {}", modified.join(", ")));
        }
        let message = format!("{} content changed ({})", ctx.entity.name, parts.join("; "));

        let mut sections: Vec<String> = added
            .into_iter()
            .chain(removed)
            .chain(modified)
            .collect();
        sections.sort();
        sections.dedup();

        Outcome::Met(Trigger {
            sections,
            message,
            signature: Some(signature),
            ..Trigger::default()
        })
    }
}
