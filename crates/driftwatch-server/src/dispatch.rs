use crate::scheduler::CycleSummary;
use anyhow::Result;
use async_trait::async_trait;
use driftwatch_common::types::Severity;

/// Receives the outcome of every poll cycle.
///
/// Formatting and delivery (console, email, webhook) belong to the
/// implementation. A dispatch error is logged by the orchestrator and does
/// not affect the next cycle.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, summary: &CycleSummary) -> Result<()>;

    /// Returns the dispatcher type name (e.g., `"log"`).
    fn name(&self) -> &str;
}

/// Writes alerts and cycle health as tracing events.
#[derive(Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn dispatch(&self, summary: &CycleSummary) -> Result<()> {
        for alert in &summary.alerts {
            match alert.severity {
                Severity::Critical => tracing::warn!(
                    entity_id = %alert.entity_id,
                    rule_id = %alert.rule_id,
                    kind = %alert.kind,
                    severity = %alert.severity,
                    "{}",
                    alert.message
                ),
                _ => tracing::info!(
                    entity_id = %alert.entity_id,
                    rule_id = %alert.rule_id,
                    kind = %alert.kind,
                    severity = %alert.severity,
                    "{}",
                    alert.message
                ),
            }
        }

        for failure in &summary.failures {
            tracing::warn!(
                entity_id = %failure.entity_id,
                error = %failure.error,
                "Entity check failed"
            );
        }

        if !summary.degraded.is_empty() {
            tracing::error!(
                entities = ?summary.degraded,
                "Entities degraded by repeated history store failures"
            );
        }

        tracing::info!(
            cycle_id = %summary.cycle_id,
            checked = summary.checked,
            unchanged = summary.unchanged,
            changed = summary.changed,
            first_seen = summary.first_seen,
            errored = summary.errored,
            alerted = summary.alerted,
            "Cycle summary"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
