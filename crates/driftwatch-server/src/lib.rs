//! Poll orchestration for the driftwatch change-detection engine.
//!
//! The [`scheduler::PollOrchestrator`] drives each cycle: fetch a snapshot
//! per entity through an [`extractor::Extractor`], diff it against the
//! [`driftwatch_storage::HistoryStore`], evaluate the entity's alert rules,
//! commit the new history and hand the resulting
//! [`scheduler::CycleSummary`] to a [`dispatch::Dispatcher`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod rule_builder;
pub mod scheduler;
