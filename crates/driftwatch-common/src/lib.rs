//! Shared data model for the driftwatch change-detection engine.
//!
//! [`snapshot`] holds the observation model and its content hash,
//! [`types`] the entity, alert and history records exchanged between the
//! alert engine, the history store and the poll orchestrator.

pub mod id;
pub mod snapshot;
pub mod types;
