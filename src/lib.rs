//! Mail Triage: support-mailbox ingestion and heuristic triage.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod pipeline;
pub mod scheduler;
pub mod store;
