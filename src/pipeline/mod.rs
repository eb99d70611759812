//! Email triage pipeline.
//!
//! Every ingested email flows through:
//! 1. `MailboxSession::fetch_raw()` + `decode_message()`: mailbox I/O and MIME
//! 2. `Database::insert_message()`: dedup on `Message-ID`, stored as `NEW`
//! 3. `classifier::analyze()`: keyword heuristics, no model
//! 4. `rules::decide_status()`: classification → lifecycle status

pub mod classifier;
pub mod ingest;
pub mod rules;
pub mod types;

pub use ingest::{CycleReport, Ingestor};
