//! Ingestion orchestrator: one poll cycle of fetch → decode → dedup → persist
//! → classify → ack.
//!
//! Failures are contained per message. Only mailbox errors and an unreachable
//! datastore abort a cycle; the next scheduled tick retries from scratch.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::MAX_BODY_CHARS;
use crate::error::{DatabaseError, DecodeError, PipelineError};
use crate::mailbox::decoder::{DecodedEmail, decode_message};
use crate::mailbox::{FetchedMessage, MailboxConnector, MailboxSession, MessageHandle};
use crate::pipeline::classifier::analyze;
use crate::pipeline::rules::status_for;
use crate::pipeline::types::MessageStatus;
use crate::store::{Database, InsertOutcome, MessageRecord, NewMessage};

/// Tally of one ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Unseen messages reported by the mailbox.
    pub listed: usize,
    /// Messages whose bytes were returned by the fetch.
    pub fetched: usize,
    /// New records created.
    pub inserted: usize,
    /// Messages already stored by an earlier cycle.
    pub duplicates: usize,
    /// New records that reached a terminal classification status.
    pub classified: usize,
    pub decode_failures: usize,
    /// Persistence or classification failures.
    pub failures: usize,
}

/// What happened to a single fetched message.
enum MessageOutcome {
    Duplicate,
    Stored { classified: bool },
}

enum MessageFailure {
    Decode(DecodeError),
    Database(DatabaseError),
}

impl From<DatabaseError> for MessageFailure {
    fn from(e: DatabaseError) -> Self {
        MessageFailure::Database(e)
    }
}

/// Drives ingestion cycles against one mailbox and one datastore.
pub struct Ingestor {
    connector: Arc<dyn MailboxConnector>,
    db: Arc<dyn Database>,
    max_body_chars: usize,
}

impl Ingestor {
    pub fn new(connector: Arc<dyn MailboxConnector>, db: Arc<dyn Database>) -> Self {
        Self {
            connector,
            db,
            max_body_chars: MAX_BODY_CHARS,
        }
    }

    /// Override the body length cap (in characters).
    pub fn with_max_body_chars(mut self, max_body_chars: usize) -> Self {
        self.max_body_chars = max_body_chars;
        self
    }

    /// Run one poll cycle.
    ///
    /// The mailbox session is logged out on every path once it was opened.
    pub async fn run_cycle(&self) -> Result<CycleReport, PipelineError> {
        let mut session = self.connector.connect().await.inspect_err(|e| {
            warn!(error = %e, "Mailbox connection failed, skipping cycle");
        })?;

        let result = self.drain(session.as_mut()).await;

        if let Err(e) = session.logout().await {
            debug!(error = %e, "Mailbox logout failed");
        }

        let report = result?;
        info!(
            listed = report.listed,
            fetched = report.fetched,
            inserted = report.inserted,
            duplicates = report.duplicates,
            classified = report.classified,
            decode_failures = report.decode_failures,
            failures = report.failures,
            "Ingestion cycle complete"
        );
        Ok(report)
    }

    async fn drain(&self, session: &mut dyn MailboxSession) -> Result<CycleReport, PipelineError> {
        let mut report = CycleReport::default();

        let handles = session.list_unseen().await?;
        report.listed = handles.len();
        if handles.is_empty() {
            debug!("No unseen messages");
            return Ok(report);
        }
        info!(count = handles.len(), "Found unseen messages");

        let fetched = session.fetch_raw(&handles).await?;
        report.fetched = fetched.len();
        if fetched.len() < handles.len() {
            warn!(
                requested = handles.len(),
                returned = fetched.len(),
                "Mailbox returned fewer messages than requested"
            );
        }

        for message in fetched {
            let handle = message.handle;
            match self.ingest_one(&message).await {
                Ok(MessageOutcome::Duplicate) => {
                    report.duplicates += 1;
                    mark_seen(session, handle).await;
                }
                Ok(MessageOutcome::Stored { classified }) => {
                    report.inserted += 1;
                    if classified {
                        report.classified += 1;
                    } else {
                        report.failures += 1;
                    }
                    mark_seen(session, handle).await;
                }
                Err(MessageFailure::Decode(e)) => {
                    warn!(uid = %handle, error = %e, "Skipping undecodable message");
                    report.decode_failures += 1;
                }
                Err(MessageFailure::Database(e)) if e.is_unavailable() => {
                    error!(uid = %handle, error = %e, "Datastore unavailable, aborting cycle");
                    return Err(e.into());
                }
                Err(MessageFailure::Database(e)) => {
                    error!(uid = %handle, error = %e, "Failed to store message");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    async fn ingest_one(&self, message: &FetchedMessage) -> Result<MessageOutcome, MessageFailure> {
        let decoded = decode_message(&message.raw).map_err(MessageFailure::Decode)?;

        if let Some(message_id) = decoded.message_id.as_deref()
            && self.db.message_exists(message_id).await?
        {
            debug!(uid = %message.handle, message_id, "Skipping duplicate");
            return Ok(MessageOutcome::Duplicate);
        }

        let record = match self.db.insert_message(&self.new_message(decoded)).await? {
            InsertOutcome::Inserted(record) => record,
            InsertOutcome::Duplicate => {
                debug!(uid = %message.handle, "Duplicate detected at insert");
                return Ok(MessageOutcome::Duplicate);
            }
        };
        info!(
            id = %record.id,
            uid = %message.handle,
            sender = %record.sender,
            subject = %record.subject,
            "Stored email"
        );

        let classified = self.classify(&record).await;
        Ok(MessageOutcome::Stored { classified })
    }

    fn new_message(&self, decoded: DecodedEmail) -> NewMessage {
        NewMessage {
            message_id: decoded.message_id,
            sender: decoded.sender,
            subject: decoded.subject,
            body: truncate_chars(&decoded.body, self.max_body_chars).to_string(),
        }
    }

    /// Classify a stored record and persist the outcome. Failures leave the
    /// record `NEW` and are only logged.
    async fn classify(&self, record: &MessageRecord) -> bool {
        let analysis = analyze(&classification_text(record));
        let status = status_for(&analysis);

        match self.db.apply_classification(record.id, &analysis, status).await {
            Ok(true) => {
                info!(
                    id = %record.id,
                    status = %status,
                    complexity = analysis.complexity.as_str(),
                    sentiment = analysis.sentiment.as_str(),
                    confidence = analysis.confidence,
                    "Email classified"
                );
                true
            }
            Ok(false) => {
                warn!(id = %record.id, "Record no longer NEW, classification skipped");
                false
            }
            Err(e) => {
                error!(id = %record.id, error = %e, "Classification update failed, record stays NEW");
                false
            }
        }
    }

    /// Classify records stuck in `NEW`, oldest first. Returns how many were
    /// moved to a terminal status.
    pub async fn reclassify_pending(&self, limit: usize) -> Result<usize, PipelineError> {
        let pending = self.db.list_by_status(MessageStatus::New, limit).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        info!(count = pending.len(), "Reclassifying pending emails");
        let mut classified = 0;
        for record in &pending {
            if self.classify(record).await {
                classified += 1;
            }
        }
        info!(classified, total = pending.len(), "Pending emails reclassified");
        Ok(classified)
    }
}

async fn mark_seen(session: &mut dyn MailboxSession, handle: MessageHandle) {
    if let Err(e) = session.mark_seen(handle).await {
        warn!(uid = %handle, error = %e, "Failed to mark message seen");
    }
}

/// Text fed to the classifier.
fn classification_text(record: &MessageRecord) -> String {
    format!("Subject: {}\n\n{}", record.subject, record.body)
}

/// The first `max` characters of `s`.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
