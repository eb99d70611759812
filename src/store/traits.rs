//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{Analysis, Complexity, MessageStatus, Sentiment};

/// Default page size for [`MessageQuery`].
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Largest page a single query may return.
pub const MAX_PAGE_SIZE: usize = 1000;

/// A persisted inbound email.
///
/// Classification fields stay `None` until the message leaves `NEW`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub status: MessageStatus,
    pub complexity: Option<Complexity>,
    pub sentiment: Option<Sentiment>,
    pub ai_response: Option<String>,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
    /// `Message-ID` header, used only for deduplication.
    #[serde(skip)]
    pub message_id: Option<String>,
}

/// Fields of a message at ingestion time.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub body: String,
}

/// Result of inserting a message.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(MessageRecord),
    /// A record with the same `message_id` already exists.
    Duplicate,
}

/// Filters for [`Database::list_messages`].
#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub status: Option<MessageStatus>,
    /// Case-insensitive substring match on sender or subject.
    pub search: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            status: None,
            search: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

/// One page of messages plus the total matching the filters.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessageRecord>,
    pub total: u64,
}

/// Number of messages per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: u64,
    pub new: u64,
    pub processed: u64,
    pub needs_operator: u64,
    pub escalated: u64,
    pub closed: u64,
}

impl StatusCounts {
    pub fn get(&self, status: MessageStatus) -> u64 {
        match status {
            MessageStatus::New => self.new,
            MessageStatus::Processed => self.processed,
            MessageStatus::NeedsOperator => self.needs_operator,
            MessageStatus::Escalated => self.escalated,
            MessageStatus::Closed => self.closed,
        }
    }
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Ingestion ───────────────────────────────────────────────────

    /// Insert a message with status `NEW`.
    ///
    /// A `message_id` that is already stored yields [`InsertOutcome::Duplicate`]
    /// and leaves the existing record untouched.
    async fn insert_message(&self, message: &NewMessage) -> Result<InsertOutcome, DatabaseError>;

    /// Whether a record with this `message_id` exists.
    async fn message_exists(&self, message_id: &str) -> Result<bool, DatabaseError>;

    /// Store a classification and move the record out of `NEW`, atomically.
    ///
    /// Returns `false` if the record does not exist or is no longer `NEW`.
    async fn apply_classification(
        &self,
        id: Uuid,
        analysis: &Analysis,
        status: MessageStatus,
    ) -> Result<bool, DatabaseError>;

    // ── Queries ─────────────────────────────────────────────────────

    /// Get a message by ID.
    async fn get_message(&self, id: Uuid) -> Result<Option<MessageRecord>, DatabaseError>;

    /// Filtered, newest-first page of messages.
    async fn list_messages(&self, query: &MessageQuery) -> Result<MessagePage, DatabaseError>;

    /// Message counts per status.
    async fn status_counts(&self) -> Result<StatusCounts, DatabaseError>;

    /// Messages in `status`, oldest first, up to `limit`.
    async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, DatabaseError>;
}
