//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{Analysis, MessageStatus};
use crate::store::migrations;
use crate::store::traits::{
    Database, InsertOutcome, MAX_PAGE_SIZE, MessagePage, MessageQuery, MessageRecord, NewMessage,
    StatusCounts,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339, so text ordering matches time ordering.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// `LIKE` pattern matching `needle` anywhere, with wildcards escaped by `\`.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// Primary SQLite result codes; libSQL reports extended codes, so mask first.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_IOERR: i32 = 10;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_FULL: i32 = 13;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_CONSTRAINT: i32 = 19;
const SQLITE_NOTADB: i32 = 26;

/// Classify a statement failure.
///
/// Lock, I/O and open failures say nothing about the statement and will hit
/// every following one too, so they map to `Unavailable`.
fn query_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = format!("{op}: {e}");
    match &e {
        libsql::Error::SqliteFailure(code, _) => match code & 0xff {
            SQLITE_BUSY | SQLITE_LOCKED | SQLITE_IOERR | SQLITE_CORRUPT | SQLITE_FULL
            | SQLITE_CANTOPEN | SQLITE_NOTADB => DatabaseError::Unavailable(message),
            SQLITE_CONSTRAINT => DatabaseError::Constraint(message),
            _ => DatabaseError::Query(message),
        },
        libsql::Error::ConnectionFailed(_) => DatabaseError::Unavailable(message),
        _ if message.contains("constraint failed") => DatabaseError::Constraint(message),
        _ => DatabaseError::Query(message),
    }
}

/// Map a libsql Row to a MessageRecord.
///
/// Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<MessageRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let id_str: String = row.get(0).map_err(parse)?;
    let status_str: String = row.get(5).map_err(parse)?;
    let created_str: String = row.get(10).map_err(parse)?;

    let id = id_str
        .parse()
        .map_err(|e| DatabaseError::Query(format!("bad message id {id_str}: {e}")))?;
    let status = status_str.parse().map_err(DatabaseError::Query)?;

    Ok(MessageRecord {
        id,
        message_id: row.get::<String>(1).ok(),
        sender: row.get(2).map_err(parse)?,
        subject: row.get(3).map_err(parse)?,
        body: row.get(4).map_err(parse)?,
        status,
        complexity: row.get::<String>(6).ok().and_then(|s| s.parse().ok()),
        sentiment: row.get::<String>(7).ok().and_then(|s| s.parse().ok()),
        ai_response: row.get::<String>(8).ok(),
        confidence: row.get::<f64>(9).ok(),
        created_at: parse_datetime(&created_str),
    })
}

async fn collect_messages(
    op: &str,
    mut rows: libsql::Rows,
) -> Result<Vec<MessageRecord>, DatabaseError> {
    let mut messages = Vec::new();
    while let Some(row) = rows.next().await.map_err(|e| query_error(op, e))? {
        match row_to_message(&row) {
            Ok(msg) => messages.push(msg),
            Err(e) => tracing::warn!("Skipping message row: {e}"),
        }
    }
    Ok(messages)
}

// ── Trait implementation ────────────────────────────────────────────

const MESSAGE_COLUMNS: &str = "id, message_id, sender, subject, body, status, complexity, sentiment, ai_response, confidence, created_at";

const LIST_FILTER: &str = r"(?1 IS NULL OR status = ?1)
    AND (?2 IS NULL OR sender LIKE ?2 ESCAPE '\' OR subject LIKE ?2 ESCAPE '\')";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Ingestion ───────────────────────────────────────────────────

    async fn insert_message(&self, message: &NewMessage) -> Result<InsertOutcome, DatabaseError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let now = format_datetime(created_at);

        let inserted = self
            .conn()
            .execute(
                "INSERT INTO emails (id, message_id, sender, subject, body, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'NEW', ?6, ?6)
                 ON CONFLICT(message_id) DO NOTHING",
                params![
                    id.to_string(),
                    opt_text(message.message_id.as_deref()),
                    message.sender.as_str(),
                    message.subject.as_str(),
                    message.body.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| query_error("insert_message", e))?;

        if inserted == 0 {
            debug!(message_id = ?message.message_id, "Message already stored");
            return Ok(InsertOutcome::Duplicate);
        }

        debug!(id = %id, message_id = ?message.message_id, "Message inserted into DB");
        Ok(InsertOutcome::Inserted(MessageRecord {
            id,
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            status: MessageStatus::New,
            complexity: None,
            sentiment: None,
            ai_response: None,
            confidence: None,
            created_at,
            message_id: message.message_id.clone(),
        }))
    }

    async fn message_exists(&self, message_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM emails WHERE message_id = ?1 LIMIT 1",
                params![message_id],
            )
            .await
            .map_err(|e| query_error("message_exists", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| query_error("message_exists", e))?;
        Ok(row.is_some())
    }

    async fn apply_classification(
        &self,
        id: Uuid,
        analysis: &Analysis,
        status: MessageStatus,
    ) -> Result<bool, DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| query_error("apply_classification begin", e))?;

        let result = tx
            .execute(
                "UPDATE emails
                 SET complexity = ?1, sentiment = ?2, confidence = ?3, ai_response = ?4,
                     status = ?5, updated_at = ?6
                 WHERE id = ?7 AND status = 'NEW'",
                params![
                    analysis.complexity.as_str(),
                    analysis.sentiment.as_str(),
                    analysis.confidence,
                    analysis.suggested_response.as_str(),
                    status.as_str(),
                    format_datetime(Utc::now()),
                    id.to_string(),
                ],
            )
            .await;

        match result {
            Ok(0) => {
                tx.rollback()
                    .await
                    .map_err(|e| query_error("apply_classification rollback", e))?;
                Ok(false)
            }
            Ok(_) => {
                tx.commit()
                    .await
                    .map_err(|e| query_error("apply_classification commit", e))?;
                debug!(id = %id, status = %status, "Classification applied");
                Ok(true)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(id = %id, "Rollback failed: {rollback}");
                }
                Err(query_error("apply_classification", e))
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    async fn get_message(&self, id: Uuid) -> Result<Option<MessageRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM emails WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| query_error("get_message", e))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_message(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(query_error("get_message", e)),
        }
    }

    async fn list_messages(&self, query: &MessageQuery) -> Result<MessagePage, DatabaseError> {
        let status = opt_text(query.status.map(|s| s.as_str()));
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);
        let limit = query.limit.clamp(1, MAX_PAGE_SIZE) as i64;
        let offset = query.offset as i64;

        let mut rows = self
            .conn()
            .query(
                &format!("SELECT COUNT(*) FROM emails WHERE {LIST_FILTER}"),
                params![status.clone(), opt_text(search.as_deref())],
            )
            .await
            .map_err(|e| query_error("list_messages count", e))?;
        let total: i64 = match rows.next().await {
            Ok(Some(row)) => row.get(0).unwrap_or(0),
            Ok(None) => 0,
            Err(e) => return Err(query_error("list_messages count", e)),
        };

        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM emails WHERE {LIST_FILTER}
                     ORDER BY created_at DESC, rowid DESC LIMIT ?3 OFFSET ?4"
                ),
                params![status, opt_text(search.as_deref()), limit, offset],
            )
            .await
            .map_err(|e| query_error("list_messages", e))?;
        let messages = collect_messages("list_messages", rows).await?;

        Ok(MessagePage {
            messages,
            total: total.max(0) as u64,
        })
    }

    async fn status_counts(&self) -> Result<StatusCounts, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT status, COUNT(*) FROM emails GROUP BY status", ())
            .await
            .map_err(|e| query_error("status_counts", e))?;

        let mut counts = StatusCounts::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_error("status_counts", e))?
        {
            let status: String = row.get(0).map_err(|e| query_error("status_counts", e))?;
            let n = row.get::<i64>(1).unwrap_or(0).max(0) as u64;
            counts.total += n;
            match status.parse::<MessageStatus>() {
                Ok(MessageStatus::New) => counts.new = n,
                Ok(MessageStatus::Processed) => counts.processed = n,
                Ok(MessageStatus::NeedsOperator) => counts.needs_operator = n,
                Ok(MessageStatus::Escalated) => counts.escalated = n,
                Ok(MessageStatus::Closed) => counts.closed = n,
                Err(e) => tracing::warn!("Ignoring status count: {e}"),
            }
        }
        Ok(counts)
    }

    async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM emails WHERE status = ?1
                     ORDER BY created_at ASC, rowid ASC LIMIT ?2"
                ),
                params![status.as_str(), limit as i64],
            )
            .await
            .map_err(|e| query_error("list_by_status", e))?;
        collect_messages("list_by_status", rows).await
    }
}

// ── Tests ───────────────────────────────────────────────────────────
