//! Mailbox access: the retrieval protocol seam and message decoding.

pub mod decoder;
pub mod imap;

use std::fmt;

use async_trait::async_trait;

use crate::error::MailboxError;

pub use decoder::DecodedEmail;
pub use imap::ImapConnector;

/// Protocol-level handle of a message in the selected folder (an IMAP UID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageHandle(pub u32);

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw bytes of one fetched message.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub handle: MessageHandle,
    pub raw: Vec<u8>,
}

/// Opens mailbox sessions. One session per poll cycle.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Connect, authenticate and select the configured folder.
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

/// An authenticated session on the selected folder.
///
/// Dropping a session releases its connection; `logout` is the polite way out.
#[async_trait]
pub trait MailboxSession: Send {
    /// Handles of all messages without the `\Seen` flag.
    async fn list_unseen(&mut self) -> Result<Vec<MessageHandle>, MailboxError>;

    /// Fetch raw RFC 5322 bytes for `handles` in one round trip.
    /// Fetching must not set `\Seen`.
    async fn fetch_raw(
        &mut self,
        handles: &[MessageHandle],
    ) -> Result<Vec<FetchedMessage>, MailboxError>;

    /// Set `\Seen` on one message.
    async fn mark_seen(&mut self, handle: MessageHandle) -> Result<(), MailboxError>;

    /// End the session.
    async fn logout(&mut self) -> Result<(), MailboxError>;
}
