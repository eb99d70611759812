//! IMAP over TLS (rustls), blocking I/O driven from `spawn_blocking`.
//!
//! Only the handful of commands the poller needs: LOGIN, SELECT,
//! UID SEARCH UNSEEN, UID FETCH (BODY.PEEK[]), UID STORE +FLAGS, LOGOUT.
//! Message bodies arrive as IMAP literals (`{N}\r\n` + N bytes) and are read
//! byte-exact.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::MailboxConfig;
use crate::error::MailboxError;
use crate::mailbox::{FetchedMessage, MailboxConnector, MailboxSession, MessageHandle};

static LITERAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\d+)\}\r?\n?$").unwrap());

static FETCH_UID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bUID (\d+)").unwrap());

/// Largest literal accepted from the server. Anything bigger is treated as a
/// protocol violation rather than allocated.
const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

/// The whole handshake (DNS, TCP, TLS, LOGIN, SELECT) must finish within
/// this many socket timeouts.
const CONNECT_DEADLINE_FACTOR: u32 = 4;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Connector ───────────────────────────────────────────────────────

/// Opens TLS IMAP sessions against the configured server.
pub struct ImapConnector {
    config: MailboxConfig,
}

impl ImapConnector {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let config = self.config.clone();
        let deadline = self.config.timeout * CONNECT_DEADLINE_FACTOR;
        let conn = blocking_with_deadline(deadline, move || open_tls(&config)).await?;
        info!(host = %self.config.host, folder = %self.config.folder, "IMAP session opened");
        Ok(Box::new(ImapSession { conn: Some(conn) }))
    }
}

/// Run blocking work with an overall deadline.
///
/// Name resolution has no timeout of its own, so the socket timeouts alone do
/// not bound a connect. On expiry the blocking thread is abandoned; it ends
/// when the resolver or socket gives up.
async fn blocking_with_deadline<T, F>(deadline: Duration, work: F) -> Result<T, MailboxError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, MailboxError> + Send + 'static,
{
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(work)).await {
        Ok(joined) => joined.map_err(|e| MailboxError::Task(e.to_string()))?,
        Err(_) => Err(MailboxError::Timeout(deadline)),
    }
}

fn open_tls(config: &MailboxConfig) -> Result<ImapConnection<TlsStream>, MailboxError> {
    let tcp = connect_tcp(&config.host, config.port, config.timeout)?;
    tcp.set_read_timeout(Some(config.timeout))?;
    tcp.set_write_timeout(Some(config.timeout))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| MailboxError::Tls(format!("invalid server name {}: {e}", config.host)))?;
    let tls = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailboxError::Tls(e.to_string()))?;

    let mut conn = ImapConnection::new(rustls::StreamOwned::new(tls, tcp), config.timeout);
    conn.greeting()?;
    conn.login(&config.username, config.password.expose_secret())?;
    conn.select(&config.folder)?;
    Ok(conn)
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, MailboxError> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| MailboxError::Connect {
            host: host.to_string(),
            reason: format!("DNS lookup failed: {e}"),
        })?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(MailboxError::Connect {
        host: host.to_string(),
        reason: last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no addresses resolved".into()),
    })
}

// ── Session ─────────────────────────────────────────────────────────

/// Async facade over a blocking connection.
///
/// Each call moves the connection into a blocking task and takes it back
/// afterwards; if the task dies the session is left closed.
struct ImapSession {
    conn: Option<ImapConnection<TlsStream>>,
}

impl ImapSession {
    async fn with_conn<T, F>(&mut self, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapConnection<TlsStream>) -> Result<T, MailboxError> + Send + 'static,
    {
        let mut conn = self.conn.take().ok_or(MailboxError::Closed)?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))?;
        self.conn = Some(conn);
        result
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    async fn list_unseen(&mut self) -> Result<Vec<MessageHandle>, MailboxError> {
        self.with_conn(|conn| conn.search_unseen()).await
    }

    async fn fetch_raw(
        &mut self,
        handles: &[MessageHandle],
    ) -> Result<Vec<FetchedMessage>, MailboxError> {
        let handles = handles.to_vec();
        self.with_conn(move |conn| conn.fetch(&handles)).await
    }

    async fn mark_seen(&mut self, handle: MessageHandle) -> Result<(), MailboxError> {
        self.with_conn(move |conn| conn.store_seen(handle)).await
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        let result = self.with_conn(|conn| conn.logout()).await;
        self.conn = None;
        result
    }
}

// ── Protocol ────────────────────────────────────────────────────────

/// One untagged server response, with any literals it carried.
#[derive(Debug, Default)]
struct Untagged {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// Blocking IMAP protocol driver over any byte stream.
struct ImapConnection<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
    timeout: Duration,
}

impl<S: Read + Write> ImapConnection<S> {
    fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
            timeout,
        }
    }

    fn greeting(&mut self) -> Result<(), MailboxError> {
        let line = self.read_line()?;
        if line.starts_with("* OK") || line.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailboxError::Protocol {
                command: "greeting".into(),
                response: line.trim_end().to_string(),
            })
        }
    }

    fn login(&mut self, username: &str, password: &str) -> Result<(), MailboxError> {
        let cmd = format!("LOGIN {} {}", quote(username), quote(password));
        match self.command(&cmd) {
            Ok(_) => Ok(()),
            Err(MailboxError::Protocol { .. }) => Err(MailboxError::AuthFailed {
                user: username.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn select(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.command(&format!("SELECT {}", quote(folder)))?;
        Ok(())
    }

    fn search_unseen(&mut self) -> Result<Vec<MessageHandle>, MailboxError> {
        let responses = self.command("UID SEARCH UNSEEN")?;
        let handles = parse_search(&responses);
        debug!(count = handles.len(), "UID SEARCH UNSEEN");
        Ok(handles)
    }

    fn fetch(&mut self, handles: &[MessageHandle]) -> Result<Vec<FetchedMessage>, MailboxError> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        let set = handles
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let responses = self.command(&format!("UID FETCH {set} (UID BODY.PEEK[])"))?;
        Ok(parse_fetch(responses))
    }

    fn store_seen(&mut self, handle: MessageHandle) -> Result<(), MailboxError> {
        self.command(&format!("UID STORE {handle} +FLAGS.SILENT (\\Seen)"))?;
        Ok(())
    }

    fn logout(&mut self) -> Result<(), MailboxError> {
        self.command("LOGOUT")?;
        Ok(())
    }

    /// Send a tagged command and collect untagged responses until the tagged
    /// completion. `NO`/`BAD` completions are errors.
    fn command(&mut self, cmd: &str) -> Result<Vec<Untagged>, MailboxError> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|e| io_error(e, self.timeout))?;

        let verb = command_verb(cmd);
        let tagged_prefix = format!("{tag} ");
        let mut responses = Vec::new();

        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&tagged_prefix) {
                if status.starts_with("OK") {
                    return Ok(responses);
                }
                return Err(MailboxError::Protocol {
                    command: verb,
                    response: status.trim_end().to_string(),
                });
            }
            if line.starts_with('+') {
                // Continuation requests are never expected: no command here
                // sends literals.
                return Err(MailboxError::Protocol {
                    command: verb,
                    response: line.trim_end().to_string(),
                });
            }
            responses.push(self.read_untagged(line, &verb)?);
        }
    }

    /// Complete an untagged response, following any literals it announces.
    fn read_untagged(&mut self, first_line: String, verb: &str) -> Result<Untagged, MailboxError> {
        let mut response = Untagged::default();
        let mut line = first_line;
        loop {
            let literal = literal_len(&line);
            response.text.push_str(line.trim_end_matches(['\r', '\n']));
            let Some(len) = literal else {
                return Ok(response);
            };
            if len > MAX_LITERAL_BYTES {
                return Err(MailboxError::Protocol {
                    command: verb.to_string(),
                    response: format!(
                        "literal of {len} bytes exceeds the {MAX_LITERAL_BYTES} byte limit"
                    ),
                });
            }
            let mut buf = vec![0u8; len];
            self.stream
                .read_exact(&mut buf)
                .map_err(|e| io_error(e, self.timeout))?;
            response.literals.push(buf);
            line = self.read_line()?;
        }
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self
            .stream
            .read_until(b'\n', &mut buf)
            .map_err(|e| io_error(e, self.timeout))?;
        if n == 0 {
            return Err(MailboxError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "IMAP connection closed",
            )));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn io_error(e: std::io::Error, timeout: Duration) -> MailboxError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => MailboxError::Timeout(timeout),
        _ => MailboxError::Io(e),
    }
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Command name for error messages, never including arguments (credentials).
fn command_verb(cmd: &str) -> String {
    let mut words = cmd.split_whitespace();
    match (words.next(), words.next()) {
        (Some("UID"), Some(sub)) => format!("UID {sub}"),
        (Some(verb), _) => verb.to_string(),
        _ => String::new(),
    }
}

/// Announced literal length. Counts too large for `usize` saturate so the
/// size check rejects them.
fn literal_len(line: &str) -> Option<usize> {
    LITERAL
        .captures(line)
        .map(|caps| caps[1].parse().unwrap_or(usize::MAX))
}

fn parse_search(responses: &[Untagged]) -> Vec<MessageHandle> {
    responses
        .iter()
        .filter_map(|r| r.text.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|n| n.parse().ok())
        .map(MessageHandle)
        .collect()
}

fn parse_fetch(responses: Vec<Untagged>) -> Vec<FetchedMessage> {
    responses
        .into_iter()
        .filter(|r| r.text.contains("FETCH"))
        .filter_map(|mut r| {
            let uid: u32 = FETCH_UID.captures(&r.text)?[1].parse().ok()?;
            let raw = r.literals.pop()?;
            Some(FetchedMessage {
                handle: MessageHandle(uid),
                raw,
            })
        })
        .collect()
}
