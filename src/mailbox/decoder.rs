//! Message decoding: raw RFC 5322 bytes to sender/subject/body text.
//!
//! Headers are read straight from the raw header block so RFC 2047
//! encoded-words are decoded by one set of rules; bodies go through
//! `mail_parser`, which already handles transfer encodings and charsets.

use std::sync::LazyLock;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use regex::Regex;
use tracing::warn;

use crate::error::DecodeError;

/// Subject used when the header is absent altogether.
pub const NO_SUBJECT: &str = "(no subject)";

/// Sender used when the `From` header yields nothing usable.
pub const UNKNOWN_SENDER: &str = "unknown";

/// Base64 for encoded-words; senders are inconsistent about padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

static ANGLE_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\s*([^<>\s]+@[^<>\s]+?)\s*>").unwrap());

static BARE_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^\s<>"',;:()\[\]]+@[^\s<>"',;:()\[\]]+"#).unwrap());

/// The parts of an inbound email the pipeline stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEmail {
    /// `Message-ID` header, `None` when absent.
    pub message_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub body: String,
}

/// Decode a raw message into the fields the pipeline stores.
pub fn decode_message(raw: &[u8]) -> Result<DecodedEmail, DecodeError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }
    let message = MessageParser::default()
        .parse(raw)
        .ok_or(DecodeError::Unparseable)?;

    let sender = raw_header(raw, "From")
        .map(|from| parse_sender(&from))
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
    let subject = raw_header(raw, "Subject")
        .map(|s| decode_header(&s))
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    Ok(DecodedEmail {
        message_id: parse_message_id(raw),
        sender,
        subject,
        body: body_of(&message.parts),
    })
}

/// `Message-ID` header value, trimmed; `None` when missing or blank.
pub fn parse_message_id(raw: &[u8]) -> Option<String> {
    raw_header(raw, "Message-ID")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ── Headers ─────────────────────────────────────────────────────────

/// First value of header `name` (case-insensitive), unfolded.
pub fn raw_header(raw: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let mut current: Option<String> = None;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(value) = current.as_mut() {
                value.push_str(line);
            }
            continue;
        }
        if current.is_some() {
            break;
        }
        if let Some((key, value)) = line.split_once(':')
            && key.trim().eq_ignore_ascii_case(name)
        {
            current = Some(value.to_string());
        }
    }

    current.map(|v| v.trim().to_string())
}

enum Token<'a> {
    Plain(&'a str),
    Encoded(String),
}

/// Decode a header value that may contain RFC 2047 encoded-words.
///
/// Adjacent encoded-words (separated only by whitespace) are merged into one
/// segment; all segments are trimmed and joined with a single space.
/// Unknown charsets fall back to lossy UTF-8.
pub fn decode_header(raw: &str) -> String {
    let unfolded: String = raw.chars().filter(|c| *c != '\r' && *c != '\n').collect();

    let mut segments: Vec<String> = Vec::new();
    let mut plain = String::new();
    let mut encoded: Option<String> = None;

    for token in tokenize(&unfolded) {
        match token {
            Token::Plain(text) => {
                if encoded.is_some() && text.trim().is_empty() {
                    continue;
                }
                if let Some(run) = encoded.take() {
                    push_segment(&mut segments, &run);
                }
                plain.push_str(text);
            }
            Token::Encoded(text) => {
                push_segment(&mut segments, &plain);
                plain.clear();
                encoded.get_or_insert_with(String::new).push_str(&text);
            }
        }
    }
    if let Some(run) = encoded {
        push_segment(&mut segments, &run);
    }
    push_segment(&mut segments, &plain);

    segments.join(" ")
}

fn push_segment(segments: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("=?") {
        if start > 0 {
            tokens.push(Token::Plain(&rest[..start]));
        }
        match decode_encoded_word(&rest[start..]) {
            Some((text, consumed)) => {
                tokens.push(Token::Encoded(text));
                rest = &rest[start + consumed..];
            }
            None => {
                tokens.push(Token::Plain(&rest[start..start + 2]));
                rest = &rest[start + 2..];
            }
        }
    }
    if !rest.is_empty() {
        tokens.push(Token::Plain(rest));
    }
    tokens
}

/// Decode one `=?charset?B|Q?text?=` word at the start of `s`.
/// Returns the text and the number of bytes consumed.
fn decode_encoded_word(s: &str) -> Option<(String, usize)> {
    let inner = s.strip_prefix("=?")?;
    let (charset, after) = inner.split_once('?')?;
    let (encoding, after) = after.split_once('?')?;
    let end = after.find("?=")?;
    let text = &after[..end];

    if charset.is_empty()
        || charset.contains(char::is_whitespace)
        || text.contains(char::is_whitespace)
    {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => LENIENT_BASE64.decode(text).ok()?,
        "Q" | "q" => decode_q(text),
        _ => return None,
    };
    let consumed = 2 + charset.len() + 1 + encoding.len() + 1 + end + 2;

    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);
    Some((decode_charset(charset, &bytes), consumed))
}

/// Q-encoding: `_` is a space, `=XX` is a hex byte.
fn decode_q(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    match encoding_rs::Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => encoding.decode_without_bom_handling(bytes).0.into_owned(),
        None => {
            warn!(charset, "Unknown charset, decoding as UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Extract the bare address from a `From` header.
///
/// Falls back to the decoded header value, then to `"unknown"`.
pub fn parse_sender(from_header: &str) -> String {
    let decoded = decode_header(from_header);

    if let Some(caps) = ANGLE_ADDR.captures(&decoded) {
        return caps[1].to_string();
    }
    if let Some(m) = BARE_ADDR.find(&decoded) {
        return m.as_str().to_string();
    }
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        UNKNOWN_SENDER.to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Body ────────────────────────────────────────────────────────────

/// Extract the body text from a raw message.
///
/// Multipart: the first `text/plain` part that is not an attachment, else the
/// first `text/html` part (returned as HTML). Single part: its decoded
/// payload. Empty string when nothing textual is present.
pub fn extract_body(raw: &[u8]) -> String {
    MessageParser::default()
        .parse(raw)
        .map(|message| body_of(&message.parts))
        .unwrap_or_default()
}

fn body_of(parts: &[MessagePart<'_>]) -> String {
    let Some(root) = parts.first() else {
        return String::new();
    };

    if !matches!(root.body, PartType::Multipart(_)) {
        return part_text(root).unwrap_or_default();
    }

    parts
        .iter()
        .filter(|part| is_mime(part, "text", "plain") && !is_attachment(part))
        .find_map(part_text)
        .or_else(|| {
            parts
                .iter()
                .filter(|part| is_mime(part, "text", "html"))
                .find_map(part_text)
        })
        .unwrap_or_default()
}

/// Content type check; a part without a `Content-Type` is `text/plain`.
fn is_mime(part: &MessagePart<'_>, ctype: &str, subtype: &str) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case(ctype)
                && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case(subtype))
        }
        None => ctype == "text" && subtype == "plain",
    }
}

fn is_attachment(part: &MessagePart<'_>) -> bool {
    part.content_disposition()
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
}

/// Decoded payload of a leaf part; `None` for containers and empty payloads.
fn part_text(part: &MessagePart<'_>) -> Option<String> {
    let text = match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.as_ref().to_owned(),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        PartType::Message(_) | PartType::Multipart(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── decode_header ──────────────────────────────────────────────

    #[test]
    fn header_plain_passthrough() {
        assert_eq!(decode_header("  Order #42 status  "), "Order #42 status");
        assert_eq!(decode_header(""), "");
    }

    #[test]
    fn header_base64_word() {
        assert_eq!(decode_header("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn header_q_word_latin1() {
        assert_eq!(decode_header("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn header_q_underscore_is_space() {
        assert_eq!(decode_header("=?UTF-8?Q?Hello_World?="), "Hello World");
    }

    #[test]
    fn header_adjacent_words_merge() {
        assert_eq!(
            decode_header("=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="),
            "Hola mundo"
        );
    }

    #[test]
    fn header_mixed_segments_joined_with_single_space() {
        assert_eq!(decode_header("Re: =?UTF-8?B?SG9sYQ==?= there"), "Re: Hola there");
        assert_eq!(decode_header("Re:=?UTF-8?B?SG9sYQ==?=there"), "Re: Hola there");
    }

    #[test]
    fn header_folded_lines() {
        assert_eq!(
            decode_header("=?UTF-8?B?SG9sYQ==?=\r\n =?UTF-8?B?IG11bmRv?="),
            "Hola mundo"
        );
    }

    #[test]
    fn header_unknown_charset_is_lossy_utf8() {
        assert_eq!(decode_header("=?x-made-up?Q?caf=C3=A9?="), "café");
        assert_eq!(decode_header("=?UTF-8?Q?caf=E9?="), "caf\u{FFFD}");
    }

    #[test]
    fn header_unpadded_base64() {
        assert_eq!(decode_header("=?utf-8?b?SG9sYQ?="), "Hola");
    }

    #[test]
    fn header_malformed_word_kept_verbatim() {
        assert_eq!(decode_header("=?UTF-8?Q?broken"), "=?UTF-8?Q?broken");
        assert_eq!(decode_header("a =? b"), "a =? b");
    }

    #[test]
    fn header_cyrillic() {
        // "Привет" in UTF-8, base64
        assert_eq!(decode_header("=?UTF-8?B?0J/RgNC40LLQtdGC?="), "Привет");
    }

    // ── raw_header ─────────────────────────────────────────────────

    #[test]
    fn raw_header_case_insensitive_and_unfolded() {
        let raw = b"FROM: a@b.c\r\nsubject: first\r\n  second\r\nX-Other: 1\r\n\r\nSubject: body line";
        assert_eq!(raw_header(raw, "From").as_deref(), Some("a@b.c"));
        assert_eq!(raw_header(raw, "Subject").as_deref(), Some("first  second"));
        assert_eq!(raw_header(raw, "Missing"), None);
    }

    #[test]
    fn raw_header_stops_at_body() {
        let raw = b"From: a@b.c\n\nMessage-ID: <not-a-header@x>";
        assert_eq!(raw_header(raw, "Message-ID"), None);
    }

    // ── parse_sender ───────────────────────────────────────────────

    #[test]
    fn sender_angle_address() {
        assert_eq!(parse_sender("Alice Smith <alice@example.com>"), "alice@example.com");
        assert_eq!(parse_sender("\"Smith, Alice\" < alice@example.com >"), "alice@example.com");
    }

    #[test]
    fn sender_bare_address() {
        assert_eq!(parse_sender("bob@example.com"), "bob@example.com");
        assert_eq!(parse_sender("bob@example.com (Bob)"), "bob@example.com");
    }

    #[test]
    fn sender_encoded_display_name() {
        assert_eq!(
            parse_sender("=?UTF-8?B?0J/RgNC40LLQtdGC?= <ivan@example.ru>"),
            "ivan@example.ru"
        );
    }

    #[test]
    fn sender_fallbacks() {
        assert_eq!(parse_sender("Mail Delivery System"), "Mail Delivery System");
        assert_eq!(parse_sender("   "), "unknown");
    }

    // ── extract_body ───────────────────────────────────────────────

    const MULTIPART_PLAIN_AND_HTML: &str = "From: a@example.com\n\
Subject: Both\n\
MIME-Version: 1.0\n\
Content-Type: multipart/alternative; boundary=\"b1\"\n\
\n\
--b1\n\
Content-Type: text/plain; charset=utf-8\n\
\n\
Plain version\n\
--b1\n\
Content-Type: text/html; charset=utf-8\n\
\n\
<p>HTML version</p>\n\
--b1--\n";

    const MULTIPART_HTML_ONLY: &str = "From: a@example.com\n\
Subject: Html\n\
MIME-Version: 1.0\n\
Content-Type: multipart/alternative; boundary=\"b1\"\n\
\n\
--b1\n\
Content-Type: text/html; charset=utf-8\n\
\n\
<p>Only HTML here</p>\n\
--b1--\n";

    const MULTIPART_PLAIN_ATTACHMENT: &str = "From: a@example.com\n\
Subject: Attachment\n\
MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"b1\"\n\
\n\
--b1\n\
Content-Type: text/plain; charset=utf-8\n\
Content-Disposition: attachment; filename=\"notes.txt\"\n\
\n\
attached notes\n\
--b1\n\
Content-Type: text/html; charset=utf-8\n\
\n\
<p>Fallback html</p>\n\
--b1--\n";

    const MULTIPART_NO_TEXT: &str = "From: a@example.com\n\
Subject: Binary\n\
MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"b1\"\n\
\n\
--b1\n\
Content-Type: image/png\n\
Content-Transfer-Encoding: base64\n\
\n\
iVBORw0KGgo=\n\
--b1--\n";

    #[test]
    fn body_prefers_plain_over_html() {
        assert_eq!(extract_body(MULTIPART_PLAIN_AND_HTML.as_bytes()).trim(), "Plain version");
    }

    #[test]
    fn body_html_only_multipart_returns_html() {
        assert_eq!(
            extract_body(MULTIPART_HTML_ONLY.as_bytes()).trim(),
            "<p>Only HTML here</p>"
        );
    }

    #[test]
    fn body_skips_plain_attachment() {
        assert_eq!(
            extract_body(MULTIPART_PLAIN_ATTACHMENT.as_bytes()).trim(),
            "<p>Fallback html</p>"
        );
    }

    #[test]
    fn body_without_text_parts_is_empty() {
        assert_eq!(extract_body(MULTIPART_NO_TEXT.as_bytes()), "");
    }

    #[test]
    fn body_single_part_base64() {
        let raw = "From: a@example.com\n\
Subject: Encoded\n\
Content-Type: text/plain; charset=utf-8\n\
Content-Transfer-Encoding: base64\n\
\n\
SGVsbG8gd29ybGQ=\n";
        assert_eq!(extract_body(raw.as_bytes()).trim(), "Hello world");
    }

    #[test]
    fn body_single_part_without_content_type() {
        let raw = "From: a@example.com\nSubject: Plain\n\nJust text.\n";
        assert_eq!(extract_body(raw.as_bytes()).trim(), "Just text.");
    }

    // ── decode_message ─────────────────────────────────────────────

    #[test]
    fn decode_full_message() {
        let raw = "Message-ID: <abc-123@example.com>\n\
From: =?UTF-8?Q?Jos=C3=A9?= <jose@example.com>\n\
Subject: =?UTF-8?B?SG9sYQ==?= support\n\
\n\
Body text\n";
        let decoded = decode_message(raw.as_bytes()).unwrap();
        assert_eq!(decoded.message_id.as_deref(), Some("<abc-123@example.com>"));
        assert_eq!(decoded.sender, "jose@example.com");
        assert_eq!(decoded.subject, "Hola support");
        assert_eq!(decoded.body.trim(), "Body text");
    }

    #[test]
    fn decode_missing_headers_use_defaults() {
        let raw = "X-Mailer: test\n\nhello\n";
        let decoded = decode_message(raw.as_bytes()).unwrap();
        assert_eq!(decoded.message_id, None);
        assert_eq!(decoded.sender, "unknown");
        assert_eq!(decoded.subject, NO_SUBJECT);
    }

    #[test]
    fn decode_blank_message_id_is_none() {
        assert_eq!(parse_message_id(b"Message-ID:   \n\nx"), None);
    }

    #[test]
    fn decode_empty_input_fails() {
        assert!(matches!(decode_message(b""), Err(DecodeError::Empty)));
        assert!(matches!(decode_message(b"\r\n  \r\n"), Err(DecodeError::Empty)));
    }
}
