//! Streaming line-oriented parser for CouchDB view payloads.
//!
//! The body arrives as UTF-8 text shaped like
//!
//! ```text
//! {"total_rows":N,"offset":K,"rows":[
//! {row JSON},
//! …
//! {row JSON}
//! ]}
//! ```
//!
//! and is consumed newline by newline: the opening line yields one
//! `metadata` event (some servers place the metadata after the rows
//! instead, which is also recognised), every row line yields a `row`
//! event and the framing lines are skipped. A row that fails to parse
//! terminates the sequence with an error. The parser is single pass and
//! keeps nothing but the current line in memory.

use crate::error::Error;
use crate::events::{EventSender, RequestEvent};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Opening line: `{…"rows":[` — possibly with an immediately-empty result
/// (`{…"rows":[]}`) on the same line. The captured prefix, if non-empty,
/// is the metadata object minus its braces.
fn opening_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\{(.*)"(?:rows|results)":\s*\[(?:\]\})?$"#).expect("opening regex is valid")
    })
}

/// Trailing metadata line, only emitted by non-standard servers that put
/// the metadata after the rows: `"total_rows":N}`.
fn trailing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^(".*)\}$"#).expect("trailing regex is valid"))
}

/// Outcome of parsing one line.
#[derive(Debug, PartialEq)]
pub enum ParsedLine {
    Metadata(Value),
    Row(Value),
    /// Framing (`]}`, `],`, empty) — nothing to report.
    Skip,
    /// Unparseable content; carries the offending line.
    Fail(String),
}

/// Stateless per-line classifier; the terminal flag lives in the driver.
#[must_use]
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.strip_suffix('\r').unwrap_or(line);

    if let Some(caps) = opening_regex().captures(line) {
        let prefix = caps.get(1).map_or("", |m| m.as_str());
        if prefix.is_empty() {
            return ParsedLine::Skip;
        }
        let object = format!("{{{}}}", prefix.trim_end_matches(','));
        return match serde_json::from_str(&object) {
            Ok(metadata) => ParsedLine::Metadata(metadata),
            Err(_) => ParsedLine::Fail(line.to_string()),
        };
    }

    if let Some(caps) = trailing_regex().captures(line) {
        let body = caps.get(1).map_or("", |m| m.as_str());
        let object = format!("{{{body}}}");
        return match serde_json::from_str(&object) {
            Ok(metadata) => ParsedLine::Metadata(metadata),
            Err(_) => ParsedLine::Fail(line.to_string()),
        };
    }

    if line.is_empty() || line == "]}" || line == "]," {
        return ParsedLine::Skip;
    }

    let row_text = line.strip_suffix(',').unwrap_or(line);
    match serde_json::from_str(row_text) {
        Ok(row) => ParsedLine::Row(row),
        Err(_) => ParsedLine::Fail(line.to_string()),
    }
}

/// Drive a response body stream through the parser, emitting `metadata`,
/// `row` and the terminal event on `events`.
pub async fn run<S>(body: S, events: &EventSender)
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    futures::pin_mut!(body);
    let mut carry: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                events.send(RequestEvent::Error(Error::from_transport(&err)));
                return;
            }
        };

        carry.extend_from_slice(&bytes);
        let mut lines: Vec<Vec<u8>> = carry.split(|b| *b == b'\n').map(<[u8]>::to_vec).collect();
        if let Some(partial) = lines.pop() {
            carry.clear();
            carry.extend_from_slice(&partial);
        }

        for line in lines {
            if deliver(&line, events) {
                return;
            }
        }
    }

    // The body may end without a trailing newline
    if !carry.is_empty() {
        let last = std::mem::take(&mut carry);
        if deliver(&last, events) {
            return;
        }
    }

    events.send(RequestEvent::End);
}

/// Classify one line and emit its event. Returns true when the sequence
/// terminated.
fn deliver(line: &[u8], events: &EventSender) -> bool {
    let text = String::from_utf8_lossy(line);
    match parse_line(&text) {
        ParsedLine::Metadata(metadata) => {
            events.send(RequestEvent::Metadata(metadata));
            false
        }
        ParsedLine::Row(row) => {
            events.send(RequestEvent::Row(row));
            false
        }
        ParsedLine::Skip => false,
        ParsedLine::Fail(bad_line) => {
            tracing::warn!(line = %bad_line, "unparseable view row");
            events.send(RequestEvent::Error(Error::row_parse_failed(bad_line)));
            true
        }
    }
}
