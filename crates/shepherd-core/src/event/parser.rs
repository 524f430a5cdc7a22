//! Decoding of `events.jsonl` content.
//!
//! Only newline-terminated lines are records. Bytes after the last newline
//! are a torn write from a crashed appender and are reported, not parsed.
//! Blank lines are skipped. Any other line that fails to decode is an error,
//! since it sits inside history that later records build on.

use std::str::FromStr;

use super::{Event, EventData, EventType, RawRecord};
use super::data::DataParseError;
use super::types::UnknownEventType;

/// Why a single line failed to decode.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    UnknownType(#[from] UnknownEventType),

    #[error(transparent)]
    Payload(#[from] DataParseError),

    #[error("sequence numbers start at 1")]
    ZeroSeq,

    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// A line-level failure inside a log.
#[derive(Debug, thiserror::Error)]
#[error("line {line}: {source}")]
pub struct LineError {
    /// 1-based line number.
    pub line: usize,
    #[source]
    pub source: ParseError,
}

/// Result of decoding a whole log.
#[derive(Debug, Default)]
pub struct ParsedLog {
    /// Events in file order.
    pub events: Vec<Event>,
    /// Length in bytes of a trailing fragment with no newline, if any.
    pub torn_tail: Option<usize>,
}

/// Decode one record line (without its trailing newline).
///
/// # Errors
///
/// Returns [`ParseError`] for malformed JSON, an unknown `type` tag, a
/// payload that does not match its type, or a zero sequence number.
pub fn parse_line(line: &str) -> Result<Event, ParseError> {
    let raw: RawRecord = serde_json::from_str(line)?;
    from_raw(raw)
}

pub(crate) fn from_raw(raw: RawRecord) -> Result<Event, ParseError> {
    if raw.seq == 0 {
        return Err(ParseError::ZeroSeq);
    }
    let event_type = EventType::from_str(&raw.event_type)?;
    let data = EventData::deserialize_for(event_type, raw.payload)?;
    Ok(Event {
        seq: raw.seq,
        created_at: raw.created_at,
        data,
    })
}

/// Decode the full content of a log file.
///
/// # Errors
///
/// Returns [`LineError`] for the first complete line that fails to decode.
pub fn parse_log(content: &str) -> Result<ParsedLog, LineError> {
    let (complete, fragment) = match content.rfind('\n') {
        Some(pos) => content.split_at(pos + 1),
        None => ("", content),
    };

    let mut events = Vec::new();
    for (idx, line) in complete.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event = parse_line(trimmed).map_err(|source| LineError {
            line: idx + 1,
            source,
        })?;
        events.push(event);
    }

    Ok(ParsedLog {
        events,
        torn_tail: (!fragment.is_empty()).then_some(fragment.len()),
    })
}

/// Decode raw log bytes.
///
/// The trailing fragment is cut off before UTF-8 decoding, so a crash in
/// the middle of a multi-byte character only loses that fragment.
///
/// # Errors
///
/// Returns [`LineError`] for invalid UTF-8 or an undecodable line within
/// the complete prefix.
pub fn parse_log_bytes(content: &[u8]) -> Result<ParsedLog, LineError> {
    let split = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);
    let (complete, fragment) = content.split_at(split);

    let text = std::str::from_utf8(complete).map_err(|err| LineError {
        line: complete[..err.valid_up_to()]
            .iter()
            .filter(|b| **b == b'\n')
            .count()
            + 1,
        source: ParseError::Utf8(err),
    })?;
    let mut parsed = parse_log(text)?;
    parsed.torn_tail = (!fragment.is_empty()).then_some(fragment.len());
    Ok(parsed)
}
