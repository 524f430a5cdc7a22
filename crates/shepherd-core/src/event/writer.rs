//! Encoding of events into log lines.

use super::Event;

/// Serialize an event as a single newline-terminated JSON line.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized.
pub fn encode_line(event: &Event) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(event)?;
    debug_assert!(!line.contains('\n'), "compact JSON never contains newlines");
    line.push('\n');
    Ok(line)
}
