//! Torn-write repair for event logs.
//!
//! A process that dies mid-append can leave bytes after the last newline.
//! Readers ignore that fragment, but the next appender must cut it off
//! before writing, otherwise its record would be glued onto the fragment
//! and turn into an interior malformed line.

use std::fs;
use std::io;
use std::path::Path;

/// Truncate `path` to its last newline.
///
/// Returns the number of bytes removed; `0` when the file is missing, empty
/// or already ends with a newline. Must only be called while holding the
/// job's append lock.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read or truncated.
pub fn repair_torn_tail(path: &Path) -> io::Result<u64> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };
    if content.is_empty() || content.last() == Some(&b'\n') {
        return Ok(0);
    }

    let truncate_to = content
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1);
    let bytes_removed = (content.len() - truncate_to) as u64;

    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_len(truncate_to as u64)?;
    file.sync_data()?;

    tracing::warn!(
        path = %path.display(),
        bytes_removed,
        "torn write repaired: truncated incomplete trailing line"
    );

    Ok(bytes_removed)
}
