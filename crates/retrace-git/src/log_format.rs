use retrace_core::CommitRecord;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::VcsError;

const RECORD_START: char = '\u{1e}';
const FIELD_SEP: char = '\u{1f}';
const HEADER_END: char = '\u{1d}';

/// `git log` format producing `RS hash US date US message GS` followed by the
/// `--name-only` file list.
pub(crate) const LOG_FORMAT: &str = "--format=%x1e%H%x1f%cI%x1f%B%x1d";

/// Parse `git log --name-only` output written with [`LOG_FORMAT`].
pub(crate) fn parse_log(output: &str) -> Result<Vec<CommitRecord>, VcsError> {
    output
        .split(RECORD_START)
        .filter(|chunk| !chunk.trim().is_empty())
        .map(parse_record)
        .collect()
}

fn parse_record(chunk: &str) -> Result<CommitRecord, VcsError> {
    let (header, files) = chunk
        .split_once(HEADER_END)
        .ok_or_else(|| VcsError::Parse("commit record without header terminator".into()))?;

    let mut fields = header.splitn(3, FIELD_SEP);
    let id = fields.next().unwrap_or("").trim();
    let date = fields.next().unwrap_or("").trim();
    let message = fields.next().unwrap_or("").trim_end();

    if id.is_empty() {
        return Err(VcsError::Parse("commit record without hash".into()));
    }
    let timestamp = OffsetDateTime::parse(date, &Rfc3339)
        .map_err(|e| VcsError::Parse(format!("bad commit date {date:?} for {id}: {e}")))?;

    let changed_paths = files
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    Ok(CommitRecord::new(id, message, timestamp, changed_paths))
}
