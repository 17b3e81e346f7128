//! Failed-attempt reports ("postmortems").
//!
//! A report is a markdown file under `<repo-root>/failed_attempts/`, named
//! `<YYYYMMDD_HHMMSS>_<slug>.md`. Reports are created once and never
//! rewritten.

mod report;

pub use report::{list, render, report_file_stem, slugify_query, write, PostmortemInput, ReportSummary};

use time::OffsetDateTime;

/// Wall-clock time used for report names: local time when the offset can
/// be determined, UTC otherwise.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
