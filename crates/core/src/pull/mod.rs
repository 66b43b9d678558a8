//! Pull of forms and submissions from an Aggregate server.
//!
//! [`PullFromAggregate::pull`] builds the job graph for one form:
//!
//! ```text
//! download form definition ─┐
//! get submission id pages  ─┼─> download form attachments
//! get + filter manifest    ─┘   download unseen submissions ─> their attachments
//! ```
//!
//! Per-item failures are tracked and do not stop the pull. A missing form
//! definition or failed pagination fails it.

mod aggregate;
mod error;
mod submission;
pub mod tracker;

pub use aggregate::{PullFromAggregate, PullOptions, PullResult};
pub use error::PullError;
pub use submission::{parse_submission, DownloadedSubmission};
pub use tracker::{EventSink, FormStatus, ProgressEvent, ProgressKind, PullSummary, PullTracker};

use crate::config::PullConfig;
use crate::cursor::Cursor;

/// Cursor a pull starts from.
///
/// The stored cursor wins when resuming is enabled; otherwise the configured
/// start date (midnight UTC); otherwise the beginning.
pub fn resolve_start_cursor(config: &PullConfig, stored: Option<Cursor>) -> Cursor {
    if config.resume_from_last {
        if let Some(cursor) = stored.filter(|c| !c.is_empty()) {
            return cursor;
        }
    }
    config
        .start_from_date
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Cursor::from_date(midnight.and_utc()))
        .unwrap_or_default()
}
