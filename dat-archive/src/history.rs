//! History queries over the metadata log.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::engine::{ChangeType, Record};

/// An entry of an archive's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The path that changed.
    pub path: String,
    /// The version of the archive after the change.
    pub version: u64,
    /// Whether the path was written or deleted.
    #[serde(rename = "type")]
    pub change_type: ChangeType,
}

impl From<Record> for HistoryEntry {
    fn from(record: Record) -> Self {
        Self {
            path: record.name,
            version: record.version,
            change_type: record.change,
        }
    }
}

/// The log indices to read for a query, against a log of length `len`.
///
/// `start` defaults to `0` and `end` to `len`, an `end` of `0` also means `len`. For a
/// reverse query the bounds count from the end of the log: they are swapped and then
/// subtracted from `len`.
pub fn query_range(len: u64, start: Option<u64>, end: Option<u64>, reverse: bool) -> Range<u64> {
    let start = start.unwrap_or(0);
    let end = end.filter(|end| *end != 0).unwrap_or(len);
    let (start, end) = if reverse {
        (len.saturating_sub(end), len.saturating_sub(start))
    } else {
        (start, end)
    };
    let end = end.min(len);
    start.min(end)..end
}

/// Projects the records read for a query into history entries, in the requested order.
pub fn project(records: Vec<Record>, reverse: bool) -> Vec<HistoryEntry> {
    let mut entries: Vec<HistoryEntry> = records.into_iter().map(Into::into).collect();
    if reverse {
        entries.reverse();
    }
    entries
}
