//! Record correlation
//!
//! A row names its tracker record in its link cell, so list → tracker is a
//! direct read. The tracker has no back-link, so tracker → list scans the
//! list for the row whose link cell carries the record id.

use crate::error::SyncResult;
use crate::mapper::FieldMapper;
use listbridge_clients::ListPort;
use listbridge_core::RowRecord;
use std::sync::Arc;
use tracing::debug;

/// What we already know about the changed item.
#[derive(Clone, Copy, Debug)]
pub enum Subject<'a> {
    /// A tracker record id; its row must be looked up.
    Record(&'a str),
    /// A row already in hand.
    Row(&'a RowRecord),
}

pub struct RecordCorrelator {
    list: Arc<dyn ListPort>,
    list_id: String,
    mapper: Arc<FieldMapper>,
}

impl RecordCorrelator {
    pub fn new(list: Arc<dyn ListPort>, list_id: impl Into<String>, mapper: Arc<FieldMapper>) -> Self {
        Self {
            list,
            list_id: list_id.into(),
            mapper,
        }
    }

    /// Counterpart id for `subject`, or `None` when it has none yet. List
    /// read failures propagate; they never mean "no counterpart".
    pub async fn find_counterpart(&self, subject: Subject<'_>) -> SyncResult<Option<String>> {
        match subject {
            Subject::Record(record_id) => Ok(self.row_for_record(record_id).await?.map(|r| r.id)),
            Subject::Row(row) => Ok(self.record_for_row(row)),
        }
    }

    /// First row whose link cell points at `record_id`.
    pub async fn row_for_record(&self, record_id: &str) -> SyncResult<Option<RowRecord>> {
        let rows = self.list.list_rows(&self.list_id).await?;
        let found = rows
            .into_iter()
            .find(|row| self.mapper.tracker_id(row).as_deref() == Some(record_id));
        debug!(record_id, found = found.is_some(), "scanned list for counterpart");
        Ok(found)
    }

    pub fn record_for_row(&self, row: &RowRecord) -> Option<String> {
        self.mapper.tracker_id(row)
    }
}
