//! Change routing
//!
//! One handler per origin. For each changed subject the router:
//!
//! 1. drops it if the echo detector says it mirrors our own write
//! 2. re-reads the subject from its origin
//! 3. finds the counterpart and updates it, or creates one and writes the
//!    link back so later changes correlate
//! 4. marks the write target so the mirrored notification is dropped
//!
//! Subjects in a delivery are handled in order. A failure is recorded in
//! the [`BatchReport`] and the next subject is handled as usual.

use crate::correlator::{RecordCorrelator, Subject};
use crate::echo::EchoDetector;
use crate::error::{SyncError, SyncResult};
use crate::mapper::FieldMapper;
use listbridge_clients::{ListPort, TrackerPort};
use listbridge_core::{ChangeAction, ListChange, RowRecord, Source, TrackerChange};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// What happened to one subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Created { target_id: String },
    Updated { target_id: String },
    Deleted { target_id: String },
    IgnoredEcho,
    Skipped(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub subject_id: String,
    pub error: String,
    pub transient: bool,
}

/// Per-delivery tally.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub ignored_echo: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<RecordFailure>,
}

impl BatchReport {
    pub fn record(&mut self, subject_id: &str, result: SyncResult<Outcome>) {
        match result {
            Ok(Outcome::Created { .. }) => self.created += 1,
            Ok(Outcome::Updated { .. }) => self.updated += 1,
            Ok(Outcome::Deleted { .. }) => self.deleted += 1,
            Ok(Outcome::IgnoredEcho) => self.ignored_echo += 1,
            Ok(Outcome::Skipped(_)) => self.skipped += 1,
            Err(e) => self.fail(subject_id, &e),
        }
    }

    fn fail(&mut self, subject_id: &str, e: &SyncError) {
        self.failed += 1;
        self.errors.push(RecordFailure {
            subject_id: subject_id.to_string(),
            error: e.to_string(),
            transient: e.is_transient(),
        });
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted + self.ignored_echo + self.skipped + self.failed
    }

    pub fn log(&self, origin: Source) {
        info!(
            %origin,
            created = self.created,
            updated = self.updated,
            deleted = self.deleted,
            ignored_echo = self.ignored_echo,
            skipped = self.skipped,
            failed = self.failed,
            "delivery processed"
        );
    }
}

pub struct ChangeRouter {
    tracker: Arc<dyn TrackerPort>,
    list: Arc<dyn ListPort>,
    list_id: String,
    mapper: Arc<FieldMapper>,
    echo: Arc<EchoDetector>,
    correlator: RecordCorrelator,
    settle_delay: Duration,
}

impl ChangeRouter {
    pub fn new(
        tracker: Arc<dyn TrackerPort>,
        list: Arc<dyn ListPort>,
        list_id: impl Into<String>,
        mapper: Arc<FieldMapper>,
        echo: Arc<EchoDetector>,
    ) -> Self {
        let list_id = list_id.into();
        let correlator = RecordCorrelator::new(list.clone(), list_id.clone(), mapper.clone());
        Self {
            tracker,
            list,
            list_id,
            mapper,
            echo,
            correlator,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn echo(&self) -> &Arc<EchoDetector> {
        &self.echo
    }

    pub fn mapper(&self) -> &Arc<FieldMapper> {
        &self.mapper
    }

    pub fn list_id(&self) -> &str {
        &self.list_id
    }

    // ============================================================
    // tracker → list
    // ============================================================

    pub async fn handle_tracker_changes(&self, changes: &[TrackerChange]) -> BatchReport {
        let mut report = BatchReport::default();
        for change in changes {
            let result = self.handle_tracker_change(change).await;
            if let Err(e) = &result {
                error!(record_id = %change.record_id, action = change.action.as_str(), "tracker change failed: {}", e);
            }
            report.record(&change.record_id, result);
        }
        report.log(Source::Tracker);
        report
    }

    pub async fn handle_tracker_change(&self, change: &TrackerChange) -> SyncResult<Outcome> {
        let record_id = change.record_id.as_str();
        if self.echo.should_ignore(record_id, Source::Tracker) {
            trace!(record_id, "ignoring echo of our own tracker write");
            return Ok(Outcome::IgnoredEcho);
        }

        match change.action {
            ChangeAction::Removed => self.remove_row_for(record_id).await,
            ChangeAction::Created | ChangeAction::Changed => self.mirror_record(record_id).await,
        }
    }

    async fn remove_row_for(&self, record_id: &str) -> SyncResult<Outcome> {
        let Some(row) = self.correlator.row_for_record(record_id).await? else {
            debug!(record_id, "removed record has no row");
            return Ok(Outcome::Skipped("no counterpart row"));
        };
        self.list.delete_row(&self.list_id, &row.id).await?;
        self.echo.mark_write(&row.id, Source::Tracker);
        info!(record_id, row_id = %row.id, "deleted row");
        Ok(Outcome::Deleted { target_id: row.id })
    }

    async fn mirror_record(&self, record_id: &str) -> SyncResult<Outcome> {
        let record = self.tracker.get_record(record_id).await?;
        let cells = self.mapper.to_row(&record);

        if let Some(row_id) = self.correlator.find_counterpart(Subject::Record(record_id)).await? {
            self.list.update_row(&self.list_id, &row_id, &cells).await?;
            self.echo.mark_write(&row_id, Source::Tracker);
            info!(record_id, row_id = %row_id, cells = cells.len(), "updated row");
            return Ok(Outcome::Updated { target_id: row_id });
        }

        let link_column = self.mapper.link_column();
        let initial: Vec<_> = cells
            .into_iter()
            .filter(|c| Some(c.column_id.as_str()) != link_column)
            .collect();
        let row_id = self.list.create_row(&self.list_id, &initial).await?;
        self.echo.mark_write(&row_id, Source::Tracker);

        match record.permalink_url.as_deref().and_then(|url| self.mapper.link_cell(url)) {
            Some(link) => {
                self.list.update_row(&self.list_id, &row_id, &[link]).await?;
                self.echo.mark_write(&row_id, Source::Tracker);
            }
            None => warn!(record_id, row_id = %row_id, "no link written; later changes will not correlate"),
        }

        info!(record_id, row_id = %row_id, "created row");
        Ok(Outcome::Created { target_id: row_id })
    }

    // ============================================================
    // list → tracker
    // ============================================================

    /// Re-read the whole list after a change notification and mirror every
    /// row that is not an echo.
    pub async fn handle_list_change(&self, change: &ListChange) -> BatchReport {
        let mut report = BatchReport::default();
        if change.list_id != self.list_id {
            debug!(list_id = %change.list_id, "ignoring change for another list");
            return report;
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let rows = match self.list.list_rows(&self.list_id).await {
            Ok(rows) => rows,
            Err(e) => {
                let e = SyncError::from(e);
                error!(list_id = %self.list_id, "could not read list: {}", e);
                report.fail(&self.list_id, &e);
                report.log(Source::List);
                return report;
            }
        };

        for row in &rows {
            let result = self.handle_row(row).await;
            if let Err(e) = &result {
                error!(row_id = %row.id, "row sync failed: {}", e);
            }
            report.record(&row.id, result);
        }
        report.log(Source::List);
        report
    }

    pub async fn handle_row(&self, row: &RowRecord) -> SyncResult<Outcome> {
        if self.echo.should_ignore(&row.id, Source::List) {
            trace!(row_id = %row.id, "ignoring echo of our own list write");
            return Ok(Outcome::IgnoredEcho);
        }

        let draft = self.mapper.to_tracker(row);

        if let Some(record_id) = self.correlator.find_counterpart(Subject::Row(row)).await? {
            // Each landed write is marked before the next one can fail.
            self.tracker.update_record(&record_id, &draft).await?;
            self.echo.mark_write(&record_id, Source::List);
            self.tracker.move_to_section(&record_id, &draft.section_id).await?;
            self.echo.mark_write(&record_id, Source::List);
            if draft.completed {
                self.tracker.complete_record(&record_id).await?;
                self.echo.mark_write(&record_id, Source::List);
            }
            info!(row_id = %row.id, record_id = %record_id, "updated tracker record");
            return Ok(Outcome::Updated { target_id: record_id });
        }

        let created = self.tracker.create_record(&draft.section_id, &draft).await?;
        self.echo.mark_write(&created.id, Source::List);

        match created.permalink_url.as_deref().and_then(|url| self.mapper.link_cell(url)) {
            Some(link) => {
                self.list.update_row(&self.list_id, &row.id, &[link]).await?;
                self.echo.mark_write(&row.id, Source::Tracker);
            }
            None => warn!(row_id = %row.id, record_id = %created.id, "no link written; later changes will not correlate"),
        }

        if draft.completed {
            self.tracker.complete_record(&created.id).await?;
            self.echo.mark_write(&created.id, Source::List);
        }

        info!(row_id = %row.id, record_id = %created.id, "created tracker record");
        Ok(Outcome::Created { target_id: created.id })
    }
}
