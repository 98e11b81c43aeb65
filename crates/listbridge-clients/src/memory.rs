//! In-memory tracker and list, for tests and dry runs
//!
//! Both keep a journal of every port call and can be told to fail calls
//! that touch a given id, which surfaces as a transient API error.

use crate::error::{ClientError, ClientResult};
use crate::ports::{ListReadPort, ListWritePort, TrackerReadPort, TrackerWritePort};
use chrono::Utc;
use listbridge_core::{
    AttributeKind, AttributeValue, Cell, CustomFieldDefinition, CustomFieldValue, DraftValue,
    RowRecord, SectionRef, TrackerDraft, TrackerRecord, UserRef,
};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

pub const MEMORY_PERMALINK_BASE: &str = "https://app.asana.com/0/0";

fn injected(id: &str) -> ClientError {
    ClientError::api("memory", 503, format!("injected failure for {id}"))
}

// ============================================================
// Tracker
// ============================================================

#[derive(Clone, Debug, PartialEq)]
pub enum TrackerCall {
    GetRecord(String),
    ListSections,
    ListCustomFields,
    CreateRecord { section_id: String, draft: TrackerDraft },
    UpdateRecord { id: String, draft: TrackerDraft },
    MoveToSection { id: String, section_id: String },
    CompleteRecord(String),
    DeleteRecord(String),
}

#[derive(Default)]
struct TrackerState {
    records: BTreeMap<String, TrackerRecord>,
    calls: Vec<TrackerCall>,
    failing: HashSet<String>,
    next_id: u64,
}

pub struct MemoryTracker {
    sections: Vec<SectionRef>,
    fields: Vec<CustomFieldDefinition>,
    state: Mutex<TrackerState>,
}

impl MemoryTracker {
    pub fn new(sections: Vec<SectionRef>, fields: Vec<CustomFieldDefinition>) -> Self {
        Self {
            sections,
            fields,
            state: Mutex::new(TrackerState {
                next_id: 1000,
                ..Default::default()
            }),
        }
    }

    pub async fn insert(&self, record: TrackerRecord) {
        self.state.lock().await.records.insert(record.id.clone(), record);
    }

    pub async fn record(&self, id: &str) -> Option<TrackerRecord> {
        self.state.lock().await.records.get(id).cloned()
    }

    /// Every later call naming `id` fails.
    pub async fn fail_on(&self, id: impl Into<String>) {
        self.state.lock().await.failing.insert(id.into());
    }

    pub async fn calls(&self) -> Vec<TrackerCall> {
        self.state.lock().await.calls.clone()
    }

    /// Journal entries other than reads.
    pub async fn writes(&self) -> Vec<TrackerCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| {
                !matches!(
                    c,
                    TrackerCall::GetRecord(_) | TrackerCall::ListSections | TrackerCall::ListCustomFields
                )
            })
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    fn section(&self, id: &str) -> Option<SectionRef> {
        self.sections.iter().find(|s| s.id == id).cloned()
    }

    fn apply_draft(&self, record: &mut TrackerRecord, draft: &TrackerDraft) {
        record.name = draft.name.clone();
        record.notes = draft.notes.clone();
        if let Some(assignee) = &draft.assignee {
            record.assignee = Some(UserRef { id: assignee.clone(), name: None });
        }
        for (field_id, value) in &draft.custom_fields {
            let Some(def) = self.fields.iter().find(|f| &f.id == field_id) else {
                continue;
            };
            let value = match (def.kind, value) {
                (AttributeKind::Enum, DraftValue::EnumOption(option_id)) => AttributeValue::Enum(
                    def.enum_options
                        .iter()
                        .find(|o| &o.id == option_id)
                        .map(|o| o.name.clone()),
                ),
                (_, DraftValue::Text(s)) => AttributeValue::Text(Some(s.clone())),
                (_, DraftValue::Number(n)) => AttributeValue::Number(Some(*n)),
                (_, DraftValue::EnumOption(_)) => continue,
            };
            record.custom_fields.retain(|cf| &cf.field_id != field_id);
            record.custom_fields.push(CustomFieldValue {
                field_id: field_id.clone(),
                name: def.name.clone(),
                value,
            });
        }
        record.modified_at = Some(Utc::now());
    }
}

#[async_trait::async_trait]
impl TrackerReadPort for MemoryTracker {
    async fn get_record(&self, id: &str) -> ClientResult<TrackerRecord> {
        let mut state = self.state.lock().await;
        state.calls.push(TrackerCall::GetRecord(id.to_string()));
        if state.failing.contains(id) {
            return Err(injected(id));
        }
        state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("task {id}")))
    }

    async fn list_sections(&self) -> ClientResult<Vec<SectionRef>> {
        self.state.lock().await.calls.push(TrackerCall::ListSections);
        Ok(self.sections.clone())
    }

    async fn list_custom_fields(&self) -> ClientResult<Vec<CustomFieldDefinition>> {
        self.state.lock().await.calls.push(TrackerCall::ListCustomFields);
        Ok(self.fields.clone())
    }
}

#[async_trait::async_trait]
impl TrackerWritePort for MemoryTracker {
    async fn create_record(&self, section_id: &str, draft: &TrackerDraft) -> ClientResult<TrackerRecord> {
        let mut state = self.state.lock().await;
        state.calls.push(TrackerCall::CreateRecord {
            section_id: section_id.to_string(),
            draft: draft.clone(),
        });
        if state.failing.contains(section_id) {
            return Err(injected(section_id));
        }

        let id = state.next_id.to_string();
        state.next_id += 1;
        let now = Utc::now();
        let mut record = TrackerRecord {
            id: id.clone(),
            name: String::new(),
            notes: String::new(),
            completed: false,
            assignee: None,
            custom_fields: Vec::new(),
            section: self.section(section_id),
            created_at: Some(now),
            modified_at: Some(now),
            permalink_url: Some(format!("{MEMORY_PERMALINK_BASE}/{id}")),
        };
        self.apply_draft(&mut record, draft);
        state.records.insert(id, record.clone());
        Ok(record)
    }

    async fn update_record(&self, id: &str, draft: &TrackerDraft) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(TrackerCall::UpdateRecord {
            id: id.to_string(),
            draft: draft.clone(),
        });
        if state.failing.contains(id) {
            return Err(injected(id));
        }
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(format!("task {id}")))?;
        self.apply_draft(record, draft);
        Ok(())
    }

    async fn move_to_section(&self, id: &str, section_id: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(TrackerCall::MoveToSection {
            id: id.to_string(),
            section_id: section_id.to_string(),
        });
        if state.failing.contains(id) {
            return Err(injected(id));
        }
        let section = self
            .section(section_id)
            .ok_or_else(|| ClientError::NotFound(format!("section {section_id}")))?;
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(format!("task {id}")))?;
        record.section = Some(section);
        Ok(())
    }

    async fn complete_record(&self, id: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(TrackerCall::CompleteRecord(id.to_string()));
        if state.failing.contains(id) {
            return Err(injected(id));
        }
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(format!("task {id}")))?;
        record.completed = true;
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(TrackerCall::DeleteRecord(id.to_string()));
        if state.failing.contains(id) {
            return Err(injected(id));
        }
        state
            .records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("task {id}")))
    }
}

// ============================================================
// List
// ============================================================

#[derive(Clone, Debug, PartialEq)]
pub enum ListCall {
    ListRows(String),
    CreateRow { list_id: String, cells: Vec<Cell> },
    UpdateRow { list_id: String, row_id: String, cells: Vec<Cell> },
    DeleteRow { list_id: String, row_id: String },
}

#[derive(Default)]
struct ListState {
    rows: Vec<RowRecord>,
    calls: Vec<ListCall>,
    failing: HashSet<String>,
    fail_listing: bool,
    next_id: u64,
}

/// A single list whose rows are kept in insertion order.
#[derive(Default)]
pub struct MemoryList {
    state: Mutex<ListState>,
}

impl MemoryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<RowRecord>) -> Self {
        Self {
            state: Mutex::new(ListState {
                rows,
                ..Default::default()
            }),
        }
    }

    pub async fn insert(&self, row: RowRecord) {
        self.state.lock().await.rows.push(row);
    }

    pub async fn row(&self, id: &str) -> Option<RowRecord> {
        self.state.lock().await.rows.iter().find(|r| r.id == id).cloned()
    }

    pub async fn rows(&self) -> Vec<RowRecord> {
        self.state.lock().await.rows.clone()
    }

    /// Every later call naming `row_id` fails.
    pub async fn fail_on(&self, row_id: impl Into<String>) {
        self.state.lock().await.failing.insert(row_id.into());
    }

    /// Make `list_rows` fail until reset.
    pub async fn set_listing_fails(&self, fails: bool) {
        self.state.lock().await.fail_listing = fails;
    }

    pub async fn calls(&self) -> Vec<ListCall> {
        self.state.lock().await.calls.clone()
    }

    /// Journal entries other than reads.
    pub async fn writes(&self) -> Vec<ListCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| !matches!(c, ListCall::ListRows(_)))
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

#[async_trait::async_trait]
impl ListReadPort for MemoryList {
    async fn list_rows(&self, list_id: &str) -> ClientResult<Vec<RowRecord>> {
        let mut state = self.state.lock().await;
        state.calls.push(ListCall::ListRows(list_id.to_string()));
        if state.fail_listing {
            return Err(injected(list_id));
        }
        Ok(state.rows.clone())
    }
}

#[async_trait::async_trait]
impl ListWritePort for MemoryList {
    async fn create_row(&self, list_id: &str, cells: &[Cell]) -> ClientResult<String> {
        let mut state = self.state.lock().await;
        state.calls.push(ListCall::CreateRow {
            list_id: list_id.to_string(),
            cells: cells.to_vec(),
        });
        state.next_id += 1;
        let id = format!("Rec{:04}", state.next_id);
        state.rows.push(RowRecord {
            id: id.clone(),
            cells: cells.to_vec(),
            updated_at: Some(Utc::now()),
        });
        Ok(id)
    }

    async fn update_row(&self, list_id: &str, row_id: &str, cells: &[Cell]) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ListCall::UpdateRow {
            list_id: list_id.to_string(),
            row_id: row_id.to_string(),
            cells: cells.to_vec(),
        });
        if state.failing.contains(row_id) {
            return Err(injected(row_id));
        }
        let row = state
            .rows
            .iter_mut()
            .find(|r| r.id == row_id)
            .ok_or_else(|| ClientError::NotFound(format!("row {row_id}")))?;
        for cell in cells {
            match row.cells.iter_mut().find(|c| c.column_id == cell.column_id) {
                Some(existing) => existing.value = cell.value.clone(),
                None => row.cells.push(cell.clone()),
            }
        }
        row.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_row(&self, list_id: &str, row_id: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ListCall::DeleteRow {
            list_id: list_id.to_string(),
            row_id: row_id.to_string(),
        });
        if state.failing.contains(row_id) {
            return Err(injected(row_id));
        }
        let before = state.rows.len();
        state.rows.retain(|r| r.id != row_id);
        if state.rows.len() == before {
            return Err(ClientError::NotFound(format!("row {row_id}")));
        }
        Ok(())
    }
}
