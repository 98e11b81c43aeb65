//! Capability traits for the two record stores
//!
//! The sync core only ever talks to these. The HTTP adapters in
//! [`crate::asana`] and [`crate::slack`] implement them for production, and
//! [`crate::memory`] implements them for tests and dry runs.

use crate::error::ClientResult;
use listbridge_core::{Cell, CustomFieldDefinition, RowRecord, SectionRef, TrackerDraft, TrackerRecord};

#[async_trait::async_trait]
pub trait TrackerReadPort: Send + Sync {
    /// Full current state of one record.
    async fn get_record(&self, id: &str) -> ClientResult<TrackerRecord>;

    /// Sections of the configured project, in board order.
    async fn list_sections(&self) -> ClientResult<Vec<SectionRef>>;

    /// Custom field definitions attached to the configured project.
    async fn list_custom_fields(&self) -> ClientResult<Vec<CustomFieldDefinition>>;
}

#[async_trait::async_trait]
pub trait TrackerWritePort: Send + Sync {
    /// Create a record in `section_id`. Returns the record as stored,
    /// including its assigned id and permalink.
    async fn create_record(&self, section_id: &str, draft: &TrackerDraft) -> ClientResult<TrackerRecord>;

    async fn update_record(&self, id: &str, draft: &TrackerDraft) -> ClientResult<()>;

    async fn move_to_section(&self, id: &str, section_id: &str) -> ClientResult<()>;

    async fn complete_record(&self, id: &str) -> ClientResult<()>;

    async fn delete_record(&self, id: &str) -> ClientResult<()>;
}

#[async_trait::async_trait]
pub trait ListReadPort: Send + Sync {
    /// Every row of the list. Implementations follow pagination to the end.
    async fn list_rows(&self, list_id: &str) -> ClientResult<Vec<RowRecord>>;
}

#[async_trait::async_trait]
pub trait ListWritePort: Send + Sync {
    /// Create a row and return its assigned id.
    async fn create_row(&self, list_id: &str, cells: &[Cell]) -> ClientResult<String>;

    async fn update_row(&self, list_id: &str, row_id: &str, cells: &[Cell]) -> ClientResult<()>;

    async fn delete_row(&self, list_id: &str, row_id: &str) -> ClientResult<()>;
}

/// Read and write access to the tracker.
pub trait TrackerPort: TrackerReadPort + TrackerWritePort {}

impl<T: TrackerReadPort + TrackerWritePort + ?Sized> TrackerPort for T {}

/// Read and write access to the list.
pub trait ListPort: ListReadPort + ListWritePort {}

impl<T: ListReadPort + ListWritePort + ?Sized> ListPort for T {}
