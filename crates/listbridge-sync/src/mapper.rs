//! Field mapping between tracker records and list rows
//!
//! [`FieldMapper`] holds the identifier maps built at startup and never
//! mutates them, so both directions are pure functions of their input.

use crate::schema::{self, STATUS};
use listbridge_core::{
    AttributeKind, AttributeValue, Cell, CellValue, ColumnMap, CustomFieldMap, DraftValue,
    LogicalKey, RowRecord, SectionMap, TrackerDraft, TrackerRecord, UserMap, slugify,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

pub const DEFAULT_LINK_TEXT: &str = "View in Asana";
pub const UNTITLED: &str = "Untitled Bug";

/// Tracker id embedded in a permalink: the trailing numeric path segment,
/// ignoring a `/f` focus suffix, a trailing slash, query or fragment.
pub fn tracker_id_from_link(link: &str) -> Option<String> {
    static TRAILING_ID: OnceLock<Option<Regex>> = OnceLock::new();
    let re = TRAILING_ID
        .get_or_init(|| Regex::new(r"/(\d+)(?:/f)?/?(?:[?#].*)?$").ok())
        .as_ref()?;
    re.captures(link.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// List value for a tracker enum label, if the field has a coding table and
/// the label is in it.
pub fn to_row_value(key: LogicalKey, label: &str) -> Option<&'static str> {
    schema::table_for(key)?.to_list(label)
}

/// Tracker label for a list value.
pub fn to_tracker_label(key: LogicalKey, value: &str) -> Option<&'static str> {
    schema::table_for(key)?.to_tracker(value)
}

fn number_text(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Clone, Debug)]
pub struct FieldMapper {
    columns: ColumnMap,
    sections: SectionMap,
    fields: CustomFieldMap,
    users: UserMap,
    link_text: String,
}

impl FieldMapper {
    pub fn new(columns: ColumnMap, sections: SectionMap, fields: CustomFieldMap) -> Self {
        Self {
            columns,
            sections,
            fields,
            users: UserMap::default(),
            link_text: DEFAULT_LINK_TEXT.to_string(),
        }
    }

    pub fn with_users(mut self, users: UserMap) -> Self {
        self.users = users;
        self
    }

    pub fn with_link_text(mut self, text: impl Into<String>) -> Self {
        self.link_text = text.into();
        self
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn sections(&self) -> &SectionMap {
        &self.sections
    }

    pub fn fields(&self) -> &CustomFieldMap {
        &self.fields
    }

    pub fn link_column(&self) -> Option<&str> {
        self.columns.get(LogicalKey::TrackerLink)
    }

    /// The link cell for a tracker permalink, if the list has a link column.
    pub fn link_cell(&self, permalink: &str) -> Option<Cell> {
        let column_id = self.link_column()?;
        Some(Cell::new(
            column_id,
            CellValue::Link {
                url: permalink.to_string(),
                text: Some(self.link_text.clone()),
            },
        ))
    }

    // ---------------------------------------------------------------
    // tracker → list
    // ---------------------------------------------------------------

    /// Cells for every logical key that has a column, in [`LogicalKey::ALL`]
    /// order. Values without a list counterpart are left out.
    pub fn to_row(&self, record: &TrackerRecord) -> Vec<Cell> {
        let mut cells = Vec::new();
        for key in LogicalKey::ALL {
            let Some(column_id) = self.columns.get(key) else {
                continue;
            };
            if let Some(value) = self.row_value(record, key) {
                cells.push(Cell::new(column_id, value));
            }
        }
        cells
    }

    fn row_value(&self, record: &TrackerRecord, key: LogicalKey) -> Option<CellValue> {
        match key {
            LogicalKey::Name => Some(CellValue::Text(record.name.clone())),
            LogicalKey::Description => {
                (!record.notes.is_empty()).then(|| CellValue::Text(record.notes.clone()))
            }
            LogicalKey::Status => {
                let section = record.section.as_ref()?;
                // Keyed by slug, the same key list→tracker resolves sections with.
                let slug = slugify(&section.name);
                match STATUS.values().find(|value| *value == slug) {
                    Some(value) => Some(CellValue::Select(value.to_string())),
                    None => {
                        warn!(record_id = %record.id, section = %section.name, "section has no status value, dropping cell");
                        None
                    }
                }
            }
            LogicalKey::Assignee => {
                let assignee = record.assignee.as_ref()?;
                match self.users.list_user(&assignee.id) {
                    Some(user) => Some(CellValue::User(user.to_string())),
                    None => {
                        debug!(record_id = %record.id, user = %assignee.id, "assignee has no list user");
                        None
                    }
                }
            }
            LogicalKey::Completed => Some(CellValue::Checkbox(record.completed)),
            LogicalKey::TrackerLink => {
                let url = record.permalink_url.as_ref()?;
                Some(CellValue::Link {
                    url: url.clone(),
                    text: Some(self.link_text.clone()),
                })
            }
            LogicalKey::CreatedAt => record
                .created_at
                .map(|ts| CellValue::Date(ts.date_naive())),
            _ => self.attribute_value(record, key),
        }
    }

    fn attribute_value(&self, record: &TrackerRecord, key: LogicalKey) -> Option<CellValue> {
        let field = record
            .custom_fields
            .iter()
            .find(|cf| LogicalKey::from_tracker_field_name(&cf.name) == Some(key))?;
        match &field.value {
            AttributeValue::Enum(label) => {
                let label = label.as_deref()?;
                match to_row_value(key, label) {
                    Some(value) => Some(CellValue::Select(value.to_string())),
                    None => {
                        warn!(record_id = %record.id, field = %field.name, label, "unmapped enum label, dropping cell");
                        None
                    }
                }
            }
            AttributeValue::Text(text) => text
                .as_ref()
                .filter(|t| !t.is_empty())
                .map(|t| CellValue::Text(t.clone())),
            AttributeValue::Number(n) => n.map(|n| CellValue::Text(number_text(n))),
        }
    }

    // ---------------------------------------------------------------
    // list → tracker
    // ---------------------------------------------------------------

    fn logical_key(&self, cell: &Cell) -> Option<LogicalKey> {
        self.columns
            .key_for(&cell.column_id)
            .or_else(|| cell.key.as_deref().and_then(LogicalKey::parse))
    }

    fn cells_by_key<'a>(&self, row: &'a RowRecord) -> BTreeMap<LogicalKey, &'a CellValue> {
        let mut by_key = BTreeMap::new();
        for cell in &row.cells {
            if let Some(key) = self.logical_key(cell) {
                by_key.entry(key).or_insert(&cell.value);
            }
        }
        by_key
    }

    /// Tracker id from the row's link cell.
    pub fn tracker_id(&self, row: &RowRecord) -> Option<String> {
        let cells = self.cells_by_key(row);
        cells
            .get(&LogicalKey::TrackerLink)
            .and_then(|v| v.as_text())
            .and_then(tracker_id_from_link)
    }

    /// Tracker write payload for a row. Never fails: missing pieces fall
    /// back (name, section) or are left out (custom fields, assignee).
    pub fn to_tracker(&self, row: &RowRecord) -> TrackerDraft {
        let cells = self.cells_by_key(row);
        let text = |key: LogicalKey| {
            cells
                .get(&key)
                .and_then(|v| v.as_text())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let name = text(LogicalKey::Name).unwrap_or(UNTITLED).to_string();
        let notes = text(LogicalKey::Description).unwrap_or_default().to_string();
        let section_id = self.sections.resolve(text(LogicalKey::Status)).to_string();

        let mut custom_fields = BTreeMap::new();
        for key in LogicalKey::ALL {
            let Some(field) = self.fields.get(key) else {
                continue;
            };
            let Some(value) = text(key) else {
                continue;
            };
            let draft_value = match field.kind {
                AttributeKind::Enum => {
                    let Some(label) = to_tracker_label(key, value) else {
                        debug!(row_id = %row.id, %key, value, "list value has no tracker label");
                        continue;
                    };
                    match self.fields.option_id(key, label) {
                        Some(option_id) => DraftValue::EnumOption(option_id.to_string()),
                        None => {
                            debug!(row_id = %row.id, %key, label, "tracker label has no enum option");
                            continue;
                        }
                    }
                }
                AttributeKind::Text => DraftValue::Text(value.to_string()),
                AttributeKind::Number => match value.parse::<f64>() {
                    Ok(n) => DraftValue::Number(n),
                    Err(_) => {
                        debug!(row_id = %row.id, %key, value, "not a number");
                        continue;
                    }
                },
                AttributeKind::Unsupported => continue,
            };
            custom_fields.insert(field.id.clone(), draft_value);
        }

        let assignee = match cells.get(&LogicalKey::Assignee) {
            Some(CellValue::User(user)) => {
                let mapped = self.users.tracker_user(user).map(str::to_string);
                if mapped.is_none() {
                    debug!(row_id = %row.id, user = %user, "list user has no tracker user");
                }
                mapped
            }
            _ => None,
        };

        let completed = matches!(cells.get(&LogicalKey::Completed), Some(CellValue::Checkbox(true)));

        TrackerDraft {
            name,
            notes,
            custom_fields,
            section_id,
            assignee,
            completed,
            tracker_id: self.tracker_id(row),
        }
    }
}
