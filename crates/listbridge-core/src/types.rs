//! Record types for both sides of the bridge
//!
//! The tracker owns [`TrackerRecord`]s (tasks); the list owns [`RowRecord`]s.
//! The bridge only ever holds transient copies of either.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The system whose data drove a write, or that emitted a notification.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Tracker,
    List,
}

impl Source {
    pub fn opposite(self) -> Self {
        match self {
            Source::Tracker => Source::List,
            Source::List => Source::Tracker,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Tracker => "tracker",
            Source::List => "list",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable internal field names, independent of either system's identifiers.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum LogicalKey {
    Name,
    Description,
    Status,
    BugCategory,
    Priority,
    Severity,
    ReproRate,
    Platform,
    Version,
    Assignee,
    RegressionStatus,
    Completed,
    TrackerLink,
    CreatedAt,
}

impl LogicalKey {
    pub const ALL: [LogicalKey; 14] = [
        LogicalKey::Name,
        LogicalKey::Description,
        LogicalKey::Status,
        LogicalKey::BugCategory,
        LogicalKey::Priority,
        LogicalKey::Severity,
        LogicalKey::ReproRate,
        LogicalKey::Platform,
        LogicalKey::Version,
        LogicalKey::Assignee,
        LogicalKey::RegressionStatus,
        LogicalKey::Completed,
        LogicalKey::TrackerLink,
        LogicalKey::CreatedAt,
    ];

    /// Column key used by the list schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalKey::Name => "bug_name",
            LogicalKey::Description => "description",
            LogicalKey::Status => "status",
            LogicalKey::BugCategory => "bug_category",
            LogicalKey::Priority => "priority",
            LogicalKey::Severity => "severity",
            LogicalKey::ReproRate => "repro_rate",
            LogicalKey::Platform => "platform",
            LogicalKey::Version => "version",
            LogicalKey::Assignee => "assignee",
            LogicalKey::RegressionStatus => "regression_status",
            LogicalKey::Completed => "completed",
            LogicalKey::TrackerLink => "asana_link",
            LogicalKey::CreatedAt => "created_at",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Logical key for a tracker custom field, matched on the field's display name.
    pub fn from_tracker_field_name(name: &str) -> Option<Self> {
        match name.trim() {
            "Priority" => Some(LogicalKey::Priority),
            "Severity" => Some(LogicalKey::Severity),
            "Bug Category" => Some(LogicalKey::BugCategory),
            "Platform" => Some(LogicalKey::Platform),
            "Repro Rate" => Some(LogicalKey::ReproRate),
            "Regression Status" => Some(LogicalKey::RegressionStatus),
            "Version" | "Version (in-game)" => Some(LogicalKey::Version),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tracker side
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionRef {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub name: Option<String>,
}

/// A custom attribute value as it currently stands on a tracker record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    /// Label of the selected enum option, if any.
    Enum(Option<String>),
    Text(Option<String>),
    Number(Option<f64>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldValue {
    pub field_id: String,
    pub name: String,
    pub value: AttributeValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub completed: bool,
    pub assignee: Option<UserRef>,
    #[serde(default)]
    pub custom_fields: Vec<CustomFieldValue>,
    /// Primary section membership.
    pub section: Option<SectionRef>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub permalink_url: Option<String>,
}

impl TrackerRecord {
    pub fn custom_field(&self, name: &str) -> Option<&CustomFieldValue> {
        self.custom_fields.iter().find(|cf| cf.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Enum,
    Text,
    Number,
    Unsupported,
}

impl AttributeKind {
    pub fn from_tracker_type(s: &str) -> Self {
        match s {
            "enum" => AttributeKind::Enum,
            "text" => AttributeKind::Text,
            "number" => AttributeKind::Number,
            _ => AttributeKind::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnumOption {
    pub id: String,
    pub name: String,
}

/// Custom field definition from the tracker project's settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldDefinition {
    pub id: String,
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub enum_options: Vec<EnumOption>,
}

/// Value written into a tracker custom field.
#[derive(Clone, Debug, PartialEq)]
pub enum DraftValue {
    EnumOption(String),
    Text(String),
    Number(f64),
}

/// Tracker-side write payload produced from a list row.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerDraft {
    pub name: String,
    pub notes: String,
    /// Keyed by tracker custom field id.
    pub custom_fields: BTreeMap<String, DraftValue>,
    pub section_id: String,
    pub assignee: Option<String>,
    pub completed: bool,
    /// Counterpart id parsed from the row's link cell.
    pub tracker_id: Option<String>,
}

/// Webhook registration returned by the tracker. The signing secret is not
/// part of it; it only arrives in the handshake delivered to the target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub id: String,
    pub target: String,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// List side
// ---------------------------------------------------------------------------

/// Canonical typed cell value. Every list wire shape is normalised into one
/// of these at ingestion and encoded from one of these on write.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Text(String),
    Select(String),
    User(String),
    Link { url: String, text: Option<String> },
    Date(NaiveDate),
    Checkbox(bool),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) | CellValue::Select(s) | CellValue::User(s) => Some(s),
            CellValue::Link { url, .. } => Some(url),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub column_id: String,
    /// Column key reported by the list on read; not sent on write.
    pub key: Option<String>,
    pub value: CellValue,
}

impl Cell {
    pub fn new(column_id: impl Into<String>, value: CellValue) -> Self {
        Self {
            column_id: column_id.into(),
            key: None,
            value,
        }
    }

    pub fn keyed(column_id: impl Into<String>, key: impl Into<String>, value: CellValue) -> Self {
        Self {
            column_id: column_id.into(),
            key: Some(key.into()),
            value,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RowRecord {
    pub id: String,
    pub cells: Vec<Cell>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RowRecord {
    pub fn new(id: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            id: id.into(),
            cells,
            updated_at: None,
        }
    }

    pub fn cell(&self, column_id: &str) -> Option<&Cell> {
        self.cells.iter().find(|c| c.column_id == column_id)
    }
}
