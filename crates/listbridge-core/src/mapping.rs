//! Identifier maps built once at startup
//!
//! - [`ColumnMap`]: logical key → list column id
//! - [`SectionMap`]: status key → tracker section id, with a fallback section
//! - [`CustomFieldMap`]: logical key → tracker custom field (id, kind, enum option ids)
//! - [`UserMap`]: tracker user id ↔ list user id

use crate::error::{Error, Result};
use crate::types::{
    AttributeKind, CustomFieldDefinition, LogicalKey, RowRecord, SectionRef,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Lowercase, collapse every run of non-alphanumerics into one `_`, trim `_`.
///
/// `"Needs More Info"` → `"needs_more_info"`, `"Version (in-game)"` → `"version_in_game"`.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// ColumnMap
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnMap {
    columns: BTreeMap<LogicalKey, String>,
}

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: LogicalKey, column_id: impl Into<String>) {
        self.columns.insert(key, column_id.into());
    }

    pub fn with(mut self, key: LogicalKey, column_id: impl Into<String>) -> Self {
        self.insert(key, column_id);
        self
    }

    pub fn get(&self, key: LogicalKey) -> Option<&str> {
        self.columns.get(&key).map(String::as_str)
    }

    /// Reverse lookup: which logical key a column id carries.
    pub fn key_for(&self, column_id: &str) -> Option<LogicalKey> {
        self.columns
            .iter()
            .find(|(_, id)| id.as_str() == column_id)
            .map(|(k, _)| *k)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogicalKey, &str)> {
        self.columns.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Build from explicit `key → column id` pairs. Unknown keys are skipped.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut map = Self::new();
        for (key, column_id) in pairs {
            match LogicalKey::parse(key) {
                Some(k) => map.insert(k, column_id),
                None => warn!(key, "unknown column key in explicit column map, skipping"),
            }
        }
        map
    }

    /// Derive from the keyed cells of existing rows. The first column id seen
    /// for a key wins.
    pub fn from_rows(rows: &[RowRecord]) -> Self {
        let mut map = Self::new();
        for cell in rows.iter().flat_map(|r| r.cells.iter()) {
            let Some(key) = cell.key.as_deref().and_then(LogicalKey::parse) else {
                continue;
            };
            map.columns
                .entry(key)
                .or_insert_with(|| cell.column_id.clone());
        }
        map
    }

    /// Entries from `overrides` replace entries in `self`.
    pub fn merge(mut self, overrides: &ColumnMap) -> Self {
        for (k, v) in overrides.iter() {
            self.columns.insert(k, v.to_string());
        }
        self
    }
}

// ---------------------------------------------------------------------------
// SectionMap
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct SectionMap {
    by_status: BTreeMap<String, String>,
    fallback: String,
}

impl SectionMap {
    /// Key every section by its slugified name. `default_status` names the
    /// fallback; if no section carries it, the first section is used instead.
    pub fn from_sections(sections: &[SectionRef], default_status: &str) -> Result<Self> {
        let first = sections
            .first()
            .ok_or_else(|| Error::config("tracker project has no sections"))?;

        let mut by_status = BTreeMap::new();
        for section in sections {
            by_status
                .entry(slugify(&section.name))
                .or_insert_with(|| section.id.clone());
        }

        let fallback = if by_status.contains_key(default_status) {
            default_status.to_string()
        } else {
            let first_key = slugify(&first.name);
            warn!(
                default_status,
                fallback = %first_key,
                "default status has no tracker section, falling back to first section"
            );
            first_key
        };

        Ok(Self { by_status, fallback })
    }

    /// Section id for a status value. Absent or unknown values resolve to the
    /// fallback section; this never fails.
    pub fn resolve(&self, status: Option<&str>) -> &str {
        status
            .and_then(|s| self.by_status.get(s))
            .or_else(|| self.by_status.get(&self.fallback))
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Status key for a section id, if the section is known.
    pub fn status_for_section(&self, section_id: &str) -> Option<&str> {
        self.by_status
            .iter()
            .find(|(_, id)| id.as_str() == section_id)
            .map(|(k, _)| k.as_str())
    }

    pub fn fallback_status(&self) -> &str {
        &self.fallback
    }

    pub fn len(&self) -> usize {
        self.by_status.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_status.is_empty()
    }
}

// ---------------------------------------------------------------------------
// CustomFieldMap
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerField {
    pub id: String,
    pub kind: AttributeKind,
    /// Enum option label → option id.
    pub options: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomFieldMap {
    fields: BTreeMap<LogicalKey, TrackerField>,
}

impl CustomFieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: LogicalKey, field: TrackerField) {
        self.fields.insert(key, field);
    }

    pub fn from_definitions(definitions: &[CustomFieldDefinition]) -> Self {
        let mut map = Self::new();
        for def in definitions {
            let Some(key) = LogicalKey::from_tracker_field_name(&def.name) else {
                debug!(field = %def.name, "tracker custom field has no logical key");
                continue;
            };
            let options = def
                .enum_options
                .iter()
                .map(|o| (o.name.clone(), o.id.clone()))
                .collect();
            map.insert(
                key,
                TrackerField {
                    id: def.id.clone(),
                    kind: def.kind,
                    options,
                },
            );
        }
        map
    }

    pub fn get(&self, key: LogicalKey) -> Option<&TrackerField> {
        self.fields.get(&key)
    }

    pub fn option_id(&self, key: LogicalKey, label: &str) -> Option<&str> {
        self.fields
            .get(&key)
            .and_then(|f| f.options.get(label))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// UserMap
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserMap {
    tracker_to_list: BTreeMap<String, String>,
}

impl UserMap {
    pub fn new(tracker_to_list: BTreeMap<String, String>) -> Self {
        Self { tracker_to_list }
    }

    pub fn list_user(&self, tracker_user: &str) -> Option<&str> {
        self.tracker_to_list.get(tracker_user).map(String::as_str)
    }

    pub fn tracker_user(&self, list_user: &str) -> Option<&str> {
        self.tracker_to_list
            .iter()
            .find(|(_, l)| l.as_str() == list_user)
            .map(|(t, _)| t.as_str())
    }

    pub fn len(&self) -> usize {
        self.tracker_to_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker_to_list.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, CellValue, EnumOption};

    fn section(id: &str, name: &str) -> SectionRef {
        SectionRef {
            id: id.into(),
            name: name.into(),
        }
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Open Bugs"), "open_bugs");
        assert_eq!(slugify("Needs More Info"), "needs_more_info");
        assert_eq!(slugify("Version (in-game)"), "version_in_game");
        assert_eq!(slugify("  --Fixed!! "), "fixed");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn section_map_unknown_status_uses_fallback() {
        let map = SectionMap::from_sections(
            &[section("s1", "Open Bugs"), section("s2", "Fixed")],
            "open_bugs",
        )
        .unwrap();
        assert_eq!(map.resolve(Some("fixed")), "s2");
        assert_eq!(map.resolve(Some("no_such_status")), "s1");
        assert_eq!(map.resolve(None), "s1");
        assert_eq!(map.status_for_section("s2"), Some("fixed"));
    }

    #[test]
    fn section_map_missing_default_falls_back_to_first_section() {
        let map = SectionMap::from_sections(&[section("s9", "Backlog")], "open_bugs").unwrap();
        assert_eq!(map.fallback_status(), "backlog");
        assert_eq!(map.resolve(Some("whatever")), "s9");
    }

    #[test]
    fn section_map_requires_sections() {
        assert!(SectionMap::from_sections(&[], "open_bugs").is_err());
    }

    #[test]
    fn column_map_from_rows_unions_keys() {
        let rows = vec![
            RowRecord::new(
                "r1",
                vec![Cell::keyed("C1", "bug_name", CellValue::Text("a".into()))],
            ),
            RowRecord::new(
                "r2",
                vec![
                    Cell::keyed("C1", "bug_name", CellValue::Text("b".into())),
                    Cell::keyed("C2", "status", CellValue::Select("fixed".into())),
                    Cell::keyed("C3", "mystery", CellValue::Checkbox(true)),
                ],
            ),
        ];
        let map = ColumnMap::from_rows(&rows);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(LogicalKey::Status), Some("C2"));
        assert_eq!(map.key_for("C1"), Some(LogicalKey::Name));
    }

    #[test]
    fn column_map_merge_prefers_overrides() {
        let sampled = ColumnMap::new().with(LogicalKey::Name, "C1");
        let explicit = ColumnMap::from_pairs([("bug_name", "X1"), ("bogus", "X2")]);
        let merged = sampled.merge(&explicit);
        assert_eq!(merged.get(LogicalKey::Name), Some("X1"));
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn custom_field_map_indexes_options() {
        let defs = vec![
            CustomFieldDefinition {
                id: "f1".into(),
                name: "Priority".into(),
                kind: AttributeKind::Enum,
                enum_options: vec![EnumOption {
                    id: "o1".into(),
                    name: "High".into(),
                }],
            },
            CustomFieldDefinition {
                id: "f2".into(),
                name: "Estimated Hours".into(),
                kind: AttributeKind::Number,
                enum_options: vec![],
            },
        ];
        let map = CustomFieldMap::from_definitions(&defs);
        assert_eq!(map.len(), 1);
        assert_eq!(map.option_id(LogicalKey::Priority, "High"), Some("o1"));
        assert_eq!(map.option_id(LogicalKey::Priority, "Low"), None);
    }

    #[test]
    fn user_map_is_bidirectional() {
        let users = UserMap::new(BTreeMap::from([("u-tracker".to_string(), "U123".to_string())]));
        assert_eq!(users.list_user("u-tracker"), Some("U123"));
        assert_eq!(users.tracker_user("U123"), Some("u-tracker"));
        assert_eq!(users.tracker_user("U999"), None);
    }
}
