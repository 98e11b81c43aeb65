//! Asana REST adapter for the tracker ports

use crate::error::{retry_after_ms, ClientError, ClientResult};
use crate::ports::{TrackerReadPort, TrackerWritePort};
use chrono::{DateTime, Utc};
use listbridge_core::config::DEFAULT_TRACKER_BASE_URL;
use listbridge_core::{
    AttributeKind, AttributeValue, CustomFieldDefinition, CustomFieldValue, DraftValue,
    EnumOption, SectionRef, TrackerDraft, TrackerRecord, UserRef, WebhookRegistration,
};
use reqwest::{Client, RequestBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

const SERVICE: &str = "asana";

const TASK_FIELDS: &str = "name,notes,completed,assignee,assignee.name,\
    custom_fields,custom_fields.name,custom_fields.type,custom_fields.enum_value,\
    custom_fields.enum_value.name,custom_fields.text_value,custom_fields.number_value,\
    memberships.project,memberships.section,memberships.section.name,\
    created_at,modified_at,permalink_url";

const PROJECT_FIELDS: &str = "custom_field_settings.custom_field,\
    custom_field_settings.custom_field.name,custom_field_settings.custom_field.type,\
    custom_field_settings.custom_field.enum_options,\
    custom_field_settings.custom_field.enum_options.name,\
    custom_field_settings.custom_field.enum_options.enabled";

/// Task events the bridge subscribes to.
pub const WEBHOOK_ACTIONS: [&str; 4] = ["changed", "added", "removed", "deleted"];

pub struct AsanaClient {
    client: Client,
    access_token: String,
    project_id: String,
    base_url: String,
}

impl AsanaClient {
    pub fn new(access_token: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            access_token: access_token.into(),
            project_id: project_id.into(),
            base_url: DEFAULT_TRACKER_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = request.bearer_auth(&self.access_token).send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry = retry_after_ms(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            error!("Asana error {}: {}", status, error_text);
            return Err(ClientError::from_status(SERVICE, status.as_u16(), error_text, retry));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ClientError::invalid_response(format!("asana: {e}")))?;
        Ok(envelope.data)
    }

    /// Register a webhook on the configured project for task events. The
    /// tracker performs the secret handshake against `target` before this
    /// call returns, so the gateway must already be reachable there.
    pub async fn create_webhook(&self, target: &str) -> ClientResult<WebhookRegistration> {
        let filters: Vec<Value> = WEBHOOK_ACTIONS
            .iter()
            .map(|action| json!({ "resource_type": "task", "action": action }))
            .collect();
        let body = json!({
            "data": {
                "resource": self.project_id,
                "target": target,
                "filters": filters,
            }
        });
        let raw: RawWebhook = self
            .send(self.client.post(self.url("/webhooks")).json(&body))
            .await?;
        Ok(WebhookRegistration {
            id: raw.gid,
            target: raw.target.unwrap_or_else(|| target.to_string()),
            active: raw.active.unwrap_or(false),
        })
    }

    fn draft_body(&self, draft: &TrackerDraft) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("name".into(), json!(draft.name));
        data.insert("notes".into(), json!(draft.notes));
        if !draft.custom_fields.is_empty() {
            let fields: Map<String, Value> = draft
                .custom_fields
                .iter()
                .map(|(id, v)| (id.clone(), draft_value_json(v)))
                .collect();
            data.insert("custom_fields".into(), Value::Object(fields));
        }
        if let Some(assignee) = &draft.assignee {
            data.insert("assignee".into(), json!(assignee));
        }
        data
    }
}

fn draft_value_json(value: &DraftValue) -> Value {
    match value {
        DraftValue::EnumOption(id) => json!(id),
        DraftValue::Text(s) => json!(s),
        DraftValue::Number(n) => json!(n),
    }
}

#[async_trait::async_trait]
impl TrackerReadPort for AsanaClient {
    async fn get_record(&self, id: &str) -> ClientResult<TrackerRecord> {
        debug!(record_id = id, "fetching task");
        let raw: RawTask = self
            .send(
                self.client
                    .get(self.url(&format!("/tasks/{id}")))
                    .query(&[("opt_fields", TASK_FIELDS)]),
            )
            .await?;
        Ok(raw.into_record(&self.project_id))
    }

    async fn list_sections(&self) -> ClientResult<Vec<SectionRef>> {
        let raw: Vec<RawCompact> = self
            .send(
                self.client
                    .get(self.url(&format!("/projects/{}/sections", self.project_id)))
                    .query(&[("opt_fields", "name")]),
            )
            .await?;
        Ok(raw.into_iter().map(RawCompact::into_section).collect())
    }

    async fn list_custom_fields(&self) -> ClientResult<Vec<CustomFieldDefinition>> {
        let raw: RawProject = self
            .send(
                self.client
                    .get(self.url(&format!("/projects/{}", self.project_id)))
                    .query(&[("opt_fields", PROJECT_FIELDS)]),
            )
            .await?;
        Ok(raw
            .custom_field_settings
            .into_iter()
            .map(|s| s.custom_field.into_definition())
            .collect())
    }
}

#[async_trait::async_trait]
impl TrackerWritePort for AsanaClient {
    async fn create_record(&self, section_id: &str, draft: &TrackerDraft) -> ClientResult<TrackerRecord> {
        let mut data = self.draft_body(draft);
        data.insert("projects".into(), json!([self.project_id]));
        data.insert(
            "memberships".into(),
            json!([{ "project": self.project_id, "section": section_id }]),
        );
        let raw: RawTask = self
            .send(
                self.client
                    .post(self.url("/tasks"))
                    .query(&[("opt_fields", TASK_FIELDS)])
                    .json(&json!({ "data": data })),
            )
            .await?;
        debug!(record_id = %raw.gid, section_id, "created task");
        Ok(raw.into_record(&self.project_id))
    }

    async fn update_record(&self, id: &str, draft: &TrackerDraft) -> ClientResult<()> {
        let data = self.draft_body(draft);
        let _: IgnoredAny = self
            .send(
                self.client
                    .put(self.url(&format!("/tasks/{id}")))
                    .json(&json!({ "data": data })),
            )
            .await?;
        Ok(())
    }

    async fn move_to_section(&self, id: &str, section_id: &str) -> ClientResult<()> {
        let _: IgnoredAny = self
            .send(
                self.client
                    .post(self.url(&format!("/sections/{section_id}/addTask")))
                    .json(&json!({ "data": { "task": id } })),
            )
            .await?;
        Ok(())
    }

    async fn complete_record(&self, id: &str) -> ClientResult<()> {
        let _: IgnoredAny = self
            .send(
                self.client
                    .put(self.url(&format!("/tasks/{id}")))
                    .json(&json!({ "data": { "completed": true } })),
            )
            .await?;
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> ClientResult<()> {
        let _: IgnoredAny = self
            .send(self.client.delete(self.url(&format!("/tasks/{id}"))))
            .await?;
        Ok(())
    }
}

// ============================================================
// Wire types
// ============================================================

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct RawCompact {
    gid: String,
    #[serde(default)]
    name: Option<String>,
}

impl RawCompact {
    fn into_section(self) -> SectionRef {
        SectionRef {
            id: self.gid,
            name: self.name.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct RawMembership {
    project: Option<RawCompact>,
    section: Option<RawCompact>,
}

#[derive(Deserialize)]
struct RawEnumOption {
    gid: String,
    #[serde(default)]
    name: String,
    #[serde(default = "enabled_default")]
    enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Deserialize)]
struct RawCustomField {
    gid: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    enum_value: Option<RawEnumOption>,
    text_value: Option<String>,
    number_value: Option<f64>,
    #[serde(default)]
    enum_options: Vec<RawEnumOption>,
}

impl RawCustomField {
    fn into_value(self) -> Option<CustomFieldValue> {
        let value = match AttributeKind::from_tracker_type(&self.kind) {
            AttributeKind::Enum => AttributeValue::Enum(self.enum_value.map(|o| o.name)),
            AttributeKind::Text => AttributeValue::Text(self.text_value),
            AttributeKind::Number => AttributeValue::Number(self.number_value),
            AttributeKind::Unsupported => return None,
        };
        Some(CustomFieldValue {
            field_id: self.gid,
            name: self.name,
            value,
        })
    }

    fn into_definition(self) -> CustomFieldDefinition {
        CustomFieldDefinition {
            id: self.gid,
            name: self.name,
            kind: AttributeKind::from_tracker_type(&self.kind),
            enum_options: self
                .enum_options
                .into_iter()
                .filter(|o| o.enabled)
                .map(|o| EnumOption { id: o.gid, name: o.name })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct RawCustomFieldSetting {
    custom_field: RawCustomField,
}

#[derive(Deserialize)]
struct RawProject {
    #[serde(default)]
    custom_field_settings: Vec<RawCustomFieldSetting>,
}

#[derive(Deserialize)]
struct RawTask {
    gid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    completed: bool,
    assignee: Option<RawCompact>,
    #[serde(default)]
    custom_fields: Vec<RawCustomField>,
    #[serde(default)]
    memberships: Vec<RawMembership>,
    created_at: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
    permalink_url: Option<String>,
}

impl RawTask {
    /// The primary section is the one held in `project_id`; a task that
    /// belongs to other projects too keeps only that membership.
    fn into_record(self, project_id: &str) -> TrackerRecord {
        let mut memberships = self.memberships;
        let position = memberships
            .iter()
            .position(|m| m.project.as_ref().is_some_and(|p| p.gid == project_id))
            .unwrap_or(0);
        let section = if memberships.is_empty() {
            None
        } else {
            memberships
                .swap_remove(position)
                .section
                .map(RawCompact::into_section)
        };

        TrackerRecord {
            id: self.gid,
            name: self.name,
            notes: self.notes,
            completed: self.completed,
            assignee: self.assignee.map(|a| UserRef { id: a.gid, name: a.name }),
            custom_fields: self
                .custom_fields
                .into_iter()
                .filter_map(RawCustomField::into_value)
                .collect(),
            section,
            created_at: self.created_at,
            modified_at: self.modified_at,
            permalink_url: self.permalink_url,
        }
    }
}

#[derive(Deserialize)]
struct RawWebhook {
    gid: String,
    target: Option<String>,
    active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_picks_membership_in_configured_project() {
        let raw: RawTask = serde_json::from_value(json!({
            "gid": "555",
            "name": "Login fails",
            "completed": false,
            "assignee": { "gid": "u1", "name": "Sam" },
            "memberships": [
                { "project": { "gid": "other" }, "section": { "gid": "x", "name": "Elsewhere" } },
                { "project": { "gid": "p1" }, "section": { "gid": "s1", "name": "Open Bugs" } }
            ],
            "custom_fields": [
                { "gid": "f1", "name": "Priority", "type": "enum", "enum_value": { "gid": "o1", "name": "High" } },
                { "gid": "f2", "name": "Version", "type": "text", "text_value": "1.2" },
                { "gid": "f3", "name": "Tags", "type": "multi_enum" }
            ],
            "created_at": "2024-03-05T23:30:00.000Z",
            "permalink_url": "https://app.asana.com/0/p1/555"
        }))
        .unwrap();

        let record = raw.into_record("p1");
        assert_eq!(record.section.as_ref().map(|s| s.id.as_str()), Some("s1"));
        assert_eq!(record.assignee.as_ref().map(|a| a.id.as_str()), Some("u1"));
        assert_eq!(record.custom_fields.len(), 2);
        assert_eq!(
            record.custom_field("Priority").map(|f| &f.value),
            Some(&AttributeValue::Enum(Some("High".into())))
        );
        assert!(record.notes.is_empty());
    }

    #[test]
    fn custom_field_definition_drops_disabled_options() {
        let raw: RawCustomField = serde_json::from_value(json!({
            "gid": "f1",
            "name": "Priority",
            "type": "enum",
            "enum_options": [
                { "gid": "o1", "name": "High", "enabled": true },
                { "gid": "o2", "name": "Legacy", "enabled": false },
                { "gid": "o3", "name": "Low" }
            ]
        }))
        .unwrap();
        let def = raw.into_definition();
        assert_eq!(def.kind, AttributeKind::Enum);
        let names: Vec<_> = def.enum_options.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["High", "Low"]);
    }

    #[test]
    fn draft_body_writes_option_ids() {
        let client = AsanaClient::new("tok", "p1");
        let draft = TrackerDraft {
            name: "Crash".into(),
            notes: String::new(),
            custom_fields: [("f1".to_string(), DraftValue::EnumOption("o1".into()))].into(),
            section_id: "s1".into(),
            assignee: None,
            completed: false,
            tracker_id: None,
        };
        let body = client.draft_body(&draft);
        assert_eq!(body["custom_fields"]["f1"], "o1");
        assert!(!body.contains_key("assignee"));
    }
}
