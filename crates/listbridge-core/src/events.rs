//! Inbound webhook payloads, validated into strongly-typed changes
//!
//! Tracker delivery:
//!   { "events": [ { "action": "changed", "resource": { "gid": "123", "resource_type": "task" } } ] }
//!
//! List delivery (Events API envelope):
//!   { "type": "url_verification", "challenge": "abc" }
//!   { "type": "event_callback", "event": { "type": "file_change", "file_id": "F123" } }
//!
//! Payload field values are never treated as authoritative; a change only
//! says "this subject changed, go re-fetch it".

use crate::error::{Error, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Validated events
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeAction {
    Created,
    Changed,
    Removed,
}

impl ChangeAction {
    pub fn from_tracker_action(action: &str) -> Option<Self> {
        match action {
            "added" => Some(ChangeAction::Created),
            "changed" => Some(ChangeAction::Changed),
            "removed" | "deleted" => Some(ChangeAction::Removed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Created => "created",
            ChangeAction::Changed => "changed",
            ChangeAction::Removed => "removed",
        }
    }
}

/// A tracker record that changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerChange {
    pub record_id: String,
    pub action: ChangeAction,
}

impl TrackerChange {
    pub fn new(record_id: impl Into<String>, action: ChangeAction) -> Self {
        Self {
            record_id: record_id.into(),
            action,
        }
    }
}

/// Something in a list changed; the whole list must be re-read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListChange {
    pub list_id: String,
}

// ---------------------------------------------------------------------------
// Tracker wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerWebhookPayload {
    #[serde(default)]
    pub events: Vec<RawTrackerEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTrackerEvent {
    #[serde(default)]
    pub action: String,
    pub resource: Option<RawResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawResource {
    pub gid: String,
    #[serde(default)]
    pub resource_type: String,
}

impl TrackerWebhookPayload {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| Error::invalid_payload(format!("tracker webhook: {e}")))
    }

    /// Task events with a recognised action, in delivery order. Everything
    /// else is dropped here.
    pub fn into_changes(self) -> Vec<TrackerChange> {
        self.events
            .into_iter()
            .filter_map(|event| {
                let resource = event.resource?;
                if resource.resource_type != "task" || resource.gid.is_empty() {
                    return None;
                }
                let action = ChangeAction::from_tracker_action(&event.action)?;
                Some(TrackerChange::new(resource.gid, action))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// List wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ListEnvelope {
    UrlVerification { challenge: String },
    EventCallback { event: RawListEvent },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct RawListEvent {
    #[serde(rename = "type", default)]
    kind: String,
    file_id: Option<String>,
    file: Option<RawFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawFile {
    id: String,
}

/// What a list delivery asks of us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListDelivery {
    /// Endpoint verification; echo the challenge back.
    Challenge(String),
    Change(ListChange),
    /// Valid envelope we have no use for.
    Ignored(String),
}

impl ListDelivery {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let envelope: ListEnvelope = serde_json::from_slice(body)
            .map_err(|e| Error::invalid_payload(format!("list event: {e}")))?;
        match envelope {
            ListEnvelope::UrlVerification { challenge } => Ok(ListDelivery::Challenge(challenge)),
            ListEnvelope::EventCallback { event } => {
                if event.kind != "file_change" {
                    return Ok(ListDelivery::Ignored(format!("event type {}", event.kind)));
                }
                let list_id = event
                    .file
                    .map(|f| f.id)
                    .or(event.file_id)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| Error::invalid_payload("file_change without file id"))?;
                Ok(ListDelivery::Change(ListChange { list_id }))
            }
            ListEnvelope::Other => Ok(ListDelivery::Ignored("envelope type".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_payload_keeps_only_task_events_in_order() {
        let body = br#"{"events":[
            {"action":"changed","resource":{"gid":"1","resource_type":"task"}},
            {"action":"changed","resource":{"gid":"2","resource_type":"story"}},
            {"action":"added","resource":{"gid":"3","resource_type":"task"}},
            {"action":"undeleted","resource":{"gid":"4","resource_type":"task"}},
            {"action":"deleted","resource":{"gid":"5","resource_type":"task"}},
            {"action":"changed"}
        ]}"#;
        let changes = TrackerWebhookPayload::parse(body).unwrap().into_changes();
        assert_eq!(
            changes,
            vec![
                TrackerChange::new("1", ChangeAction::Changed),
                TrackerChange::new("3", ChangeAction::Created),
                TrackerChange::new("5", ChangeAction::Removed),
            ]
        );
    }

    #[test]
    fn tracker_payload_without_events_is_empty() {
        let changes = TrackerWebhookPayload::parse(b"{}").unwrap().into_changes();
        assert!(changes.is_empty());
    }

    #[test]
    fn tracker_payload_rejects_garbage() {
        assert!(TrackerWebhookPayload::parse(b"not json").is_err());
    }

    #[test]
    fn list_url_verification() {
        let d = ListDelivery::parse(br#"{"type":"url_verification","challenge":"xyz"}"#).unwrap();
        assert_eq!(d, ListDelivery::Challenge("xyz".into()));
    }

    #[test]
    fn list_file_change_reads_nested_or_flat_file_id() {
        let nested = br#"{"type":"event_callback","event":{"type":"file_change","file":{"id":"F1"}}}"#;
        let flat = br#"{"type":"event_callback","event":{"type":"file_change","file_id":"F2"}}"#;
        assert_eq!(
            ListDelivery::parse(nested).unwrap(),
            ListDelivery::Change(ListChange { list_id: "F1".into() })
        );
        assert_eq!(
            ListDelivery::parse(flat).unwrap(),
            ListDelivery::Change(ListChange { list_id: "F2".into() })
        );
    }

    #[test]
    fn list_other_events_are_ignored() {
        let d = ListDelivery::parse(br#"{"type":"event_callback","event":{"type":"message"}}"#)
            .unwrap();
        assert!(matches!(d, ListDelivery::Ignored(_)));
        let d = ListDelivery::parse(br#"{"type":"app_rate_limited"}"#).unwrap();
        assert!(matches!(d, ListDelivery::Ignored(_)));
    }

    #[test]
    fn list_file_change_without_id_is_invalid() {
        let body = br#"{"type":"event_callback","event":{"type":"file_change"}}"#;
        assert!(ListDelivery::parse(body).is_err());
    }
}
