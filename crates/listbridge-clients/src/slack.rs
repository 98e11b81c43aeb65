//! Slack Lists Web API adapter for the list ports, plus the cell codec
//!
//! Writes always use one canonical shape per cell type:
//!
//! | CellValue | wire |
//! |---|---|
//! | Text | `rich_text: [block]` |
//! | Select | `select: [value]` |
//! | User | `user: [id]` |
//! | Link | `link: [{ original_url, display_as_url: false, display_name }]` |
//! | Date | `date: ["YYYY-MM-DD"]` |
//! | Checkbox | `checkbox: bool` |
//!
//! Reads are lenient: arrays or scalars, camelCase link members, and the
//! older `{ url, text }` link object all decode to the same [`CellValue`].

use crate::error::{retry_after_ms, ClientError, ClientResult};
use crate::ports::{ListReadPort, ListWritePort};
use chrono::{DateTime, NaiveDate, Utc};
use listbridge_core::config::DEFAULT_LIST_BASE_URL;
use listbridge_core::{Cell, CellValue, RowRecord};
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

const SERVICE: &str = "slack";
const PAGE_SIZE: u32 = 100;
const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SlackListClient {
    client: Client,
    bot_token: String,
    base_url: String,
}

impl SlackListClient {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            bot_token: bot_token.into(),
            base_url: DEFAULT_LIST_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn call(&self, method: &str, body: Value) -> ClientResult<Value> {
        debug!(method, "slack api call");
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let retry = retry_after_ms(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            error!("Slack error {}: {}", status, error_text);
            return Err(ClientError::from_status(SERVICE, status.as_u16(), error_text, retry));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ClientError::invalid_response(format!("slack {method}: {e}")))?;
        if payload["ok"].as_bool() != Some(true) {
            let code = payload["error"].as_str().unwrap_or("unknown_error");
            error!(method, code, "Slack call rejected");
            return Err(api_error(code));
        }
        Ok(payload)
    }
}

/// Slack reports failures as `ok: false` with an error code on a 200.
fn api_error(code: &str) -> ClientError {
    match code {
        "invalid_auth" | "not_authed" | "token_revoked" | "account_inactive" | "missing_scope" => {
            ClientError::AuthFailed(code.to_string())
        }
        "item_not_found" | "list_not_found" | "file_not_found" => {
            ClientError::NotFound(code.to_string())
        }
        "ratelimited" => ClientError::RateLimited { retry_after_ms: 60_000 },
        _ => ClientError::api(SERVICE, 200, code),
    }
}

#[async_trait::async_trait]
impl ListReadPort for SlackListClient {
    async fn list_rows(&self, list_id: &str) -> ClientResult<Vec<RowRecord>> {
        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "list_id": list_id, "limit": PAGE_SIZE });
            if let Some(c) = &cursor {
                body["cursor"] = json!(c);
            }
            let payload = self.call("slackLists.items.list", body).await?;

            if let Some(items) = payload["items"].as_array() {
                for item in items {
                    match decode_row(item) {
                        Ok(row) => rows.push(row),
                        Err(e) => warn!(list_id, "skipping list item: {}", e),
                    }
                }
            }

            cursor = payload["response_metadata"]["next_cursor"]
                .as_str()
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        debug!(list_id, rows = rows.len(), "listed rows");
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl ListWritePort for SlackListClient {
    async fn create_row(&self, list_id: &str, cells: &[Cell]) -> ClientResult<String> {
        let initial_fields: Vec<Value> = cells.iter().map(|c| encode_cell(c, None)).collect();
        let payload = self
            .call(
                "slackLists.items.create",
                json!({ "list_id": list_id, "initial_fields": initial_fields }),
            )
            .await?;
        payload["item"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::invalid_response("items.create returned no item id"))
    }

    async fn update_row(&self, list_id: &str, row_id: &str, cells: &[Cell]) -> ClientResult<()> {
        if cells.is_empty() {
            return Ok(());
        }
        let cells: Vec<Value> = cells.iter().map(|c| encode_cell(c, Some(row_id))).collect();
        self.call(
            "slackLists.items.update",
            json!({ "list_id": list_id, "cells": cells }),
        )
        .await?;
        Ok(())
    }

    async fn delete_row(&self, list_id: &str, row_id: &str) -> ClientResult<()> {
        self.call(
            "slackLists.items.delete",
            json!({ "list_id": list_id, "id": row_id }),
        )
        .await?;
        Ok(())
    }
}

// ============================================================
// Cell codec
// ============================================================

fn rich_text(text: &str) -> Value {
    json!([{
        "type": "rich_text",
        "elements": [{
            "type": "rich_text_section",
            "elements": [{ "type": "text", "text": text }]
        }]
    }])
}

/// Encode one cell for `initial_fields` (no row id) or `cells` (with row id).
pub fn encode_cell(cell: &Cell, row_id: Option<&str>) -> Value {
    let mut obj = Map::new();
    obj.insert("column_id".into(), json!(cell.column_id));
    if let Some(row_id) = row_id {
        obj.insert("row_id".into(), json!(row_id));
    }
    let (name, value) = match &cell.value {
        CellValue::Text(s) => ("rich_text", rich_text(s)),
        CellValue::Select(v) => ("select", json!([v])),
        CellValue::User(u) => ("user", json!([u])),
        CellValue::Link { url, text } => {
            let mut link = Map::new();
            link.insert("original_url".into(), json!(url));
            link.insert("display_as_url".into(), json!(false));
            if let Some(text) = text {
                link.insert("display_name".into(), json!(text));
            }
            ("link", Value::Array(vec![Value::Object(link)]))
        }
        CellValue::Date(d) => ("date", json!([d.format(DATE_FORMAT).to_string()])),
        CellValue::Checkbox(b) => ("checkbox", json!(b)),
    };
    obj.insert(name.into(), value);
    Value::Object(obj)
}

/// First element of an array, or the value itself.
fn first(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        Value::Null => None,
        other => Some(other),
    }
}

fn str_member<'a>(obj: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|n| obj.get(*n).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn decode_link(value: &Value) -> Option<CellValue> {
    let link = first(value)?;
    if let Some(url) = link.as_str() {
        return Some(CellValue::Link { url: url.to_string(), text: None });
    }
    let url = str_member(link, &["original_url", "originalUrl", "url"])?;
    let text = str_member(link, &["display_name", "displayName", "text"]).map(str::to_string);
    Some(CellValue::Link { url: url.to_string(), text })
}

fn flatten_rich_text(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| flatten_rich_text(v, out)),
        Value::Object(obj) => {
            if let Some(text) = obj.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
            if let Some(elements) = obj.get("elements") {
                flatten_rich_text(elements, out);
            }
        }
        _ => {}
    }
}

/// Decode one field of a list item. `None` when the field carries no
/// column id or no recognised value.
pub fn decode_cell(field: &Value) -> Option<Cell> {
    let column_id = field.get("column_id").and_then(Value::as_str)?;
    let key = str_member(field, &["key", "column_key"]).map(str::to_string);

    let value = if let Some(b) = field.get("checkbox").and_then(Value::as_bool) {
        CellValue::Checkbox(b)
    } else if let Some(v) = field.get("select").and_then(first).and_then(Value::as_str) {
        CellValue::Select(v.to_string())
    } else if let Some(u) = field.get("user").and_then(first).and_then(Value::as_str) {
        CellValue::User(u.to_string())
    } else if let Some(link) = field.get("link").and_then(decode_link) {
        link
    } else if let Some(d) = field.get("date").and_then(first).and_then(Value::as_str) {
        match NaiveDate::parse_from_str(d, DATE_FORMAT) {
            Ok(date) => CellValue::Date(date),
            Err(_) => {
                debug!(column_id, value = d, "unparseable date cell");
                return None;
            }
        }
    } else if let Some(blocks) = field.get("rich_text").filter(|v| !v.is_null()) {
        let mut text = String::new();
        flatten_rich_text(blocks, &mut text);
        CellValue::Text(text)
    } else if let Some(t) = field.get("text").and_then(Value::as_str) {
        CellValue::Text(t.to_string())
    } else {
        debug!(column_id, "cell with no recognised value");
        return None;
    };

    Some(Cell { column_id: column_id.to_string(), key, value })
}

/// Decode a list item into a row. The item must carry an id; fields that
/// do not decode are skipped.
pub fn decode_row(item: &Value) -> ClientResult<RowRecord> {
    let id = item
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::invalid_response("list item without id"))?;
    let fields = item
        .get("fields")
        .or_else(|| item.get("cells"))
        .and_then(Value::as_array);
    let cells = fields
        .map(|fs| fs.iter().filter_map(decode_cell).collect())
        .unwrap_or_default();
    let updated_at = item
        .get("updated_timestamp")
        .and_then(|v| v.as_str().and_then(|s| s.parse::<i64>().ok()).or_else(|| v.as_i64()))
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    Ok(RowRecord {
        id: id.to_string(),
        cells,
        updated_at,
    })
}
