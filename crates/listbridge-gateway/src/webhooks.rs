//! Webhook endpoints
//!
//! Both handlers authenticate, parse, acknowledge with 200 and hand the
//! parsed changes to a background task. Nothing from the payload beyond ids
//! and actions reaches the router; it re-reads everything it needs.

use crate::server::GatewayState;
use crate::signature;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use listbridge_core::{ListDelivery, TrackerWebhookPayload};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

pub const HOOK_SECRET_HEADER: &str = "x-hook-secret";
pub const HOOK_SIGNATURE_HEADER: &str = "x-hook-signature";
pub const SLACK_SIGNATURE_HEADER: &str = "x-slack-signature";
pub const SLACK_TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Why a delivery was turned away at the boundary.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
}

impl From<listbridge_core::Error> for Rejection {
    fn from(e: listbridge_core::Error) -> Self {
        let message = e.to_string();
        match e {
            listbridge_core::Error::SignatureInvalid(_) => Rejection::Unauthorized(message),
            _ => Rejection::BadRequest(message),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = match &self {
            Rejection::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Rejection::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        warn!(status = status.as_u16(), "rejected delivery: {}", self);
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ============================================================
// Tracker
// ============================================================

pub async fn tracker_webhook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    if let Some(secret) = headers.get(HOOK_SECRET_HEADER) {
        return Ok(handshake(&state, secret.clone()).await);
    }

    match state.tracker_secret().await {
        Some(secret) => signature::verify_tracker(&secret, &body, header(&headers, HOOK_SIGNATURE_HEADER))?,
        None => warn!("no tracker webhook secret known, accepting unsigned delivery"),
    }

    let changes = TrackerWebhookPayload::parse(&body)?.into_changes();
    if changes.is_empty() {
        debug!("tracker delivery carried no task changes");
        return Ok(StatusCode::OK.into_response());
    }

    let delivery_id = Uuid::new_v4();
    info!(%delivery_id, changes = changes.len(), "tracker delivery accepted");
    let router = state.router().clone();
    state.deliveries().spawn(
        async move {
            router.handle_tracker_changes(&changes).await;
        }
        .instrument(tracing::info_span!("tracker_delivery", %delivery_id)),
    );
    Ok(StatusCode::OK.into_response())
}

async fn handshake(state: &GatewayState, secret: HeaderValue) -> Response {
    match secret.to_str() {
        Ok(value) => {
            if state.adopt_tracker_secret(value).await {
                info!("adopted tracker webhook secret from handshake");
            } else {
                warn!("handshake secret ignored; a tracker secret is already in use");
            }
        }
        Err(_) => warn!("handshake secret is not valid header text"),
    }
    info!("tracker webhook handshake");
    (StatusCode::OK, [(HOOK_SECRET_HEADER, secret)]).into_response()
}

// ============================================================
// List
// ============================================================

pub async fn list_events(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    if let Some(secret) = state.signing_secret() {
        signature::verify_slack(
            secret,
            header(&headers, SLACK_TIMESTAMP_HEADER),
            header(&headers, SLACK_SIGNATURE_HEADER),
            &body,
            chrono::Utc::now().timestamp(),
        )?;
    }

    let change = match ListDelivery::parse(&body)? {
        ListDelivery::Challenge(challenge) => {
            info!("list url verification");
            return Ok(Json(serde_json::json!({ "challenge": challenge })).into_response());
        }
        ListDelivery::Ignored(what) => {
            debug!(%what, "list delivery ignored");
            return Ok(StatusCode::OK.into_response());
        }
        ListDelivery::Change(change) => change,
    };

    if change.list_id != state.router().list_id() {
        debug!(list_id = %change.list_id, "change for another list");
        return Ok(StatusCode::OK.into_response());
    }

    let delivery_id = Uuid::new_v4();
    info!(%delivery_id, list_id = %change.list_id, "list delivery accepted");
    let router = state.router().clone();
    state.deliveries().spawn(
        async move {
            router.handle_list_change(&change).await;
        }
        .instrument(tracing::info_span!("list_delivery", %delivery_id)),
    );
    Ok(StatusCode::OK.into_response())
}
