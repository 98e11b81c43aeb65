//! Listbridge Gateway - Webhook receiver for the tracker and the list

pub mod server;
pub mod signature;
pub mod webhooks;

pub use server::{build_app, start_gateway, GatewayState, LIST_EVENTS_PATH, TRACKER_WEBHOOK_PATH};
