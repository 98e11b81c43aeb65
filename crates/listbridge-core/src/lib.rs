//! Listbridge Core - Shared record types, boundary events, configuration and errors

pub mod config;
pub mod error;
pub mod events;
pub mod mapping;
pub mod types;

pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use events::*;
pub use mapping::*;
pub use types::*;
