//! Listbridge Clients - Tracker and list ports with HTTP and in-memory adapters

pub mod asana;
pub mod error;
pub mod memory;
pub mod ports;
pub mod slack;

pub use asana::AsanaClient;
pub use error::{ClientError, ClientResult};
pub use memory::{ListCall, MemoryList, MemoryTracker, TrackerCall};
pub use ports::{ListPort, ListReadPort, ListWritePort, TrackerPort, TrackerReadPort, TrackerWritePort};
pub use slack::SlackListClient;
