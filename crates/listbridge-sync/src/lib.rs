//! Listbridge Sync - Echo detection, field mapping, correlation and change routing

pub mod bootstrap;
pub mod correlator;
pub mod echo;
pub mod error;
pub mod mapper;
pub mod router;
pub mod schema;

pub use bootstrap::{bootstrap_mappings, BootstrapSummary, Bootstrapped};
pub use correlator::{RecordCorrelator, Subject};
pub use echo::{Clock, EchoDetector, ManualClock, SystemClock};
pub use error::{SyncError, SyncResult};
pub use mapper::{to_row_value, to_tracker_label, tracker_id_from_link, FieldMapper};
pub use router::{BatchReport, ChangeRouter, Outcome, RecordFailure};
