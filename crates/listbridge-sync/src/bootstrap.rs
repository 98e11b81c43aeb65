//! Startup mapping discovery
//!
//! Reads the tracker's sections and custom fields and the list's current
//! rows once, and freezes the result into a [`FieldMapper`].

use crate::error::{SyncError, SyncResult};
use crate::mapper::FieldMapper;
use listbridge_clients::{ListPort, TrackerPort};
use listbridge_core::{BridgeConfig, ColumnMap, CustomFieldMap, LogicalKey, SectionMap};
use tracing::{info, warn};

/// Counts reported by a bootstrap run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapSummary {
    pub sections: usize,
    pub custom_fields: usize,
    pub columns: usize,
    pub rows: usize,
}

pub struct Bootstrapped {
    pub mapper: FieldMapper,
    pub summary: BootstrapSummary,
}

/// Build every identifier map. Explicit `[columns]` entries win over columns
/// sampled from existing rows.
pub async fn bootstrap_mappings(
    tracker: &dyn TrackerPort,
    list: &dyn ListPort,
    config: &BridgeConfig,
) -> SyncResult<Bootstrapped> {
    let sections = tracker.list_sections().await?;
    let section_map = SectionMap::from_sections(&sections, &config.sync.default_status)
        .map_err(|e| SyncError::bootstrap(e.to_string()))?;

    let definitions = tracker.list_custom_fields().await?;
    let field_map = CustomFieldMap::from_definitions(&definitions);

    let rows = list.list_rows(&config.list.list_id).await?;
    let columns = ColumnMap::from_rows(&rows).merge(&config.column_overrides());

    if columns.is_empty() {
        warn!("no list columns resolved; nothing will be written to the list");
    } else if columns.get(LogicalKey::TrackerLink).is_none() {
        warn!("no link column resolved; rows cannot be correlated to tracker records");
    }

    let summary = BootstrapSummary {
        sections: section_map.len(),
        custom_fields: field_map.len(),
        columns: columns.len(),
        rows: rows.len(),
    };
    info!(
        sections = summary.sections,
        custom_fields = summary.custom_fields,
        columns = summary.columns,
        rows = summary.rows,
        fallback_status = section_map.fallback_status(),
        "mappings ready"
    );

    let mapper = FieldMapper::new(columns, section_map, field_map)
        .with_users(config.user_map())
        .with_link_text(config.sync.tracker_link_text.clone());

    Ok(Bootstrapped { mapper, summary })
}
