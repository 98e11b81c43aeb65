//! Tests for listbridge-sync: echo properties, mapping laws, and router scenarios
//! against the in-memory tracker and list.

use chrono::{TimeZone, Utc};
use listbridge_clients::{ListCall, ListPort, MemoryList, MemoryTracker, TrackerCall, TrackerPort};
use listbridge_core::*;
use listbridge_sync::schema::ENUM_TABLES;
use listbridge_sync::*;
use std::sync::Arc;
use std::time::Duration;

const LIST_ID: &str = "F-list";

// ===========================================================================
// Fixtures
// ===========================================================================

fn sections() -> Vec<SectionRef> {
    [
        ("s-open", "Open Bugs"),
        ("s-progress", "In Progress"),
        ("s-fixed", "Fixed"),
        ("s-closed", "Closed"),
    ]
    .into_iter()
    .map(|(id, name)| SectionRef { id: id.into(), name: name.into() })
    .collect()
}

fn tracker_field_name(key: LogicalKey) -> &'static str {
    match key {
        LogicalKey::BugCategory => "Bug Category",
        LogicalKey::Priority => "Priority",
        LogicalKey::Severity => "Severity",
        LogicalKey::ReproRate => "Repro Rate",
        LogicalKey::Platform => "Platform",
        LogicalKey::RegressionStatus => "Regression Status",
        LogicalKey::Version => "Version (in-game)",
        _ => unreachable!("not a custom field"),
    }
}

fn field_id(key: LogicalKey) -> String {
    format!("f-{}", key.as_str())
}

fn option_id(key: LogicalKey, label: &str) -> String {
    format!("o-{}-{}", key.as_str(), slugify(label))
}

fn definitions() -> Vec<CustomFieldDefinition> {
    let mut defs: Vec<_> = ENUM_TABLES
        .iter()
        .map(|table| CustomFieldDefinition {
            id: field_id(table.key),
            name: tracker_field_name(table.key).into(),
            kind: AttributeKind::Enum,
            enum_options: table
                .labels()
                .map(|label| EnumOption { id: option_id(table.key, label), name: label.into() })
                .collect(),
        })
        .collect();
    defs.push(CustomFieldDefinition {
        id: field_id(LogicalKey::Version),
        name: tracker_field_name(LogicalKey::Version).into(),
        kind: AttributeKind::Text,
        enum_options: vec![],
    });
    defs
}

fn column(key: LogicalKey) -> String {
    format!("C-{}", key.as_str())
}

fn columns() -> ColumnMap {
    let mut map = ColumnMap::new();
    for key in LogicalKey::ALL {
        map.insert(key, column(key));
    }
    map
}

fn mapper() -> FieldMapper {
    FieldMapper::new(
        columns(),
        SectionMap::from_sections(&sections(), "open_bugs").unwrap(),
        CustomFieldMap::from_definitions(&definitions()),
    )
    .with_users(UserMap::new([("u-sam".to_string(), "U-SAM".to_string())].into()))
}

fn enum_value(key: LogicalKey, label: &str) -> CustomFieldValue {
    CustomFieldValue {
        field_id: field_id(key),
        name: tracker_field_name(key).into(),
        value: AttributeValue::Enum(Some(label.into())),
    }
}

fn record(id: &str, name: &str, section: &str) -> TrackerRecord {
    let section = sections().into_iter().find(|s| s.name == section).unwrap();
    TrackerRecord {
        id: id.into(),
        name: name.into(),
        notes: String::new(),
        completed: false,
        assignee: None,
        custom_fields: vec![],
        section: Some(section),
        created_at: None,
        modified_at: None,
        permalink_url: Some(format!("https://app.asana.com/0/1200/{id}")),
    }
}

fn linked_row(row_id: &str, record_id: &str, status: &str) -> RowRecord {
    RowRecord::new(
        row_id,
        vec![
            Cell::new(column(LogicalKey::Name), CellValue::Text("Login fails".into())),
            Cell::new(column(LogicalKey::Status), CellValue::Select(status.into())),
            Cell::new(
                column(LogicalKey::TrackerLink),
                CellValue::Link {
                    url: format!("https://app.asana.com/0/1200/{record_id}"),
                    text: Some("View in Asana".into()),
                },
            ),
        ],
    )
}

fn link_value(record_id: &str) -> CellValue {
    CellValue::Link {
        url: format!("https://app.asana.com/0/1200/{record_id}"),
        text: Some("View in Asana".into()),
    }
}

struct Harness {
    tracker: Arc<MemoryTracker>,
    list: Arc<MemoryList>,
    echo: Arc<EchoDetector>,
    clock: Arc<ManualClock>,
    router: ChangeRouter,
}

fn harness(rows: Vec<RowRecord>) -> Harness {
    let tracker = Arc::new(MemoryTracker::new(sections(), definitions()));
    let list = Arc::new(MemoryList::with_rows(rows));
    let clock = Arc::new(ManualClock::new());
    let echo = Arc::new(EchoDetector::with_clock(Duration::from_secs(10), clock.clone()));
    let router = ChangeRouter::new(
        tracker.clone() as Arc<dyn TrackerPort>,
        list.clone() as Arc<dyn ListPort>,
        LIST_ID,
        Arc::new(mapper()),
        echo.clone(),
    )
    .with_settle_delay(Duration::ZERO);
    Harness { tracker, list, echo, clock, router }
}

fn changed(id: &str) -> TrackerChange {
    TrackerChange::new(id, ChangeAction::Changed)
}

fn list_change() -> ListChange {
    ListChange { list_id: LIST_ID.into() }
}

// ===========================================================================
// Echo detector
// ===========================================================================

#[test]
fn echo_suppresses_opposite_source_within_ttl() {
    let clock = Arc::new(ManualClock::new());
    let echo = EchoDetector::with_clock(Duration::from_secs(10), clock.clone());
    let ids = ["1", "Rec0001", "555", "x"];
    for id in ids {
        for source in [Source::Tracker, Source::List] {
            echo.mark_write(id, source);
            assert!(echo.should_ignore(id, source.opposite()));
        }
    }
    clock.advance(Duration::from_secs(10));
    for id in ids {
        for source in [Source::Tracker, Source::List] {
            assert!(!echo.should_ignore(id, source.opposite()));
        }
    }
}

#[test]
fn echo_never_suppresses_its_own_source() {
    let echo = EchoDetector::default();
    echo.mark_write("r", Source::Tracker);
    assert!(!echo.should_ignore("r", Source::Tracker));
    echo.mark_write("q", Source::List);
    assert!(!echo.should_ignore("q", Source::List));
}

#[test]
fn echo_is_safe_across_threads() {
    let echo = Arc::new(EchoDetector::default());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let echo = echo.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let id = format!("{t}-{i}");
                    echo.mark_write(&id, Source::List);
                    assert!(echo.should_ignore(&id, Source::Tracker));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(echo.len(), 1600);
}

#[tokio::test(start_paused = true)]
async fn echo_sweeper_stops_on_cancel() {
    let echo = Arc::new(EchoDetector::new(Duration::from_millis(50)));
    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = echo.clone().spawn_sweeper(Duration::from_millis(10), cancel.clone());
    cancel.cancel();
    handle.await.unwrap();
}

// ===========================================================================
// Field mapper
// ===========================================================================

#[test]
fn coding_tables_are_inverse_for_every_label() {
    for table in ENUM_TABLES {
        for label in table.labels() {
            let value = to_row_value(table.key, label).unwrap();
            assert_eq!(to_tracker_label(table.key, value), Some(label));
        }
    }
}

#[test]
fn enum_labels_survive_a_full_round_trip() {
    let mapper = mapper();
    for table in ENUM_TABLES {
        for label in table.labels() {
            let mut rec = record("1", "Bug", "Open Bugs");
            rec.custom_fields.push(enum_value(table.key, label));
            let row = RowRecord::new("r", mapper.to_row(&rec));
            let draft = mapper.to_tracker(&row);
            assert_eq!(
                draft.custom_fields.get(&field_id(table.key)),
                Some(&DraftValue::EnumOption(option_id(table.key, label))),
                "{} / {label}",
                table.key
            );
        }
    }
}

#[test]
fn to_row_is_deterministic() {
    let mapper = mapper();
    let mut rec = record("7", "Crash on boot", "In Progress");
    rec.notes = "Happens on cold start".into();
    rec.created_at = Some(Utc.with_ymd_and_hms(2024, 3, 5, 23, 30, 0).unwrap());
    rec.assignee = Some(UserRef { id: "u-sam".into(), name: None });
    rec.custom_fields = vec![
        enum_value(LogicalKey::Platform, "PS5"),
        enum_value(LogicalKey::Severity, "Critical"),
    ];
    let first = mapper.to_row(&rec);
    let second = mapper.to_row(&rec);
    assert_eq!(first, second);
    assert_eq!(format!("{first:?}"), format!("{second:?}"));
}

#[test]
fn to_row_follows_column_order_and_formats_values() {
    let mapper = mapper();
    let mut rec = record("7", "Crash on boot", "In Progress");
    rec.created_at = Some(Utc.with_ymd_and_hms(2024, 3, 5, 23, 30, 0).unwrap());
    rec.assignee = Some(UserRef { id: "u-sam".into(), name: None });
    rec.custom_fields = vec![
        enum_value(LogicalKey::Platform, "PC (Steam, GOG, Epic)"),
        CustomFieldValue {
            field_id: field_id(LogicalKey::Version),
            name: "Version (in-game)".into(),
            value: AttributeValue::Text(Some("0.9.1".into())),
        },
    ];
    let cells = mapper.to_row(&rec);
    let columns: Vec<_> = cells.iter().map(|c| c.column_id.clone()).collect();
    assert_eq!(
        columns,
        vec![
            column(LogicalKey::Name),
            column(LogicalKey::Status),
            column(LogicalKey::Platform),
            column(LogicalKey::Version),
            column(LogicalKey::Assignee),
            column(LogicalKey::Completed),
            column(LogicalKey::TrackerLink),
            column(LogicalKey::CreatedAt),
        ]
    );
    assert_eq!(cells[1].value, CellValue::Select("in_progress".into()));
    assert_eq!(cells[2].value, CellValue::Select("pc".into()));
    assert_eq!(cells[4].value, CellValue::User("U-SAM".into()));
    assert_eq!(cells[7].value, CellValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()));
}

#[test]
fn loosely_named_sections_map_status_both_ways() {
    let board = vec![
        SectionRef { id: "s-a".into(), name: "Open bugs".into() },
        SectionRef { id: "s-b".into(), name: "Fixed ".into() },
    ];
    let mapper = FieldMapper::new(
        columns(),
        SectionMap::from_sections(&board, "open_bugs").unwrap(),
        CustomFieldMap::new(),
    );
    let mut rec = record("7", "Crash on boot", "Open Bugs");
    rec.section = Some(board[1].clone());

    let cells = mapper.to_row(&rec);
    let status = cells.iter().find(|c| c.column_id == column(LogicalKey::Status)).unwrap();
    assert_eq!(status.value, CellValue::Select("fixed".into()));

    let row = RowRecord::new("r1", vec![status.clone()]);
    assert_eq!(mapper.to_tracker(&row).section_id, "s-b");
}

#[test]
fn unmapped_attributes_are_dropped_not_fatal() {
    let mapper = mapper();
    let mut rec = record("8", "Audio pops", "Open Bugs");
    rec.custom_fields = vec![
        CustomFieldValue {
            field_id: "f-points".into(),
            name: "Story Points".into(),
            value: AttributeValue::Number(Some(3.0)),
        },
        enum_value(LogicalKey::Priority, "Blocker"),
        enum_value(LogicalKey::Severity, "High"),
    ];
    let cells = mapper.to_row(&rec);
    assert!(cells.iter().all(|c| c.column_id != column(LogicalKey::Priority)));
    assert!(cells.iter().any(|c| c.column_id == column(LogicalKey::Name)));
    assert!(cells
        .iter()
        .any(|c| c.column_id == column(LogicalKey::Severity) && c.value == CellValue::Select("high".into())));
}

#[test]
fn missing_columns_are_skipped() {
    let mapper = FieldMapper::new(
        ColumnMap::new().with(LogicalKey::Name, "C1"),
        SectionMap::from_sections(&sections(), "open_bugs").unwrap(),
        CustomFieldMap::new(),
    );
    let cells = mapper.to_row(&record("1", "Only name", "Fixed"));
    assert_eq!(cells, vec![Cell::new("C1", CellValue::Text("Only name".into()))]);
}

#[test]
fn to_tracker_falls_back_for_name_and_status() {
    let mapper = mapper();
    let row = RowRecord::new(
        "r1",
        vec![Cell::new(column(LogicalKey::Status), CellValue::Select("not_a_status".into()))],
    );
    let draft = mapper.to_tracker(&row);
    assert_eq!(draft.name, "Untitled Bug");
    assert_eq!(draft.section_id, "s-open");
    assert_eq!(draft.tracker_id, None);

    let empty = mapper.to_tracker(&RowRecord::new("r2", vec![]));
    assert_eq!(empty.section_id, "s-open");
}

#[test]
fn to_tracker_reads_typed_cells() {
    let mapper = mapper();
    let row = RowRecord::new(
        "r1",
        vec![
            Cell::new(column(LogicalKey::Name), CellValue::Text("Login fails".into())),
            Cell::new(column(LogicalKey::Description), CellValue::Text("steps".into())),
            Cell::new(column(LogicalKey::Status), CellValue::Select("fixed".into())),
            Cell::new(column(LogicalKey::Priority), CellValue::Select("high".into())),
            Cell::new(column(LogicalKey::Version), CellValue::Text("1.0.2".into())),
            Cell::new(column(LogicalKey::Assignee), CellValue::User("U-SAM".into())),
            Cell::new(column(LogicalKey::Completed), CellValue::Checkbox(true)),
            Cell::new(column(LogicalKey::TrackerLink), link_value("555")),
        ],
    );
    let draft = mapper.to_tracker(&row);
    assert_eq!(draft.name, "Login fails");
    assert_eq!(draft.notes, "steps");
    assert_eq!(draft.section_id, "s-fixed");
    assert_eq!(draft.tracker_id.as_deref(), Some("555"));
    assert_eq!(draft.assignee.as_deref(), Some("u-sam"));
    assert!(draft.completed);
    assert_eq!(
        draft.custom_fields.get(&field_id(LogicalKey::Priority)),
        Some(&DraftValue::EnumOption(option_id(LogicalKey::Priority, "High")))
    );
    assert_eq!(
        draft.custom_fields.get(&field_id(LogicalKey::Version)),
        Some(&DraftValue::Text("1.0.2".into()))
    );
}

#[test]
fn to_tracker_omits_labels_without_option_ids() {
    let definitions = vec![CustomFieldDefinition {
        id: "f-pri".into(),
        name: "Priority".into(),
        kind: AttributeKind::Enum,
        enum_options: vec![EnumOption { id: "o-low".into(), name: "Low".into() }],
    }];
    let mapper = FieldMapper::new(
        columns(),
        SectionMap::from_sections(&sections(), "open_bugs").unwrap(),
        CustomFieldMap::from_definitions(&definitions),
    );
    let row = RowRecord::new(
        "r1",
        vec![Cell::new(column(LogicalKey::Priority), CellValue::Select("critical".into()))],
    );
    assert!(mapper.to_tracker(&row).custom_fields.is_empty());
}

#[test]
fn keyed_cells_map_without_column_ids() {
    let mapper = FieldMapper::new(
        ColumnMap::new(),
        SectionMap::from_sections(&sections(), "open_bugs").unwrap(),
        CustomFieldMap::new(),
    );
    let row = RowRecord::new(
        "r1",
        vec![
            Cell::keyed("Col-A", "bug_name", CellValue::Text("From key".into())),
            Cell::keyed("Col-B", "asana_link", link_value("900")),
        ],
    );
    let draft = mapper.to_tracker(&row);
    assert_eq!(draft.name, "From key");
    assert_eq!(draft.tracker_id.as_deref(), Some("900"));
}

// ===========================================================================
// Router: tracker → list
// ===========================================================================

#[tokio::test]
async fn new_tracker_record_creates_row_then_writes_link() {
    let h = harness(vec![]);
    let mut rec = record("900", "Login fails", "Open Bugs");
    rec.custom_fields.push(enum_value(LogicalKey::Priority, "High"));
    h.tracker.insert(rec).await;

    let outcome = h.router.handle_tracker_change(&TrackerChange::new("900", ChangeAction::Created)).await;
    let row_id = match outcome.unwrap() {
        Outcome::Created { target_id } => target_id,
        other => panic!("expected create, got {other:?}"),
    };

    let writes = h.list.writes().await;
    assert_eq!(
        writes,
        vec![
            ListCall::CreateRow {
                list_id: LIST_ID.into(),
                cells: vec![
                    Cell::new(column(LogicalKey::Name), CellValue::Text("Login fails".into())),
                    Cell::new(column(LogicalKey::Status), CellValue::Select("open_bugs".into())),
                    Cell::new(column(LogicalKey::Priority), CellValue::Select("high".into())),
                    Cell::new(column(LogicalKey::Completed), CellValue::Checkbox(false)),
                ],
            },
            ListCall::UpdateRow {
                list_id: LIST_ID.into(),
                row_id: row_id.clone(),
                cells: vec![Cell::new(column(LogicalKey::TrackerLink), link_value("900"))],
            },
        ]
    );
    assert!(h.echo.should_ignore(&row_id, Source::List));
}

#[tokio::test]
async fn changed_tracker_record_updates_its_row() {
    let h = harness(vec![linked_row("Rec0042", "555", "open_bugs")]);
    h.tracker.insert(record("555", "Login fails", "Fixed")).await;

    let outcome = h.router.handle_tracker_change(&changed("555")).await.unwrap();
    assert_eq!(outcome, Outcome::Updated { target_id: "Rec0042".into() });

    let row = h.list.row("Rec0042").await.unwrap();
    assert_eq!(
        row.cell(&column(LogicalKey::Status)).unwrap().value,
        CellValue::Select("fixed".into())
    );
    assert!(h.echo.should_ignore("Rec0042", Source::List));
    assert!(!h.echo.should_ignore("555", Source::Tracker));
}

#[tokio::test]
async fn removed_tracker_record_deletes_row_or_does_nothing() {
    let h = harness(vec![linked_row("Rec0042", "555", "open_bugs")]);

    let outcome = h
        .router
        .handle_tracker_change(&TrackerChange::new("555", ChangeAction::Removed))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Deleted { target_id: "Rec0042".into() });
    assert!(h.list.rows().await.is_empty());

    let outcome = h
        .router
        .handle_tracker_change(&TrackerChange::new("556", ChangeAction::Removed))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Skipped(_)));
    assert!(h.tracker.calls().await.is_empty());
}

#[tokio::test]
async fn failed_record_does_not_stop_the_batch() {
    let h = harness(vec![]);
    for id in ["1", "2", "3"] {
        h.tracker.insert(record(id, &format!("Bug {id}"), "Open Bugs")).await;
    }
    h.tracker.fail_on("2").await;

    let report = h
        .router
        .handle_tracker_changes(&[changed("1"), changed("2"), changed("3")])
        .await;

    assert_eq!(report.created, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].subject_id, "2");
    assert!(report.errors[0].transient);

    let rows = h.list.rows().await;
    let linked: Vec<_> = rows.iter().filter_map(|r| h.router.mapper().tracker_id(r)).collect();
    assert_eq!(linked, vec!["1".to_string(), "3".to_string()]);
}

#[tokio::test]
async fn list_read_failure_is_a_record_failure_not_a_create() {
    let h = harness(vec![]);
    h.tracker.insert(record("1", "Bug", "Open Bugs")).await;
    h.list.set_listing_fails(true).await;

    let report = h.router.handle_tracker_changes(&[changed("1")]).await;
    assert_eq!(report.failed, 1);
    assert!(h.list.writes().await.is_empty());
}

#[tokio::test]
async fn tracker_echo_is_ignored_without_fetching() {
    let h = harness(vec![]);
    h.echo.mark_write("555", Source::List);
    let outcome = h.router.handle_tracker_change(&changed("555")).await.unwrap();
    assert_eq!(outcome, Outcome::IgnoredEcho);
    assert!(h.tracker.calls().await.is_empty());
}

// ===========================================================================
// Router: list → tracker
// ===========================================================================

#[tokio::test]
async fn linked_row_updates_and_moves_its_record_then_suppresses_the_echo() {
    let h = harness(vec![linked_row("Rec0042", "555", "fixed")]);
    h.tracker.insert(record("555", "Login fails", "Open Bugs")).await;

    let report = h.router.handle_list_change(&list_change()).await;
    assert_eq!(report.updated, 1);

    let writes = h.tracker.writes().await;
    assert_eq!(writes.len(), 2);
    assert!(matches!(&writes[0], TrackerCall::UpdateRecord { id, .. } if id == "555"));
    assert_eq!(
        writes[1],
        TrackerCall::MoveToSection { id: "555".into(), section_id: "s-fixed".into() }
    );
    assert!(h.echo.should_ignore("555", Source::Tracker));

    h.tracker.clear_calls().await;
    let report = h.router.handle_tracker_changes(&[changed("555")]).await;
    assert_eq!(report.ignored_echo, 1);
    assert!(h.tracker.calls().await.is_empty());
    assert!(h.list.writes().await.is_empty());
}

#[tokio::test]
async fn partial_update_still_suppresses_the_tracker_echo() {
    // The tracker has no "Fixed" section, so the move fails after the update lands.
    let tracker_sections: Vec<SectionRef> =
        sections().into_iter().filter(|s| s.id != "s-fixed").collect();
    let tracker = Arc::new(MemoryTracker::new(tracker_sections, definitions()));
    let mut edited = linked_row("Rec0042", "555", "fixed");
    edited.cells[0] = Cell::new(column(LogicalKey::Name), CellValue::Text("Login fails (edited)".into()));
    let list = Arc::new(MemoryList::with_rows(vec![edited]));
    let echo = Arc::new(EchoDetector::new(Duration::from_secs(10)));
    let router = ChangeRouter::new(
        tracker.clone() as Arc<dyn TrackerPort>,
        list.clone() as Arc<dyn ListPort>,
        LIST_ID,
        Arc::new(mapper()),
        echo.clone(),
    )
    .with_settle_delay(Duration::ZERO);
    tracker.insert(record("555", "Login fails", "Open Bugs")).await;

    let report = router.handle_list_change(&list_change()).await;
    assert_eq!(report.failed, 1);
    assert_eq!(tracker.record("555").await.unwrap().name, "Login fails (edited)");
    assert!(echo.should_ignore("555", Source::Tracker));

    let outcome = router.handle_tracker_change(&changed("555")).await.unwrap();
    assert_eq!(outcome, Outcome::IgnoredEcho);
    assert!(list.writes().await.is_empty());
}

#[tokio::test]
async fn echo_expires_and_the_next_change_is_processed() {
    let h = harness(vec![linked_row("Rec0042", "555", "fixed")]);
    h.tracker.insert(record("555", "Login fails", "Open Bugs")).await;
    h.router.handle_list_change(&list_change()).await;

    h.clock.advance(Duration::from_secs(11));
    let outcome = h.router.handle_tracker_change(&changed("555")).await.unwrap();
    assert_eq!(outcome, Outcome::Updated { target_id: "Rec0042".into() });
}

#[tokio::test]
async fn checked_row_completes_its_record() {
    let mut row = linked_row("Rec0042", "555", "closed");
    row.cells.push(Cell::new(column(LogicalKey::Completed), CellValue::Checkbox(true)));
    let h = harness(vec![row]);
    h.tracker.insert(record("555", "Login fails", "Open Bugs")).await;

    h.router.handle_list_change(&list_change()).await;
    let writes = h.tracker.writes().await;
    assert_eq!(writes.last(), Some(&TrackerCall::CompleteRecord("555".into())));
    assert!(h.tracker.record("555").await.unwrap().completed);
}

#[tokio::test]
async fn unlinked_row_creates_record_and_writes_link_back() {
    let row = RowRecord::new(
        "Rec0007",
        vec![
            Cell::new(column(LogicalKey::Name), CellValue::Text("Texture flicker".into())),
            Cell::new(column(LogicalKey::Status), CellValue::Select("in_progress".into())),
            Cell::new(column(LogicalKey::Platform), CellValue::Select("switch".into())),
        ],
    );
    let h = harness(vec![row]);

    let report = h.router.handle_list_change(&list_change()).await;
    assert_eq!(report.created, 1);

    let writes = h.tracker.writes().await;
    let TrackerCall::CreateRecord { section_id, draft } = &writes[0] else {
        panic!("expected create, got {writes:?}");
    };
    assert_eq!(section_id, "s-progress");
    assert_eq!(draft.name, "Texture flicker");
    assert_eq!(
        draft.custom_fields.get(&field_id(LogicalKey::Platform)),
        Some(&DraftValue::EnumOption(option_id(LogicalKey::Platform, "Switch")))
    );

    let row = h.list.row("Rec0007").await.unwrap();
    let new_id = h.router.mapper().tracker_id(&row).unwrap();
    assert!(h.tracker.record(&new_id).await.is_some());
    assert!(h.echo.should_ignore(&new_id, Source::Tracker));
    assert!(h.echo.should_ignore("Rec0007", Source::List));

    h.tracker.clear_calls().await;
    let report = h.router.handle_list_change(&list_change()).await;
    assert_eq!(report.ignored_echo, 1);
    assert!(h.tracker.calls().await.is_empty());
}

#[tokio::test]
async fn change_for_another_list_is_ignored() {
    let h = harness(vec![linked_row("Rec0042", "555", "fixed")]);
    let report = h
        .router
        .handle_list_change(&ListChange { list_id: "F-other".into() })
        .await;
    assert_eq!(report.total(), 0);
    assert!(h.list.calls().await.is_empty());
}

#[tokio::test]
async fn failing_row_does_not_stop_its_siblings() {
    let h = harness(vec![
        linked_row("Rec0001", "101", "fixed"),
        linked_row("Rec0002", "102", "fixed"),
        linked_row("Rec0003", "103", "fixed"),
    ]);
    for id in ["101", "102", "103"] {
        h.tracker.insert(record(id, "Bug", "Open Bugs")).await;
    }
    h.tracker.fail_on("102").await;

    let report = h.router.handle_list_change(&list_change()).await;
    assert_eq!(report.updated, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].subject_id, "Rec0002");
}

#[tokio::test]
async fn unreadable_list_fails_the_delivery_once() {
    let h = harness(vec![]);
    h.list.set_listing_fails(true).await;
    let report = h.router.handle_list_change(&list_change()).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].subject_id, LIST_ID);
}

#[tokio::test(start_paused = true)]
async fn list_change_waits_for_the_settle_delay() {
    let tracker = Arc::new(MemoryTracker::new(sections(), definitions()));
    let list = Arc::new(MemoryList::new());
    let router = ChangeRouter::new(
        tracker as Arc<dyn TrackerPort>,
        list as Arc<dyn ListPort>,
        LIST_ID,
        Arc::new(mapper()),
        Arc::new(EchoDetector::default()),
    );

    let start = tokio::time::Instant::now();
    router.handle_list_change(&list_change()).await;
    assert!(start.elapsed() >= Duration::from_millis(500));
}

// ===========================================================================
// Correlator
// ===========================================================================

#[tokio::test]
async fn correlator_scans_for_records_and_reads_rows_directly() {
    let rows = vec![
        RowRecord::new("Rec0001", vec![]),
        linked_row("Rec0002", "555", "fixed"),
        linked_row("Rec0003", "556", "fixed"),
    ];
    let list = Arc::new(MemoryList::with_rows(rows.clone()));
    let correlator = RecordCorrelator::new(list.clone() as Arc<dyn ListPort>, LIST_ID, Arc::new(mapper()));

    assert_eq!(
        correlator.find_counterpart(Subject::Record("556")).await.unwrap().as_deref(),
        Some("Rec0003")
    );
    assert_eq!(correlator.find_counterpart(Subject::Record("999")).await.unwrap(), None);
    assert_eq!(list.calls().await.len(), 2);

    assert_eq!(
        correlator.find_counterpart(Subject::Row(&rows[1])).await.unwrap().as_deref(),
        Some("555")
    );
    assert_eq!(correlator.find_counterpart(Subject::Row(&rows[0])).await.unwrap(), None);
    assert_eq!(list.calls().await.len(), 2);
}

// ===========================================================================
// Bootstrap
// ===========================================================================

#[tokio::test]
async fn bootstrap_unions_sampled_columns_and_applies_overrides() {
    let tracker = MemoryTracker::new(sections(), definitions());
    let list = MemoryList::with_rows(vec![
        RowRecord::new("r1", vec![Cell::keyed("Col1", "bug_name", CellValue::Text("a".into()))]),
        RowRecord::new(
            "r2",
            vec![
                Cell::keyed("Col2", "status", CellValue::Select("fixed".into())),
                Cell::keyed("Col3", "asana_link", link_value("1")),
            ],
        ),
    ]);
    let mut config = BridgeConfig::default();
    config.list.list_id = LIST_ID.into();
    config.columns.insert("priority".into(), "Col9".into());
    config.columns.insert("status".into(), "Col2b".into());

    let boot = bootstrap_mappings(&tracker, &list, &config).await.unwrap();
    assert_eq!(boot.summary.rows, 2);
    assert_eq!(boot.summary.sections, 4);
    assert_eq!(boot.summary.custom_fields, 7);
    assert_eq!(boot.summary.columns, 4);

    let columns = boot.mapper.columns();
    assert_eq!(columns.get(LogicalKey::Name), Some("Col1"));
    assert_eq!(columns.get(LogicalKey::Status), Some("Col2b"));
    assert_eq!(columns.get(LogicalKey::Priority), Some("Col9"));
    assert_eq!(boot.mapper.link_column(), Some("Col3"));
}

#[tokio::test]
async fn bootstrap_without_sections_fails() {
    let tracker = MemoryTracker::new(vec![], vec![]);
    let list = MemoryList::new();
    let err = bootstrap_mappings(&tracker, &list, &BridgeConfig::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SyncError::Bootstrap(_)));
}

// ===========================================================================
// Batch report
// ===========================================================================

#[tokio::test]
async fn batch_report_serializes_counts_and_errors() {
    let h = harness(vec![]);
    h.tracker.fail_on("404").await;
    let report = h.router.handle_tracker_changes(&[changed("404")]).await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["failed"], 1);
    assert_eq!(json["created"], 0);
    assert_eq!(json["errors"][0]["subject_id"], "404");
    assert_eq!(json["errors"][0]["transient"], true);
}
