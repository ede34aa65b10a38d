use std::path::PathBuf;

use chrono::{NaiveDate, TimeZone, Utc};
use stocksheet_engine::ingest::ingest;
use stocksheet_engine::period::DateRange;
use stocksheet_recon::filter::{GroupFilter, SortDirection, SortKey};
use stocksheet_recon::report::Report;
use stocksheet_recon::store::{JsonDirStore, KeyValueStore, MemoryStore, SqliteStore, PROGRESS_KEY, SOURCE_KEY};
use stocksheet_recon::{CountField, PersistenceError, ReconSession, SessionState, SheetFilter, SortConfig, SourceSnapshot};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn read_fixture(name: &str) -> String {
    let path = fixtures_dir().join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
}

fn snapshot() -> SourceSnapshot {
    let state = ingest([read_fixture("stock.sse")]);
    assert!(state.is_complete());
    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
    );
    SourceSnapshot::from_ingest(&state, Some(range), Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap())
}

// -------------------------------------------------------------------------
// Workflow
// -------------------------------------------------------------------------

#[test]
fn stream_to_report() {
    let mut session = ReconSession::start_fresh(snapshot());
    assert_eq!(session.sheets().len(), 4);
    assert_eq!(session.groups(), vec!["Back".to_string(), "Front".to_string()]);

    session.set_counted("Main Bar", CountField::Closing, "90").unwrap();
    session.set_counted("Pool Bar", CountField::Closing, "57").unwrap();
    session.set_counted("Kitchen", CountField::Opening, "41").unwrap();

    let front = SheetFilter::all().with_group(GroupFilter::Named("Front".into()));
    let totals = session.aggregate_variance(&front);
    assert_eq!(totals.sheets, 2);
    assert_eq!(totals.closing_stock, 150.0);
    assert_eq!(totals.recon_closing, 147.0);
    assert_eq!(totals.closing_difference, -3.0);
    assert_eq!(totals.opening_difference, 0.0);

    let sort = SortConfig::by(SortKey::Number(stocksheet_recon::filter::NumericField::ClosingDifference), SortDirection::Asc);
    let report = Report::build(&session, &SheetFilter::all(), &sort);
    let names: Vec<&str> = report.rows.iter().map(|r| r.sheet_name.as_str()).collect();
    // Back, then Front by closing difference, then Ungrouped
    assert_eq!(names, vec!["Kitchen", "Main Bar", "Pool Bar", "Office"]);
    assert_eq!(report.totals.opening_difference, 1.0);
    assert_eq!(report.totals.closing_difference, -3.0);
}

#[test]
fn group_rollup_follows_filter() {
    let session = ReconSession::start_fresh(snapshot());
    let groups = session.group_totals(&SheetFilter::all());
    let names: Vec<&str> = groups.iter().map(|g| g.group_name.as_str()).collect();
    assert_eq!(names, vec!["Back", "Front", "Ungrouped"]);

    let front = &groups[1];
    assert_eq!(front.total_opening, 180.0);
    assert_eq!(front.total_closing, 150.0);
    assert_eq!(front.variance, -30.0);
    assert!((front.variance_percentage + 100.0 / 6.0).abs() < 1e-9);
    assert_eq!((front.active_sheets, front.total_sheets), (2, 2));
    assert_eq!(front.completion_rate, 100.0);
    assert_eq!(front.average_stock, 75.0);

    let ungrouped = &groups[2];
    assert_eq!((ungrouped.active_sheets, ungrouped.total_sheets), (0, 1));
    assert_eq!(ungrouped.variance_percentage, 0.0);
    assert_eq!(ungrouped.completion_rate, 0.0);

    let bars = session.group_totals(&SheetFilter::all().with_search("pool"));
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].group_name, "Front");
    assert_eq!(bars[0].total_closing, 55.0);
}

#[test]
fn search_and_selection_narrow_the_sum() {
    let mut session = ReconSession::start_fresh(snapshot());
    session.set_counted("Main Bar", CountField::Opening, "100").unwrap();
    session.set_counted("Pool Bar", CountField::Opening, "70").unwrap();

    let bars = session.aggregate_variance(&SheetFilter::all().with_search("bar"));
    assert_eq!(bars.opening_difference, -10.0);

    let only_pool = SheetFilter::all().with_search("bar").with_selected(["Pool Bar", "Kitchen"]);
    let pool = session.aggregate_variance(&only_pool);
    assert_eq!(pool.sheets, 1);
    assert_eq!(pool.opening_difference, 10.0);

    // filters never touch counts
    assert_eq!(session.sheet("Main Bar").unwrap().recon_opening_stock, "100");
}

// -------------------------------------------------------------------------
// Persistence
// -------------------------------------------------------------------------

fn round_trip(store: &mut dyn KeyValueStore) {
    let mut session = ReconSession::start_fresh(snapshot());
    session.set_counted("Kitchen", CountField::Closing, "48.5").unwrap();
    session.persist(store).unwrap();

    let restored = ReconSession::restore(store);
    assert_eq!(restored.warning, None);
    assert_eq!(restored.session.sheets(), session.sheets());
    assert_eq!(restored.session.source(), session.source());

    session.clear(store).unwrap();
    assert_eq!(store.get(PROGRESS_KEY).unwrap(), None);
    assert_eq!(store.get(SOURCE_KEY).unwrap(), None);
    let after_clear = ReconSession::restore(store);
    assert_eq!(after_clear.session.state(), SessionState::Fresh);
    assert!(after_clear.session.sheets().is_empty());
    assert_eq!(after_clear.warning, Some(PersistenceError::Missing(PROGRESS_KEY)));
}

#[test]
fn json_dir_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    round_trip(&mut JsonDirStore::new(dir.path()));
}

#[test]
fn sqlite_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    round_trip(&mut SqliteStore::open(&dir.path().join("recon.db")).unwrap());
}

#[test]
fn restores_saved_progress_verbatim() {
    let mut store = MemoryStore::new();
    store.set(PROGRESS_KEY, &read_fixture("saved-progress.json")).unwrap();
    let restored = ReconSession::restore(&store);
    assert_eq!(restored.warning, None);

    let session = restored.session;
    assert_eq!(session.state(), SessionState::Editing);
    assert!(session.source().is_none());
    let kitchen = session.sheet("Kitchen").unwrap();
    assert_eq!(kitchen.recon_closing_stock, "52 kg");
    assert_eq!(kitchen.counted(CountField::Closing), 52.0);
    assert_eq!(kitchen.closing_difference, 2.0);
    assert_eq!(session.aggregate_variance(&SheetFilter::all()).opening_difference, -2.0);
}

#[test]
fn corrupt_source_is_ignored_when_progress_is_good() {
    let mut store = MemoryStore::new();
    store.set(PROGRESS_KEY, &read_fixture("saved-progress.json")).unwrap();
    store.set(SOURCE_KEY, "{\"sheets\": 12").unwrap();
    let restored = ReconSession::restore(&store);
    assert_eq!(restored.warning, None);
    assert_eq!(restored.session.sheets().len(), 2);
    assert!(restored.session.source().is_none());
}
