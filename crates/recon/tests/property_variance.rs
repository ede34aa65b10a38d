// Property-based tests for reconciliation variance and persistence.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use stocksheet_engine::aggregate::SheetStockRecord;
use stocksheet_recon::filter::GroupFilter;
use stocksheet_recon::model::SheetGroupInfo;
use stocksheet_recon::store::MemoryStore;
use stocksheet_recon::{CountField, ReconSession, SheetFilter, SourceSnapshot, VarianceTotals};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

const GROUPS: [Option<&str>; 3] = [Some("Front"), Some("Back"), None];

fn arb_record(index: usize) -> impl Strategy<Value = SheetStockRecord> {
    (-500i32..500, -500i32..500, 0usize..3).prop_map(move |(opening, closing, group)| SheetStockRecord {
        sheet_id: Some(format!("s{index}")),
        sheet_name: format!("Sheet {index}"),
        group_name: GROUPS[group].map(String::from),
        opening_stock_total: f64::from(opening),
        closing_stock_total: f64::from(closing),
        has_stock_columns: true,
        ..Default::default()
    })
}

fn arb_source() -> impl Strategy<Value = SourceSnapshot> {
    (1usize..8).prop_flat_map(|n| {
        (0..n).map(arb_record).collect::<Vec<_>>().prop_map(|sheets| {
            let meta = sheets
                .iter()
                .map(|s| SheetGroupInfo { sheet_name: s.sheet_name.clone(), group_name: s.group_name.clone() })
                .collect();
            SourceSnapshot::new(sheets, Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()).with_meta(meta)
        })
    })
}

/// Whole numbers, blanks, and text with a unit suffix.
fn arb_count() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => (-600i32..600).prop_map(|v| v.to_string()),
        1 => Just(String::new()),
        1 => (0i32..100).prop_map(|v| format!("{v} kg")),
        1 => Just("n/a".to_string()),
    ]
}

/// (sheet index, field, typed input)
fn arb_edits() -> impl Strategy<Value = Vec<(usize, bool, String)>> {
    proptest::collection::vec((0usize..8, any::<bool>(), arb_count()), 0..12)
}

fn apply(session: &mut ReconSession, edits: &[(usize, bool, String)]) {
    let names = session.sheet_names();
    for (index, opening, input) in edits {
        let name = &names[index % names.len()];
        let field = if *opening { CountField::Opening } else { CountField::Closing };
        session.set_counted(name, field, input).unwrap();
    }
}

fn arb_filter() -> impl Strategy<Value = SheetFilter> {
    (prop_oneof![Just(""), Just("sheet"), Just("1"), Just("zzz")], 0usize..4).prop_map(|(search, group)| {
        let group = match group {
            0 => GroupFilter::All,
            g => GroupFilter::Named(["Front", "Back", "Cellar"][g - 1].to_string()),
        };
        SheetFilter::all().with_search(search).with_group(group)
    })
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn variance_is_counted_minus_total(source in arb_source(), edits in arb_edits()) {
        let mut session = ReconSession::start_fresh(source);
        apply(&mut session, &edits);
        let names = session.sheet_names();
        let touched: HashSet<(String, bool)> = edits
            .iter()
            .map(|(index, opening, _)| (names[index % names.len()].clone(), *opening))
            .collect();
        for sheet in session.sheets() {
            for (field, opening) in [(CountField::Opening, true), (CountField::Closing, false)] {
                let expected = if touched.contains(&(sheet.name().to_string(), opening)) {
                    sheet.counted(field) - sheet.total(field)
                } else {
                    0.0
                };
                prop_assert_eq!(sheet.variance(field), expected);
            }
        }
    }

    #[test]
    fn aggregate_sums_exactly_the_filtered_sheets(
        source in arb_source(),
        edits in arb_edits(),
        filter in arb_filter(),
    ) {
        let mut session = ReconSession::start_fresh(source);
        apply(&mut session, &edits);
        let totals = session.aggregate_variance(&filter);

        let mut expected = VarianceTotals::default();
        for sheet in session.sheets() {
            if filter.matches(sheet, session.group_of(sheet)) {
                expected.add(sheet);
            }
        }
        prop_assert_eq!(totals, expected);

        let everything = session.aggregate_variance(&SheetFilter::all());
        prop_assert_eq!(everything.sheets, session.sheets().len());
    }

    #[test]
    fn changing_filters_never_changes_counts(
        source in arb_source(),
        edits in arb_edits(),
        filters in proptest::collection::vec(arb_filter(), 1..5),
    ) {
        let mut session = ReconSession::start_fresh(source);
        apply(&mut session, &edits);
        let before = session.sheets().to_vec();
        for filter in &filters {
            let _ = session.aggregate_variance(filter);
            let _ = session.view(filter, &Default::default());
        }
        prop_assert_eq!(session.sheets(), before.as_slice());
    }

    #[test]
    fn restore_after_persist_is_identical(source in arb_source(), edits in arb_edits()) {
        let mut session = ReconSession::start_fresh(source);
        apply(&mut session, &edits);
        let mut store = MemoryStore::new();
        session.persist(&mut store).unwrap();

        let restored = ReconSession::restore(&store);
        prop_assert_eq!(restored.warning, None);
        prop_assert_eq!(restored.session.sheets(), session.sheets());
        prop_assert_eq!(restored.session.source(), session.source());
        for sheet in restored.session.sheets() {
            for field in [CountField::Opening, CountField::Closing] {
                let original = session.sheet(sheet.name()).unwrap();
                prop_assert_eq!(sheet.counted_input(field), original.counted_input(field));
                prop_assert_eq!(sheet.variance(field), original.variance(field));
            }
        }
    }
}
