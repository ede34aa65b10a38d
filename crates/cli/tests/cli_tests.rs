// Integration tests for the `stocksheet` binary.
// Run with: cargo test -p stocksheet-cli --test cli_tests -- --nocapture

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture(name: &str) -> String {
    fixtures_dir().join(name).to_string_lossy().into_owned()
}

/// Isolated settings and store for one test.
struct Env {
    dir: tempfile::TempDir,
}

impl Env {
    fn new() -> Self {
        Self { dir: tempfile::tempdir().unwrap() }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_stocksheet"));
        cmd.current_dir(env!("CARGO_MANIFEST_DIR"));
        cmd.env_remove("RUST_LOG");
        cmd.arg("--config").arg(self.dir.path().join("settings.json"));
        cmd
    }

    fn recon(&self, backend: &str, args: &[&str]) -> Output {
        self.cmd()
            .arg("recon")
            .arg("--store-dir")
            .arg(self.dir.path().join("store"))
            .arg("--backend")
            .arg(backend)
            .args(args)
            .output()
            .unwrap()
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cmd().args(args).output().unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {}", stdout(output)))
}

// ---------------------------------------------------------------------------
// show / totals / validate / summary
// ---------------------------------------------------------------------------

#[test]
fn show_resolves_every_period() {
    let env = Env::new();
    let output = env.run(&["show", &fixture("store.sheet.json"), "--json"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let value = json(&output);
    assert_eq!(value["sheet"], "Main Store");
    // hidden column left out
    let columns: Vec<&str> = value["columns"].as_array().unwrap().iter().map(|c| c.as_str().unwrap()).collect();
    assert_eq!(columns, vec!["date", "opening-stock", "received", "used", "transfer-in", "closing-stock"]);
    let closing: Vec<f64> = value["rows"].as_array().unwrap().iter().map(|r| r["values"][5].as_f64().unwrap()).collect();
    assert_eq!(closing, vec![40.0, 25.0, 40.0, 50.0]);
    assert_eq!(value["rows"][1]["date"], "2025-01-02");
    assert_eq!(value["totals"][0], serde_json::Value::Null);
    assert_eq!(value["totals"][5], 155.0);
}

#[test]
fn show_table_has_totals_row() {
    let env = Env::new();
    let output = env.run(&["show", &fixture("store.sheet.json"), "--all"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("Main Store (4 periods)"));
    assert!(text.contains("Closing Stock"));
    assert!(text.contains("Notes Hidden"));
    let last = text.lines().last().unwrap();
    assert!(last.starts_with("Total"), "{last}");
    assert!(last.split_whitespace().any(|cell| cell == "155"), "{last}");
}

#[test]
fn totals_follow_references_and_range() {
    let env = Env::new();
    let output = env.run(&["totals", &fixture("store.sheet.json"), "--refs", &fixture("links.json"), "--json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let value = json(&output);
    let closing = value.as_array().unwrap().iter().find(|t| t["column"] == "closing-stock").unwrap();
    assert_eq!(closing["total"], 169.0);
    assert_eq!(closing["kind"], "derived");

    let output = env.run(&[
        "totals",
        &fixture("store.sheet.json"),
        "--from",
        "2025-01-02",
        "--to",
        "2025-01-03",
        "--json",
    ]);
    let value = json(&output);
    let received = value.as_array().unwrap().iter().find(|t| t["column"] == "received").unwrap();
    assert_eq!(received["total"], 20.0);
}

#[test]
fn invalid_sheet_exits_10() {
    let env = Env::new();
    let output = env.run(&["validate", &fixture("cyclic.sheet.json")]);
    assert_eq!(output.status.code(), Some(10));
    assert!(stderr(&output).contains("error:"));

    let output = env.run(&["validate", &fixture("store.sheet.json")]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("7 columns (2 computed) and 4 periods"));
}

#[test]
fn missing_file_exits_3() {
    let env = Env::new();
    let output = env.run(&["totals", "does-not-exist.json"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn summary_reads_stock_columns() {
    let env = Env::new();
    let output = env.run(&["summary", &fixture("store.sheet.json"), "--json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let value = json(&output);
    assert_eq!(value["sheetName"], "Main Store");
    assert_eq!(value["groupName"], "Kitchen");
    assert_eq!(value["openingStockTotal"], 0.0);
    assert_eq!(value["closingStockTotal"], 50.0);
    assert_eq!(value["hasStockColumns"], true);

    let output = env.run(&["summary", &fixture("store.sheet.json"), "--closing", "nope", "--json"]);
    assert_eq!(json(&output)["hasStockColumns"], false);
}

// ---------------------------------------------------------------------------
// draft
// ---------------------------------------------------------------------------

#[test]
fn draft_previews_and_commits() {
    let env = Env::new();
    let output = env.run(&[
        "draft",
        &fixture("store.sheet.json"),
        "--date",
        "2025-01-05",
        "--set",
        "received=5",
        "--json",
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    let value = json(&output);
    let values = value["values"].as_array().unwrap();
    let closing = values.iter().find(|v| v[0] == "closing-stock").unwrap();
    assert_eq!(closing[1], 55.0);
    assert_eq!(value["committed"], false);

    let output = env.run(&[
        "draft",
        &fixture("store.sheet.json"),
        "--date",
        "2025-01-05",
        "--set",
        "received=5",
        "--subrows",
        r#"used=[{"item":"flour","qty":2},{"item":"salt","qty":"3"}]"#,
        "--commit",
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("committed; totals now:"));
    // 155 + (50 + 5 - 5)
    assert!(text.lines().any(|l| l.trim_start().starts_with("closing-stock") && l.ends_with("205")), "{text}");
}

#[test]
fn draft_rejects_computed_and_fed_columns() {
    let env = Env::new();
    for column in ["closing-stock=3", "opening-stock=1", "transfer-in=2"] {
        let output = env.run(&["draft", &fixture("store.sheet.json"), "--date", "2025-01-05", "--set", column]);
        assert_eq!(output.status.code(), Some(12), "{column}: {}", stderr(&output));
    }

    let output = env.run(&["draft", &fixture("store.sheet.json"), "--date", "2025-01-02", "--commit"]);
    assert_eq!(output.status.code(), Some(12));

    let output = env.run(&["draft", &fixture("store.sheet.json"), "--date", "someday"]);
    assert_eq!(output.status.code(), Some(2));

    let output = env.run(&["draft", &fixture("store.sheet.json"), "--date", "2025-01-05", "--add", "opening-stock=5"]);
    assert_eq!(output.status.code(), Some(12));
    let output = env.run(&["draft", &fixture("store.sheet.json"), "--date", "2025-01-05", "--add", "received=5"]);
    assert_eq!(output.status.code(), Some(12));
    assert!(stderr(&output).contains("not recurrent"));
}

#[test]
fn draft_must_follow_latest_period() {
    let env = Env::new();
    let output = env.run(&["draft", &fixture("store.sheet.json"), "--date", "2024-12-31", "--set", "received=5"]);
    assert_eq!(output.status.code(), Some(12));
    assert!(stderr(&output).contains("must be after the latest stored period 2025-01-04"), "{}", stderr(&output));
}

// ---------------------------------------------------------------------------
// ingest
// ---------------------------------------------------------------------------

#[test]
fn ingest_counts_skipped_lines() {
    let env = Env::new();
    let output = env.run(&["ingest", &fixture("bad-lines.sse"), "--json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let value = json(&output);
    assert_eq!(value["sheets"].as_array().unwrap().len(), 2);
    assert_eq!(value["skipped"], 1);
    assert_eq!(value["complete"], true);

    let output = env.run(&["ingest", &fixture("bad-lines.sse"), "--strict"]);
    assert_eq!(output.status.code(), Some(5));
    assert!(stdout(&output).contains("2 sheets: opening 160, closing 145, difference -15"));
}

// ---------------------------------------------------------------------------
// recon
// ---------------------------------------------------------------------------

fn recon_workflow(backend: &str) {
    let env = Env::new();

    let output = env.recon(backend, &["status"]);
    assert_eq!(output.status.code(), Some(20), "{}", stderr(&output));

    let output = env.recon(backend, &["start", &fixture("stock.sse"), "--from", "2025-03-01", "--to", "2025-03-31"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("started reconciliation of 4 sheets in 2 groups"));

    let output = env.recon(backend, &["start", &fixture("stock.sse")]);
    assert_eq!(output.status.code(), Some(21));

    let output = env.recon(backend, &["count", "Main Bar", "closing", "90"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("difference -5"));
    env.recon(backend, &["count", "Pool Bar", "closing", "57 btl"]);

    let output = env.recon(backend, &["count", "Cellar", "opening", "1"]);
    assert_eq!(output.status.code(), Some(21));

    let output = env.recon(backend, &["status", "--group", "Front", "--json"]);
    let value = json(&output);
    assert_eq!(value["totals"]["sheets"], 2);
    assert_eq!(value["totals"]["closingDifference"], -3.0);
    assert_eq!(value["sheets"][1]["reconClosingStock"], "57 btl");
    assert_eq!(value["groups"].as_array().unwrap().len(), 1);
    assert_eq!(value["groups"][0]["groupName"], "Front");
    assert_eq!(value["groups"][0]["variance"], -30.0);
    assert_eq!(value["groups"][0]["averageStock"], 75.0);

    let output = env.recon(backend, &["status"]);
    assert!(stdout(&output).lines().any(|l| l.starts_with("Ungrouped")), "{}", stdout(&output));

    let output = env.recon(backend, &["export", "--sort", "closingDifference"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let csv = stdout(&output);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "Sheet Name,Group,Opening Stock,Recon Opening,Opening Difference,Closing Stock,Recon Closing,Closing Difference"
    );
    assert_eq!(lines[1], "Kitchen,Back,40,0,0,50,0,0");
    assert_eq!(lines[2], "Main Bar,Front,120,0,0,95,90,-5");
    assert_eq!(lines[3], "Pool Bar,Front,60,0,0,55,57,2");
    assert_eq!(lines[4], "Office,Ungrouped,0,0,0,0,0,0");
    assert_eq!(lines[5], "Total,,220,0,0,200,147,-3");

    let output = env.recon(backend, &["save"]);
    assert!(output.status.success());

    // saved progress is continued by the next command
    let output = env.recon(backend, &["count", "Kitchen", "opening", "41"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let output = env.recon(backend, &["clear"]);
    assert!(output.status.success());
    let output = env.recon(backend, &["status"]);
    assert_eq!(output.status.code(), Some(20));
}

#[test]
fn recon_workflow_json_store() {
    recon_workflow("json");
}

#[test]
fn recon_workflow_sqlite_store() {
    recon_workflow("sqlite");
}

#[test]
fn recon_export_to_file() {
    let env = Env::new();
    env.recon("json", &["start", &fixture("stock.sse")]);
    let out = env.dir.path().join("report.csv");
    let output = env.recon("json", &["export", "--group", "Back", "-o", out.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.contains("Kitchen,Back,40,0,0,50,0,0"));
}
