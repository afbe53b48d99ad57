//! E2E workflow tests: init → register → sync → search → status.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn strata_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("strata"));
    cmd.current_dir(dir);
    cmd.env("STRATA_LOG", "error");
    cmd.env_remove("FORMAT");
    cmd
}

fn json_of(dir: &Path, args: &[&str]) -> Value {
    let output = strata_cmd(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("command should not crash");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON")
}

fn seed_articles(dir: &Path) {
    let conn = rusqlite::Connection::open(dir.join(".strata/strata.db")).expect("open db");
    conn.execute_batch(
        "CREATE TABLE articles (id INTEGER PRIMARY KEY, title TEXT, body TEXT);
         INSERT INTO articles (id, title, body) VALUES
            (1, 'Ownership', 'The borrow checker enforces ownership rules in Rust'),
            (2, 'Gardening', 'Tomatoes need sunlight and regular watering'),
            (3, 'Full text', 'SQLite FTS5 ranks matches with bm25'),
            (4, 'Lifetimes', 'Lifetimes let the borrow checker reason about references');",
    )
    .expect("seed articles");
}

fn initialized_project() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    strata_cmd(dir.path()).arg("init").assert().success();
    seed_articles(dir.path());
    dir
}

#[test]
fn help_lists_every_command() {
    let dir = TempDir::new().expect("temp dir");
    strata_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("register")
                .and(predicate::str::contains("sync"))
                .and(predicate::str::contains("search"))
                .and(predicate::str::contains("status")),
        );
}

#[test]
fn init_writes_config_and_catalog() {
    let dir = TempDir::new().expect("temp dir");
    let report = json_of(dir.path(), &["init"]);

    assert_eq!(report["config_written"], true);
    assert_eq!(report["schema_version"], 2);
    assert!(dir.path().join(".strata/config.toml").is_file());
    assert!(dir.path().join(".strata/strata.db").is_file());

    let again = json_of(dir.path(), &["init"]);
    assert_eq!(again["config_written"], false);
}

#[test]
fn commands_before_init_report_not_initialized() {
    let dir = TempDir::new().expect("temp dir");
    strata_cmd(dir.path())
        .args(["status", "--offline"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1001").and(predicate::str::contains("strata init")));
    assert!(!dir.path().join(".strata/strata.db").exists());
}

#[test]
fn register_sync_search_round_trip() {
    let dir = initialized_project();

    let registered = json_of(
        dir.path(),
        &["register", "articles", "--key", "id", "--content", "body"],
    );
    assert_eq!(registered["queued"], 4);
    assert_eq!(registered["columns"], serde_json::json!(["id", "title", "body"]));

    let synced = json_of(dir.path(), &["sync"]);
    assert_eq!(synced[0]["table"], "articles");
    assert_eq!(synced[0]["embedded"], 4);

    let found = json_of(dir.path(), &["search", "articles", "borrow checker", "-k", "2"]);
    let results = found["results"].as_array().expect("results array");
    assert!(!results.is_empty() && results.len() <= 2);
    let top = results[0]["identity"].as_str().expect("identity");
    assert!(top == "1" || top == "4", "unexpected top hit {top}");
    assert!(results[0]["payload"]["title"].is_string());

    let client = json_of(
        dir.path(),
        &["search", "articles", "borrow checker", "-k", "2", "--client-fusion"],
    );
    let identities = |value: &Value| -> Vec<String> {
        value["results"]
            .as_array()
            .expect("results array")
            .iter()
            .map(|r| r["identity"].as_str().unwrap_or_default().to_string())
            .collect()
    };
    assert_eq!(identities(&client), identities(&found));
}

#[test]
fn status_reports_queue_and_providers() {
    let dir = initialized_project();
    strata_cmd(dir.path())
        .args(["register", "articles", "--key", "id", "--content", "body"])
        .assert()
        .success();

    let status = json_of(dir.path(), &["status", "--offline"]);
    assert_eq!(status["tables"][0]["pending"], 4);
    assert_eq!(status["tables"][0]["embedded"], 0);
    assert_eq!(status["providers"][0]["name"], "hashing");
    assert!(status["providers"][0]["ready"].is_null());

    strata_cmd(dir.path()).args(["sync", "articles"]).assert().success();
    let status = json_of(dir.path(), &["status", "--offline"]);
    assert_eq!(status["tables"][0]["pending"], 0);
    assert_eq!(status["tables"][0]["embedded"], 4);
}

#[test]
fn typed_errors_carry_codes() {
    let dir = initialized_project();

    strata_cmd(dir.path())
        .args(["search", "articles", "rust"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2001"));

    strata_cmd(dir.path())
        .args(["register", "articles", "--key", "id", "--content", "body"])
        .assert()
        .success();
    strata_cmd(dir.path())
        .args(["register", "articles", "--key", "id", "--content", "body"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2002"));

    strata_cmd(dir.path())
        .args(["search", "articles", "rust", "--field", "title"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2004"));

    strata_cmd(dir.path())
        .args(["search", "articles", "rust", "-k", "0", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error_code\": \"E4004\""));
}

#[test]
fn unregister_keeps_source_table() {
    let dir = initialized_project();
    strata_cmd(dir.path())
        .args(["register", "articles", "--key", "id", "--content", "body"])
        .assert()
        .success();
    strata_cmd(dir.path())
        .args(["unregister", "articles"])
        .assert()
        .success();

    let status = json_of(dir.path(), &["status", "--offline"]);
    assert_eq!(status["tables"], serde_json::json!([]));

    let conn = rusqlite::Connection::open(dir.path().join(".strata/strata.db")).expect("open db");
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))
        .expect("count");
    assert_eq!(rows, 4);
}

#[test]
fn rows_without_terms_are_rejected_and_sync_moves_on() {
    let dir = initialized_project();
    let conn = rusqlite::Connection::open(dir.path().join(".strata/strata.db")).expect("open db");
    conn.execute(
        "INSERT INTO articles (id, title, body) VALUES (5, 'Noise', '!!! ---')",
        [],
    )
    .expect("insert noise row");
    strata_cmd(dir.path())
        .args(["register", "articles", "--key", "id", "--content", "body"])
        .assert()
        .success();

    let synced = json_of(dir.path(), &["sync"]);
    assert_eq!(synced[0]["embedded"], 4);
    assert_eq!(synced[0]["rejected"], 1);

    let status = json_of(dir.path(), &["status", "--offline"]);
    assert_eq!(status["tables"][0]["pending"], 0);

    let again = json_of(dir.path(), &["sync"]);
    assert_eq!(again[0]["dequeued"], 0);
}

#[test]
fn one_failing_table_does_not_stop_the_others() {
    let dir = initialized_project();
    strata_cmd(dir.path())
        .args(["register", "articles", "--key", "id", "--content", "body"])
        .assert()
        .success();
    strata_cmd(dir.path()).arg("sync").assert().success();

    std::fs::write(
        dir.path().join(".strata/config.toml"),
        "[[embedding.providers]]\nkind = \"hashing\"\ndimensions = 32\n",
    )
    .expect("switch provider");
    let conn = rusqlite::Connection::open(dir.path().join(".strata/strata.db")).expect("open db");
    conn.execute_batch(
        "UPDATE articles SET body = 'Ownership and borrowing in Rust' WHERE id = 1;
         CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
         INSERT INTO notes (id, body) VALUES (1, 'rust notes'), (2, 'garden notes');",
    )
    .expect("edit and seed");
    strata_cmd(dir.path())
        .args(["register", "notes", "--key", "id", "--content", "body"])
        .assert()
        .success();

    let output = strata_cmd(dir.path())
        .args(["sync", "--json"])
        .output()
        .expect("command should not crash");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("E2005"), "{stderr}");
    assert!(stderr.contains("1 of 2 table(s) failed"), "{stderr}");

    let report: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    let row = |table: &str| -> Value {
        report
            .as_array()
            .expect("report array")
            .iter()
            .find(|row| row["table"] == table)
            .cloned()
            .expect("table row")
    };
    assert_eq!(row("articles")["error"]["error_code"], "E2005");
    assert_eq!(row("notes")["embedded"], 2);
    assert!(row("notes")["error"].is_null());

    let status = json_of(dir.path(), &["status", "--offline"]);
    let articles = status["tables"]
        .as_array()
        .expect("tables")
        .iter()
        .find(|t| t["table"] == "articles")
        .cloned()
        .expect("articles status");
    assert_eq!(articles["pending"], 1);

    strata_cmd(dir.path())
        .args(["search", "articles", "rust"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2005"));

    let rebuilt = json_of(dir.path(), &["sync", "articles", "--rebuild"]);
    assert_eq!(rebuilt[0]["embedded"], 4);
    let found = json_of(dir.path(), &["search", "articles", "borrow checker"]);
    assert!(!found["results"].as_array().expect("results").is_empty());
}
