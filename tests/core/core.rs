use backroom::core::config::Config;
use backroom::core::error::BackroomError;
use backroom::core::store::{Payload, Record, RecordStore, SqliteRecordStore};
use backroom::core::db;
use backroom::hooks::{
    Action, Adapter, AdapterSet, DeliveryError, Dispatcher, HookRegistry, HookRule, HookRuleConfig,
};
use backroom::service::Backroom;
use rusqlite::Connection;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use tempfile::tempdir;

fn payload(value: Value) -> Payload {
    value.as_object().cloned().expect("object payload")
}

fn service(db_path: &Path, hooks: Vec<HookRuleConfig>) -> Backroom {
    let mut config = Config::default();
    config.database.path = db_path.to_path_buf();
    config.hooks = hooks;
    Backroom::from_config(&config).expect("service from config")
}

#[test]
fn store_round_trip_preserves_cage_and_payload() {
    let tmp = tempdir().expect("tempdir");
    let store = SqliteRecordStore::open(&tmp.path().join("records.db")).expect("open store");

    let record = Record::from_json_str("widgets", r#"{"a": 1}"#).expect("record");
    store.create(&record).expect("create");

    let loaded = store.get(record.id).expect("get");
    assert_eq!(loaded.cage, "widgets");
    assert_eq!(loaded.data, payload(json!({"a": 1})));
    assert_eq!(loaded, record);
    let stamp = loaded.created_at.strip_suffix('Z').expect("Z-suffixed stamp");
    assert!(stamp.parse::<u64>().is_ok(), "{}", loaded.created_at);
}

#[test]
fn deleting_a_cage_removes_every_record() {
    let tmp = tempdir().expect("tempdir");
    let store = SqliteRecordStore::open(&tmp.path().join("records.db")).expect("open store");

    for n in 0..3 {
        let record = Record::new("batch", payload(json!({ "n": n }))).expect("record");
        store.create(&record).expect("create");
    }
    let keep = Record::new("other", Payload::new()).expect("record");
    store.create(&keep).expect("create");

    assert_eq!(store.delete_cage("batch").expect("delete cage").len(), 3);
    assert!(store.list_by_cage("batch").expect("list").is_empty());
    assert_eq!(store.list_cages().expect("cages"), vec!["other"]);
}

#[test]
fn records_schema_is_idempotent() {
    let tmp = tempdir().expect("tempdir");
    let db_path = tmp.path().join("records.db");
    db::initialize_records_db(&db_path).expect("first init");
    db::initialize_records_db(&db_path).expect("second init");

    let conn = Connection::open(&db_path).expect("open");
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .expect("journal mode");
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn concurrent_creates_are_all_persisted() {
    let tmp = tempdir().expect("tempdir");
    let svc = Arc::new(service(&tmp.path().join("records.db"), vec![]));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let svc = Arc::clone(&svc);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                svc.create_record("parallel", payload(json!({ "n": n })))
                    .expect("create")
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    assert_eq!(svc.list_records("parallel").expect("list").len(), 8);
}

#[derive(Default)]
struct DeleteCounter(AtomicUsize);

impl Adapter for DeleteCounter {
    fn deliver(&self, _rule: &HookRule, _action: Action, _record: &Record) -> Result<(), DeliveryError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn delete_cage_fires_one_hook_per_removed_record_under_concurrent_creates() {
    let tmp = tempdir().expect("tempdir");
    let store = SqliteRecordStore::open(&tmp.path().join("records.db")).expect("open store");
    let registry = HookRegistry::from_configs(&[HookRuleConfig {
        cage: "orders".to_string(),
        action: vec![Action::Delete],
        condition: None,
        adapter: "count".to_string(),
        target: "deletes".to_string(),
    }])
    .expect("rules compile");
    let counter = Arc::new(DeleteCounter::default());
    let mut adapters = AdapterSet::new();
    adapters.register("count", counter.clone());
    let svc = Arc::new(Backroom::new(
        Arc::new(store),
        Dispatcher::new(Arc::new(registry), Arc::new(adapters)),
    ));

    const WRITERS: usize = 4;
    const PER_WRITER: usize = 25;
    let barrier = Arc::new(Barrier::new(WRITERS + 1));
    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let svc = Arc::clone(&svc);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for n in 0..PER_WRITER {
                    svc.create_record("orders", payload(json!({ "w": w, "n": n })))
                        .expect("create");
                }
            })
        })
        .collect();

    barrier.wait();
    let mut deleted = 0;
    for _ in 0..20 {
        deleted += svc.delete_cage("orders").expect("delete cage");
    }
    for writer in writers {
        writer.join().expect("thread");
    }
    deleted += svc.delete_cage("orders").expect("final delete cage");

    assert_eq!(deleted, WRITERS * PER_WRITER);
    assert_eq!(counter.0.load(Ordering::SeqCst), deleted);
    assert!(svc.list_records("orders").expect("list").is_empty());
}

#[test]
fn service_reports_hook_failure_after_update() {
    let tmp = tempdir().expect("tempdir");
    let svc = service(
        &tmp.path().join("records.db"),
        vec![HookRuleConfig {
            cage: "orders".to_string(),
            action: vec![Action::Update],
            condition: Some("cage.total > 100".to_string()),
            adapter: "mail".to_string(),
            target: "ops@example.com".to_string(),
        }],
    );

    let record = svc
        .create_record("orders", payload(json!({"total": 10})))
        .expect("create has no hooks");
    let err = svc
        .update_record(&record.id.to_string(), None, payload(json!({"total": 500})))
        .expect_err("mail adapter is not configured");

    match &err {
        BackroomError::HookFailed { action, record_id, .. } => {
            assert_eq!(*action, Action::Update);
            assert_eq!(record_id, &record.id.to_string());
        }
        other => panic!("unexpected error: {other}"),
    }
    let stored = svc.get_record(&record.id.to_string()).expect("still stored");
    assert_eq!(stored.data["total"], 500);
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

fn spawn_server(svc: Backroom) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    listener.set_nonblocking(true).expect("nonblocking");
    let app = Arc::new(svc);

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).expect("tokio listener");
            axum::serve(listener, backroom::http::router(app))
                .await
                .expect("serve");
        });
    });

    format!("http://{}", addr)
}

fn call(method: &str, url: &str, body: Option<Value>) -> (u16, Value) {
    let request = ureq::request(method, url);
    let result = match body {
        Some(body) => request.send_json(body),
        None => request.call(),
    };
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(e) => panic!("{method} {url}: {e}"),
    };
    let status = response.status();
    let text = response.into_string().expect("response body");
    let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
    (status, value)
}

#[test]
fn http_record_lifecycle() {
    let tmp = tempdir().expect("tempdir");
    let base = spawn_server(service(&tmp.path().join("http.db"), vec![]));

    let (status, body) = call("GET", &format!("{base}/health"), None);
    assert_eq!((status, body), (200, Value::String("OK".to_string())));

    let (status, created) = call(
        "POST",
        &format!("{base}/record/create"),
        Some(json!({"cage": "orders", "data": {"total": 150}})),
    );
    assert_eq!(status, 201);
    let id = created["id"].as_str().expect("id").to_string();
    assert_eq!(id.len(), 26);
    assert_eq!(created["cage"], "orders");

    let (status, fetched) = call("GET", &format!("{base}/record/{id}"), None);
    assert_eq!(status, 200);
    assert_eq!(fetched["data"], json!({"total": 150}));

    let (status, updated) = call(
        "PUT",
        &format!("{base}/record/{id}"),
        Some(json!({"cage": "orders", "data": {"total": 75}})),
    );
    assert_eq!(status, 200);
    assert_eq!(updated["data"]["total"], 75);

    let (status, _) = call(
        "PUT",
        &format!("{base}/record/{id}"),
        Some(json!({"cage": "elsewhere", "data": {}})),
    );
    assert_eq!(status, 400);

    let (status, cages) = call("GET", &format!("{base}/cages"), None);
    assert_eq!(status, 200);
    assert_eq!(cages, json!(["orders"]));

    let (status, listed) = call("GET", &format!("{base}/cage/orders"), None);
    assert_eq!(status, 200);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, deleted) = call("DELETE", &format!("{base}/record/{id}"), None);
    assert_eq!(status, 200);
    assert_eq!(deleted, json!({"success": true, "deleted": 1}));

    let (status, missing) = call("GET", &format!("{base}/record/{id}"), None);
    assert_eq!(status, 404);
    assert!(missing["error"].is_string());
}

#[test]
fn http_error_statuses() {
    let tmp = tempdir().expect("tempdir");
    let base = spawn_server(service(&tmp.path().join("http.db"), vec![]));

    let (status, body) = call("GET", &format!("{base}/record/not-a-ulid"), None);
    assert_eq!(status, 400);
    assert!(body["error"].as_str().expect("error").contains("not-a-ulid"));

    let (status, _) = call(
        "POST",
        &format!("{base}/record/create"),
        Some(json!({"cage": "orders", "data": [1, 2, 3]})),
    );
    assert_eq!(status, 400);

    let (status, _) = call(
        "POST",
        &format!("{base}/record/create"),
        Some(json!({"cage": "", "data": {}})),
    );
    assert_eq!(status, 400);

    let response = ureq::post(&format!("{base}/record/create"))
        .set("Content-Type", "application/json")
        .send_string("{not json");
    match response {
        Err(ureq::Error::Status(code, _)) => assert_eq!(code, 400),
        other => panic!("expected 400, got {other:?}"),
    }
}

#[test]
fn http_bulk_delete_and_hook_failure() {
    let tmp = tempdir().expect("tempdir");
    let base = spawn_server(service(
        &tmp.path().join("http.db"),
        vec![HookRuleConfig {
            cage: "alerts".to_string(),
            action: vec![Action::Create],
            condition: Some("cage.level == 'page'".to_string()),
            adapter: "pager".to_string(),
            target: "oncall".to_string(),
        }],
    ));

    for n in 0..3 {
        let (status, _) = call(
            "POST",
            &format!("{base}/record/create"),
            Some(json!({"cage": "batch", "data": {"n": n}})),
        );
        assert_eq!(status, 201);
    }
    let (status, body) = call("DELETE", &format!("{base}/cage/batch"), None);
    assert_eq!(status, 200);
    assert_eq!(body, json!({"success": true, "deleted": 3}));
    let (_, listed) = call("GET", &format!("{base}/cage/batch"), None);
    assert_eq!(listed, json!([]));

    let (status, _) = call(
        "POST",
        &format!("{base}/record/create"),
        Some(json!({"cage": "alerts", "data": {"level": "info"}})),
    );
    assert_eq!(status, 201);

    let (status, failed) = call(
        "POST",
        &format!("{base}/record/create"),
        Some(json!({"cage": "alerts", "data": {"level": "page"}})),
    );
    assert_eq!(status, 500);
    assert_eq!(failed["action"], "create");
    let record_id = failed["record_id"].as_str().expect("record id");
    let (status, _) = call("GET", &format!("{base}/record/{record_id}"), None);
    assert_eq!(status, 200, "mutation survives the hook failure");
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

fn write_config(dir: &Path, hooks: &str) -> std::path::PathBuf {
    let config_path = dir.join("backroom.toml");
    let content = format!(
        "[database]\npath = '{}'\n\n[log]\nlevel = \"warn\"\n\n{}",
        dir.join("cli.db").display(),
        hooks
    );
    fs::write(&config_path, content).expect("write config");
    config_path
}

fn backroom_cmd(config: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_backroom"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("BACKROOM_CONFIG")
        .env_remove("BACKROOM_DATABASE_PATH")
        .env_remove("BACKROOM_API_LISTEN")
        .env_remove("BACKROOM_LOG")
        .output()
        .expect("run backroom")
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn cli_cage_commands_round_trip() {
    let tmp = tempdir().expect("tempdir");
    let config = write_config(
        tmp.path(),
        "[[hooks]]\ncage = \"orders\"\naction = [\"create\", \"delete\"]\nif = \"cage.total > 100\"\nadapter = \"log\"\ntarget = \"billing\"\n",
    );

    let created = backroom_cmd(&config, &["cage", "create", "orders", r#"{"total": 150}"#]);
    assert!(created.status.success(), "{}", String::from_utf8_lossy(&created.stderr));
    let out = stdout(&created);
    let id = out
        .trim()
        .rsplit(' ')
        .next()
        .expect("id in output")
        .to_string();
    assert_eq!(id.len(), 26, "unexpected output: {out}");

    let file = tmp.path().join("payload.json");
    fs::write(&file, r#"{"total": 5}"#).expect("write payload");
    let from_file = backroom_cmd(&config, &["cage", "create", "orders", file.to_str().expect("utf8")]);
    assert!(from_file.status.success());

    let got = backroom_cmd(&config, &["cage", "get", &id, "--clean"]);
    assert!(got.status.success());
    let data: Value = serde_json::from_str(&stdout(&got)).expect("clean output is JSON");
    assert_eq!(data, json!({"total": 150}));

    let numbered = backroom_cmd(&config, &["cage", "get", &id]);
    assert!(stdout(&numbered).starts_with("000\t{"));

    let cages = backroom_cmd(&config, &["cage", "list-cages"]);
    assert_eq!(stdout(&cages).trim(), "orders");

    let listed = backroom_cmd(&config, &["cage", "list", "orders"]);
    assert_eq!(stdout(&listed).lines().count(), 2);

    let hooks = backroom_cmd(&config, &["hooks", "list", "--cage", "orders"]);
    assert!(stdout(&hooks).contains("log -> billing"));

    let check = backroom_cmd(&config, &["hooks", "check"]);
    assert!(check.status.success());

    let deleted = backroom_cmd(&config, &["cage", "delete-cage", "orders"]);
    assert!(deleted.status.success());
    assert!(stdout(&deleted).starts_with("2 caged records deleted"));

    let bad_id = backroom_cmd(&config, &["cage", "get", "nope"]);
    assert!(!bad_id.status.success());
}

#[test]
fn cli_hooks_check_fails_on_unknown_adapter() {
    let tmp = tempdir().expect("tempdir");
    let config = write_config(
        tmp.path(),
        "[[hooks]]\ncage = \"orders\"\naction = [\"update\"]\nadapter = \"mail\"\ntarget = \"ops@example.com\"\n",
    );

    let check = backroom_cmd(&config, &["hooks", "check"]);
    assert!(!check.status.success());
    assert!(stdout(&check).contains("unknown adapter 'mail'"));
}

#[test]
fn cli_rejects_unparsable_condition() {
    let tmp = tempdir().expect("tempdir");
    let config = write_config(
        tmp.path(),
        "[[hooks]]\ncage = \"orders\"\naction = [\"create\"]\nif = \"cage.total >\"\nadapter = \"log\"\ntarget = \"x\"\n",
    );

    let out = backroom_cmd(&config, &["cage", "list-cages"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid condition"));
}

#[test]
fn cli_version() {
    let out = Command::new(env!("CARGO_BIN_EXE_backroom"))
        .arg("version")
        .output()
        .expect("run backroom");
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim(), format!("v{}", env!("CARGO_PKG_VERSION")));
}
