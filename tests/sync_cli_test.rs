use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const COLLECTION: &str = "3656879060";

fn item(bv: &str, title: &str) -> Value {
    json!({
        "bv": bv,
        "url_bv": format!("https://www.bilibili.com/video/{bv}"),
        "title": title,
        "desc": format!("about {title}"),
        "time": 1700000000,
        "up": "uploader",
        "fetch_time": "2025-11-02T21:59:41",
        "duration": 300,
        "success": true,
        "subtitle": {"subtitles": [
            {"lan": "ai-zh", "lan_doc": "中文（自动生成）", "content": format!("machine words for {bv}")},
            {"lan": "zh-CN", "lan_doc": "中文（中国）", "content": format!("human words for {bv}\\nsecond line")}
        ]}
    })
}

fn write_dump(path: &Path, items: &[Value]) {
    fs::write(path, serde_json::to_string_pretty(items).expect("json")).expect("write dump");
}

struct Env {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    home: PathBuf,
    dump: PathBuf,
}

impl Env {
    fn new() -> Self {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().to_path_buf();
        let home = root.join("favsync");
        fs::create_dir_all(&home).expect("mkdir home");
        Self {
            dump: root.join("dump.json"),
            root,
            home,
            _tmp: tmp,
        }
    }

    fn markdown_dir(&self) -> PathBuf {
        self.home.join("output/markdown")
    }

    fn records_dir(&self) -> PathBuf {
        self.home.join("output/sync_records")
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("favsync");
        cmd.current_dir(&self.root)
            .env("HOME", &self.root)
            .env("FAVSYNC_HOME", &self.home)
            .env_remove("FAVSYNC_CONFIG")
            .env_remove("FAVSYNC_COLLECTION_ID")
            .env_remove("FAVSYNC_OUTPUT_DIR")
            .env_remove("FAVSYNC_RECORDS_DIR")
            .env_remove("FAVSYNC_LOGS_DIR")
            .env_remove("FAVSYNC_RECORD_POLICY")
            .env_remove("FAVSYNC_REWRITE_ENABLED")
            .env_remove("FAVSYNC_REWRITE_API_KEY")
            .env_remove("GLM_API_KEY");
        cmd
    }

    fn sync(&self) -> assert_cmd::assert::Assert {
        self.cmd()
            .arg("sync")
            .arg(COLLECTION)
            .arg("--dump")
            .arg(&self.dump)
            .assert()
    }
}

fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0)
}

fn snapshots(dir: &Path) -> Vec<PathBuf> {
    let mut out = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("sync_record_"))
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    out.sort();
    out
}

fn latest_synced(dir: &Path) -> Vec<String> {
    let latest = snapshots(dir).pop().expect("a snapshot");
    let snapshot: Value =
        serde_json::from_str(&fs::read_to_string(latest).expect("read")).expect("json");
    assert_eq!(
        snapshot["total_count"].as_u64(),
        Some(snapshot["synced_bvs"].as_array().expect("array").len() as u64)
    );
    snapshot["synced_bvs"]
        .as_array()
        .expect("array")
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

#[test]
fn sync_archives_new_items_incrementally() {
    let env = Env::new();
    write_dump(
        &env.dump,
        &[item("BV1A", "Alpha"), item("BV1B", "Beta"), item("BV1C", "Gamma")],
    );

    env.sync()
        .success()
        .stdout(predicate::str::contains("written=3"))
        .stdout(predicate::str::contains("snapshot=appended"));
    assert_eq!(count_files(&env.markdown_dir()), 3);
    assert_eq!(latest_synced(&env.records_dir()), vec!["BV1A", "BV1B", "BV1C"]);

    let alpha = fs::read_to_string(env.markdown_dir().join("Alpha.md")).expect("Alpha.md");
    assert!(alpha.starts_with("---\nbv: BV1A\n"));
    assert!(alpha.contains("time: 2023-11-14 22-13-20\n"));
    assert!(alpha.contains("# Alpha\n"));
    assert!(alpha.contains("human words for BV1A\nsecond line"));
    assert!(!alpha.contains("machine words"));

    write_dump(
        &env.dump,
        &[
            item("BV1A", "Alpha"),
            item("BV1B", "Beta"),
            item("BV1C", "Gamma"),
            item("BV1D", "Delta"),
        ],
    );
    env.sync()
        .success()
        .stdout(predicate::str::contains("attempted=1"))
        .stdout(predicate::str::contains("artifact=BV1D"));
    assert_eq!(count_files(&env.markdown_dir()), 4);
    assert_eq!(
        latest_synced(&env.records_dir()),
        vec!["BV1A", "BV1B", "BV1C", "BV1D"]
    );

    env.sync()
        .success()
        .stdout(predicate::str::contains("terminal=EMPTY_DELTA"))
        .stdout(predicate::str::contains("snapshot=skipped"));
    assert_eq!(count_files(&env.markdown_dir()), 4);
    assert_eq!(snapshots(&env.records_dir()).len(), 2);

    let audit = fs::read_to_string(env.home.join("logs/audit.log")).expect("audit log");
    assert!(audit.contains("EMPTY_DELTA"));
}

#[test]
fn colliding_titles_do_not_overwrite() {
    let env = Env::new();
    write_dump(
        &env.dump,
        &[item("BV1A", "Same: Name"), item("BV1B", "Same/ Name")],
    );
    env.sync().success();

    let first = fs::read_to_string(env.markdown_dir().join("Same_ Name.md")).expect("first");
    let second = fs::read_to_string(env.markdown_dir().join("Same_ Name_1.md")).expect("second");
    assert!(first.contains("bv: BV1A"));
    assert!(second.contains("bv: BV1B"));
}

#[test]
fn diff_lists_pending_without_writing() {
    let env = Env::new();
    write_dump(&env.dump, &[item("BV1B", "Beta"), item("BV1A", "Alpha")]);

    env.cmd()
        .arg("diff")
        .arg(COLLECTION)
        .arg("--dump")
        .arg(&env.dump)
        .assert()
        .success()
        .stdout(predicate::str::contains("history=missing"))
        .stdout(predicate::str::contains("pending=2"))
        .stdout(predicate::str::contains("pending_item=BV1A\npending_item=BV1B"));

    assert_eq!(count_files(&env.markdown_dir()), 0);
    assert!(snapshots(&env.records_dir()).is_empty());
}

#[test]
fn json_report_is_machine_readable() {
    let env = Env::new();
    write_dump(&env.dump, &[item("BV1A", "Alpha")]);

    let output = env
        .cmd()
        .arg("--json")
        .arg("sync")
        .arg(COLLECTION)
        .arg("--dump")
        .arg(&env.dump)
        .output()
        .expect("run");
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["command"], "sync");
    assert_eq!(report["ok"], true);
    assert!(
        report["details"]
            .as_array()
            .expect("details")
            .iter()
            .any(|d| d == "written=1")
    );
}

#[test]
fn missing_collection_id_fails_with_code() {
    let env = Env::new();
    write_dump(&env.dump, &[item("BV1A", "Alpha")]);

    env.cmd()
        .arg("sync")
        .arg("--dump")
        .arg(&env.dump)
        .assert()
        .failure()
        .stdout(predicate::str::contains("error_code=E009_INVALID_INPUT"));
}

#[test]
fn empty_manifest_aborts_run() {
    let env = Env::new();
    write_dump(&env.dump, &[]);

    env.sync()
        .failure()
        .stdout(predicate::str::contains("error_code=E002_MANIFEST_UNAVAILABLE"));
    assert!(snapshots(&env.records_dir()).is_empty());
}

#[test]
fn held_lock_refuses_second_run() {
    use fs2::FileExt;

    let env = Env::new();
    write_dump(&env.dump, &[item("BV1A", "Alpha")]);
    fs::create_dir_all(env.records_dir()).expect("mkdir records");
    let lock = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(env.records_dir().join(format!(".favsync-{COLLECTION}.lock")))
        .expect("open lock");
    lock.try_lock_exclusive().expect("hold lock");

    env.sync()
        .failure()
        .stdout(predicate::str::contains("error_code=E001_LOCKED"));
    assert_eq!(count_files(&env.markdown_dir()), 0);
}

#[test]
fn written_only_policy_from_config_file_retries_failures() {
    let env = Env::new();
    let config = env.root.join("favsync.toml");
    fs::write(
        &config,
        format!(
            "[sync]\ncollection_id = \"{COLLECTION}\"\nrecord_policy = \"written-only\"\n"
        ),
    )
    .expect("write config");
    fs::write(
        &env.dump,
        serde_json::to_string(&json!({
            "manifest": ["BV1A", "BV1B"],
            "items": [item("BV1A", "Alpha")]
        }))
        .expect("json"),
    )
    .expect("write dump");

    env.cmd()
        .env("FAVSYNC_CONFIG", &config)
        .arg("sync")
        .arg("--dump")
        .arg(&env.dump)
        .assert()
        .success()
        .stdout(predicate::str::contains("record_policy=written-only"))
        .stdout(predicate::str::contains("skipped=BV1B"));
    assert_eq!(latest_synced(&env.records_dir()), vec!["BV1A"]);

    env.cmd()
        .env("FAVSYNC_CONFIG", &config)
        .arg("diff")
        .arg("--dump")
        .arg(&env.dump)
        .assert()
        .success()
        .stdout(predicate::str::contains("pending_item=BV1B"));
}

#[test]
fn status_reports_history_after_sync() {
    let env = Env::new();
    write_dump(&env.dump, &[item("BV1A", "Alpha"), item("BV1B", "Beta")]);
    env.sync().success();

    env.cmd()
        .env("FAVSYNC_COLLECTION_ID", COLLECTION)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("snapshots=1"))
        .stdout(predicate::str::contains("latest_count=2"))
        .stdout(predicate::str::contains("FAVSYNC_COLLECTION_ID"))
        .stdout(predicate::str::contains("build_id="));
}
