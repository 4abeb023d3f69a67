//! Integration tests for the oneclick_run and health_gate CLIs
//!
//! Jobs are small `/bin/sh` scripts honoring the job contract
//! (`--mode --input --output [--top20]`), so these run on unix only.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::{tempdir, TempDir};

const GOOD_JOB: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    --top20) top="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "writing $out"
printf 'code,name,light\n2330,TSMC,GREEN\n' > "$out"
if [ -n "$top" ]; then printf 'code,light\n2330,GREEN\n' > "$top"; fi
exit 0
"#;

const FAILING_JOB: &str = "echo 'primary exploded' 1>&2\nexit 1\n";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(primary: &str, fallback: &str) -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("fallback_core")).unwrap();
        fs::write(dir.path().join("primary.sh"), primary).unwrap();
        fs::write(dir.path().join("fallback_core/fallback.sh"), fallback).unwrap();
        fs::write(dir.path().join("input.csv"), "code,close\n2330,600\n").unwrap();
        Self { dir }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn oneclick(&self, extra: &[&str]) -> Output {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_oneclick_run"));
        cmd.current_dir(self.dir.path())
            .args(["--mode", "pre"])
            .arg("--input")
            .arg(self.path("input.csv"))
            .arg("--output")
            .arg(self.path("out/daily.csv"))
            .arg("--primary")
            .arg(self.path("primary.sh"))
            .arg("--fallback")
            .arg(self.path("fallback_core/fallback.sh"))
            .args(["--interpreter", "/bin/sh"])
            .arg("--log-dir")
            .arg(self.path("logs"))
            .arg("--ledger")
            .arg(self.path("run_summary.jsonl"))
            .args(["--require-column", "code,light"])
            .args(extra);
        cmd.output().expect("failed to launch oneclick_run")
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_primary_success_writes_status_ledger_and_log() {
    let ws = Workspace::new(GOOD_JOB, GOOD_JOB);
    let out = ws.oneclick(&["--run-id", "it1", "--top20", "out/top20.csv"]);

    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let status = read_json(&ws.path("out/RUN_STATUS.json"));
    assert_eq!(status["result"], "SUCCESS");
    assert_eq!(status["used_core"], "PRIMARY");
    assert_eq!(status["output"]["sha256"].as_str().unwrap().len(), 64);
    assert!(ws.path("out/RUN_STATUS.txt").exists());
    assert!(ws.path("out/top20.csv").exists());

    let ledger = fs::read_to_string(ws.path("run_summary.jsonl")).unwrap();
    assert_eq!(ledger.lines().count(), 1);

    let log = fs::read_to_string(ws.path("logs/oneclick_pre_input_it1.log")).unwrap();
    assert!(log.contains("[PRIMARY] Running:"));
    assert!(log.contains("writing "));
}

#[test]
fn test_primary_failure_falls_back_to_tagged_output() {
    let ws = Workspace::new(FAILING_JOB, GOOD_JOB);
    let out = ws.oneclick(&["--run-id", "it2"]);

    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("FALLBACK TRIGGERED"));
    assert!(ws.path("out/daily__FALLBACK.csv").exists());
    assert!(!ws.path("out/daily.csv").exists());
    assert!(!ws.path("out/RUN_STATUS.json").exists());

    let status = read_json(&ws.path("out/RUN_STATUS__FALLBACK.json"));
    assert_eq!(status["used_core"], "FALLBACK");
    assert_eq!(status["primary_returncode"], 1);

    let log = fs::read_to_string(ws.path("logs/oneclick_pre_input_it2.log")).unwrap();
    assert!(log.contains("primary exploded"));
    assert!(log.contains("[FALLBACK] Running:"));
}

#[test]
fn test_both_tiers_failing_exits_3() {
    let ws = Workspace::new(FAILING_JOB, FAILING_JOB);
    let out = ws.oneclick(&[]);

    assert_eq!(out.status.code(), Some(3));
    let status = read_json(&ws.path("out/RUN_STATUS__FALLBACK.json"));
    assert_eq!(status["result"], "FAILED");
    assert_eq!(status["used_core"], "NONE");
}

#[test]
fn test_missing_input_exits_2() {
    let ws = Workspace::new(GOOD_JOB, GOOD_JOB);
    fs::remove_file(ws.path("input.csv")).unwrap();

    let out = ws.oneclick(&[]);
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(read_json(&ws.path("out/RUN_STATUS.json"))["result"], "FAILED");
}

#[test]
fn test_dry_run_reports_without_persisting() {
    let ws = Workspace::new(GOOD_JOB, GOOD_JOB);
    assert_eq!(ws.oneclick(&["--dry-run"]).status.code(), Some(0));

    fs::remove_file(ws.path("input.csv")).unwrap();
    assert_eq!(ws.oneclick(&["--dry-run"]).status.code(), Some(10));

    assert!(!ws.path("out/RUN_STATUS.json").exists());
    assert!(!ws.path("run_summary.jsonl").exists());
    assert!(!ws.path("out/daily.csv").exists());
}

#[test]
fn test_health_gate_alerts_without_history_then_clears() {
    let ws = Workspace::new(GOOD_JOB, GOOD_JOB);
    let gate = |ws: &Workspace| {
        Command::new(env!("CARGO_BIN_EXE_health_gate"))
            .current_dir(ws.path(""))
            .arg("--ledger")
            .arg(ws.path("run_summary.jsonl"))
            .args(["--min-samples", "1"])
            .output()
            .expect("failed to launch health_gate")
    };

    assert_eq!(gate(&ws).status.code(), Some(30));
    assert!(ws.path("HEALTH_ALERT.txt").exists());

    assert_eq!(ws.oneclick(&[]).status.code(), Some(0));
    let healthy = gate(&ws);
    assert_eq!(healthy.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&healthy.stdout);
    assert!(stdout.contains("[HEALTH] OK (1 entries in"));
    assert!(stdout.contains("run_summary.jsonl"));
    assert!(!ws.path("HEALTH_ALERT.txt").exists());
}
