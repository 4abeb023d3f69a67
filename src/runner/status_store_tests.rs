//! Status Store Tests

use crate::runner::paths::DEFAULT_FALLBACK_TAG;
use crate::runner::persist::RetryPolicy;
use crate::runner::record::{ArtifactSummary, RunOutcome, RunRecord, RunResult, UsedCore};
use crate::runner::run_key::RunKey;
use crate::runner::status_store::{StatusLocation, StatusStore};
use chrono::{TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn make_record(run_id: &str, result: RunResult, used_core: UsedCore) -> RunRecord {
    RunRecord {
        timestamp: Utc.with_ymd_and_hms(2026, 1, 19, 8, 30, 0).unwrap(),
        run_id: run_id.to_string(),
        run_key: RunKey::new("pre", "/data/daily_input.csv", "H1", "/data/out.csv"),
        result,
        used_core,
        outcome: if result == RunResult::Success {
            RunOutcome::Healthy
        } else {
            RunOutcome::Failed
        },
        output: ArtifactSummary::with_hash(Path::new("/data/out.csv"), 42, "AAA".into()),
        top_artifact: Some(ArtifactSummary::with_hash(
            Path::new("/data/top20.csv"),
            7,
            "TTT".into(),
        )),
        log: PathBuf::from("/logs/oneclick_pre_daily_input_r1.log"),
        primary_returncode: Some(0),
        fallback_returncode: None,
        primary_error: None,
        fallback_error: None,
    }
}

fn store() -> StatusStore {
    StatusStore::new(RetryPolicy::immediate(3))
}

#[test]
fn test_read_previous_absent_when_missing() {
    let dir = tempdir().unwrap();
    assert!(store()
        .read_previous(&StatusLocation::primary(dir.path()))
        .is_none());
}

#[test]
fn test_write_then_read_back() {
    let dir = tempdir().unwrap();
    let location = StatusLocation::primary(dir.path());
    let record = make_record("r1", RunResult::Success, UsedCore::Primary);

    store().write(&location, &record).unwrap();

    assert_eq!(store().read_previous(&location), Some(record));
    assert!(location.json_path().ends_with("RUN_STATUS.json"));
    let text = fs::read_to_string(location.text_path()).unwrap();
    assert!(text.contains("result: SUCCESS"));
    assert!(text.contains("top20_sha256: TTT"));
}

#[test]
fn test_write_overwrites_current_record() {
    let dir = tempdir().unwrap();
    let location = StatusLocation::primary(dir.path());

    store()
        .write(&location, &make_record("r1", RunResult::Success, UsedCore::Primary))
        .unwrap();
    store()
        .write(&location, &make_record("r2", RunResult::Failed, UsedCore::None))
        .unwrap();

    let current = store().read_previous(&location).unwrap();
    assert_eq!(current.run_id, "r2");
    assert_eq!(current.result, RunResult::Failed);
}

#[test]
fn test_corrupt_document_reads_as_absent() {
    let dir = tempdir().unwrap();
    let location = StatusLocation::primary(dir.path());
    fs::write(location.json_path(), "{ \"timestamp\": truncated").unwrap();

    assert!(store().read_previous(&location).is_none());
}

#[test]
fn test_primary_and_fallback_locations_are_independent() {
    let dir = tempdir().unwrap();
    let primary = StatusLocation::primary(dir.path());
    let fallback = StatusLocation::fallback(dir.path(), DEFAULT_FALLBACK_TAG);
    assert_ne!(primary.json_path(), fallback.json_path());
    assert!(fallback.json_path().ends_with("RUN_STATUS__FALLBACK.json"));

    store()
        .write(&primary, &make_record("good", RunResult::Success, UsedCore::Primary))
        .unwrap();
    store()
        .write(&fallback, &make_record("fb", RunResult::Failed, UsedCore::None))
        .unwrap();

    assert_eq!(store().read_previous(&primary).unwrap().run_id, "good");
    assert_eq!(store().read_previous(&fallback).unwrap().run_id, "fb");
}

#[test]
fn test_write_failure_surfaces_after_retries() {
    let dir = tempdir().unwrap();
    let location = StatusLocation::primary(dir.path());
    fs::create_dir(location.json_path()).unwrap();
    fs::write(location.json_path().join("occupied"), "x").unwrap();

    let result = store().write(
        &location,
        &make_record("r1", RunResult::Success, UsedCore::Primary),
    );
    assert!(result.is_err());
}

#[test]
fn test_failed_write_keeps_last_good_record() {
    let dir = tempdir().unwrap();
    let location = StatusLocation::primary(dir.path());

    store()
        .write(&location, &make_record("good", RunResult::Success, UsedCore::Primary))
        .unwrap();
    store()
        .write(&location, &make_record("bad", RunResult::Failed, UsedCore::None))
        .unwrap();

    assert_eq!(store().read_previous(&location).unwrap().run_id, "bad");
    let baseline = store().read_last_good(&location).unwrap();
    assert_eq!(baseline.run_id, "good");
    assert!(location.last_good_path().ends_with("RUN_STATUS.last_good.json"));
}

#[test]
fn test_last_good_absent_without_any_success() {
    let dir = tempdir().unwrap();
    let location = StatusLocation::primary(dir.path());
    store()
        .write(&location, &make_record("bad", RunResult::Failed, UsedCore::None))
        .unwrap();

    assert!(store().read_last_good(&location).is_none());
    assert!(!location.last_good_path().exists());
}

#[test]
fn test_last_good_falls_back_to_successful_current_record() {
    let dir = tempdir().unwrap();
    let location = StatusLocation::primary(dir.path());
    store()
        .write(&location, &make_record("old", RunResult::Success, UsedCore::Primary))
        .unwrap();
    fs::remove_file(location.last_good_path()).unwrap();

    assert_eq!(store().read_last_good(&location).unwrap().run_id, "old");
}
