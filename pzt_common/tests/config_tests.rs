//! Integration tests for the JSON constants store.
//!
//! Exercises file persistence and concurrent access the way the
//! application uses the store: start positions written by one thread,
//! read back by another, dumped at exit and reloaded on the next run.

use pzt_common::config::{ConfigError, ConfigStore};
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use tempfile::NamedTempFile;

#[test]
fn test_dump_and_reload_round_trip() {
    let store = ConfigStore::new();
    store.set("stage", "start_position", json!([10, -20, 30]));
    store.set("shutter", "open_ms", 250);

    let file = NamedTempFile::new().expect("temp file");
    store.dump_file(file.path()).expect("dump");

    let text = std::fs::read_to_string(file.path()).expect("read back");
    assert!(text.contains("\n  \"shutter\""), "pretty JSON with 2-space indent");

    let reloaded = ConfigStore::new();
    reloaded.load_file(file.path()).expect("load");
    assert_eq!(
        reloaded
            .get_as::<Vec<i64>>("stage", "start_position")
            .expect("typed read"),
        Some(vec![10, -20, 30])
    );
    assert_eq!(reloaded.all(), store.all());
}

#[test]
fn test_load_replaces_named_sections_only() {
    let store = ConfigStore::new();
    store.set("stage", "old", true);
    store.set("keep", "x", 1);

    let mut file = NamedTempFile::new().expect("temp file");
    write!(file, r#"{{"stage": {{"new": 2}}}}"#).expect("write");
    file.flush().expect("flush");

    store.load_file(file.path()).expect("load");
    assert_eq!(store.get("stage", "old"), None);
    assert_eq!(store.get("stage", "new"), Some(json!(2)));
    assert_eq!(store.get("keep", "x"), Some(json!(1)));
}

#[test]
fn test_load_rejects_non_object_sections() {
    let store = ConfigStore::new();
    let result = store.load(r#"{"stage": 5}"#.as_bytes());
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
    assert!(store.all().is_empty());
}

#[test]
fn test_load_missing_file() {
    let store = ConfigStore::new();
    let result = store.load_file(std::path::Path::new("/nonexistent/constants.json"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}

#[derive(Debug, serde::Deserialize, PartialEq)]
struct StageConstants {
    start_position: Vec<i64>,
    target_range: i64,
}

#[test]
fn test_section_as_struct() {
    let store = ConfigStore::new();
    store.set("stage", "start_position", json!([1, 2]));
    store.set("stage", "target_range", 50);

    let constants: StageConstants = store
        .section_as("stage")
        .expect("typed section")
        .expect("section present");
    assert_eq!(
        constants,
        StageConstants {
            start_position: vec![1, 2],
            target_range: 50
        }
    );
}

#[test]
fn test_concurrent_writers() {
    let store = Arc::new(ConfigStore::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for j in 0..50 {
                    store.set(&format!("s{i}"), &format!("k{j}"), j);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let all = store.all();
    assert_eq!(all.len(), 8);
    assert!(all.values().all(|section| section.len() == 50));
    assert_eq!(store.get("s3", "k49"), Some(Value::from(49)));
}
