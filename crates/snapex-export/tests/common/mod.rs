//! Shared fixtures for snapex-export integration tests
//!
//! Tests run the real coordinator against the in-process [`MemoryStore`] and
//! read back what landed on disk.

#![allow(dead_code)]

use flate2::read::MultiGzDecoder;
use serde_json::{json, Value};
use snapex_export::config::{EntityTarget, ExportConfig};
use snapex_export::store::MemoryStore;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Once;
use walkdir::WalkDir;

pub const NAMESPACE: &str = "https://openalex.org/";

static TRACING: Once = Once::new();

/// Route logs through the test harness; `RUST_LOG=debug` to see them
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A document of `entity_type` with integer id `n`, updated on `day`
pub fn doc(entity_type: &str, n: u64, day: &str) -> Value {
    let letter = entity_type[..1].to_uppercase();
    json!({
        "id": format!("{}{}{}", NAMESPACE, letter, n),
        "display_name": format!("{} {}", entity_type, n),
        "cited_by_count": n % 13,
        "updated_date": format!("{}T12:00:00.000000", day),
        "abstract": "excluded from export",
    })
}

/// `count` works per day, ids numbered consecutively across days
pub fn works_store(index: &str, days: &[&str], per_day: u64) -> MemoryStore {
    let store = MemoryStore::new();
    let mut n = 0;
    for day in days {
        for _ in 0..per_day {
            n += 1;
            store.insert(index, doc("works", n, day));
        }
    }
    store
}

pub fn config(output: &Path) -> ExportConfig {
    ExportConfig::default()
        .with_output_dir(output)
        .with_workers(4)
        .with_page_size(7)
        .with_remote_base("s3://test-bucket/data")
        .with_entities(vec![EntityTarget::new("works", "works-v1")])
}

/// Every part file under `dir`, sorted
pub fn part_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "gz"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

pub fn read_lines(path: &Path) -> Vec<Value> {
    let reader = BufReader::new(MultiGzDecoder::new(File::open(path).unwrap()));
    reader
        .lines()
        .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
        .collect()
}

/// How many times each id was written under `dir`
pub fn id_counts(dir: &Path) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for path in part_files(dir) {
        for record in read_lines(&path) {
            let id = record["id"].as_str().unwrap().to_string();
            *counts.entry(id).or_default() += 1;
        }
    }
    counts
}
