//! Run summary
//!
//! The coordinator fills one [`EntityReport`] per entity type. The CLI logs
//! the summary, writes it next to the output as `run_report.json` and exits
//! non-zero when anything failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapex_common::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::manifest::ManifestMeta;

/// File name of the report inside the output root
pub const REPORT_FILE_NAME: &str = "run_report.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPartition {
    pub partition_key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity_type: String,
    pub partitions_total: usize,
    pub partitions_succeeded: usize,
    pub partitions_failed: Vec<FailedPartition>,
    pub partitions_cancelled: usize,
    pub records_exported: u64,
    pub duplicates_skipped: u64,
    pub malformed_skipped: u64,
    pub part_files: usize,
    pub manifest: Option<ManifestMeta>,
    /// Entity-level failure: discovery, manifest or publish
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl EntityReport {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.partitions_failed.is_empty() && self.partitions_cancelled == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entities: Vec<EntityReport>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            entities: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.entities.iter().all(EntityReport::is_success)
    }

    pub fn records_exported(&self) -> u64 {
        self.entities.iter().map(|e| e.records_exported).sum()
    }

    pub fn log_summary(&self) {
        for entity in &self.entities {
            info!(
                entity = %entity.entity_type,
                partitions = entity.partitions_total,
                succeeded = entity.partitions_succeeded,
                failed = entity.partitions_failed.len(),
                cancelled = entity.partitions_cancelled,
                records = entity.records_exported,
                duplicates = entity.duplicates_skipped,
                malformed = entity.malformed_skipped,
                files = entity.part_files,
                "Entity export finished in {:.2}s",
                entity.duration_seconds
            );
            for failed in &entity.partitions_failed {
                warn!(
                    entity = %entity.entity_type,
                    partition = %failed.partition_key,
                    error = %failed.error,
                    "Partition failed"
                );
            }
            if let Some(error) = &entity.error {
                warn!(entity = %entity.entity_type, error = %error, "Entity export failed");
            }
        }
        info!(
            run_id = %self.run_id,
            records = self.records_exported(),
            success = self.is_success(),
            "Run finished"
        );
    }

    /// Write the report as pretty JSON to `<dir>/run_report.json`
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE_NAME);
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}
