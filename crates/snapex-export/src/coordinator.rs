//! Export coordinator
//!
//! Exports entity types one after another. For each entity type:
//!
//! 1. Clear the entity's dedup scope
//! 2. Discover partitions (fatal for the entity type on failure)
//! 3. Remove part files left in the entity directory by an earlier run
//! 4. Walk every partition once, in parallel through the [`WorkerPool`]
//! 5. Build and write the manifest from whatever part files exist
//! 6. Optionally publish the entity directory
//! 7. Release the dedup scope
//!
//! A failed partition is recorded and never stops its siblings; a failed
//! entity type is recorded and the run moves on to the next one.

use snapex_common::{Result, SnapexError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{EntityTarget, ExportConfig};
use crate::dedup::{run_scope, DedupStore};
use crate::discovery::discover_partitions;
use crate::manifest::refresh_manifest;
use crate::pool::{JobResult, WorkerPool};
use crate::publish::Publisher;
use crate::record::id_prefix;
use crate::report::{EntityReport, FailedPartition, RunReport};
use crate::store::SearchStore;
use crate::walker::{clear_partition_dirs, partition_dir, PartitionTask, PartitionWalker, WalkSettings};

pub struct Exporter {
    config: Arc<ExportConfig>,
    store: Arc<dyn SearchStore>,
    dedup: Arc<dyn DedupStore>,
    settings: Arc<WalkSettings>,
    cancel: CancellationToken,
    publisher: Option<Publisher>,
    run_id: String,
}

impl Exporter {
    pub fn new(config: ExportConfig, store: Arc<dyn SearchStore>, dedup: Arc<dyn DedupStore>) -> Self {
        let settings = Arc::new(config.walk_settings());
        Self {
            config: Arc::new(config),
            store,
            dedup,
            settings,
            cancel: CancellationToken::new(),
            publisher: None,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Cancelling `token` stops dispatch of partitions and entity types not yet started
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Export every entity type in order. Always returns a report.
    pub async fn run(&self, entities: &[EntityTarget]) -> RunReport {
        let mut report = RunReport::new(self.run_id.clone());
        info!(
            run_id = %self.run_id,
            entities = entities.len(),
            output = %self.config.output_dir.display(),
            "Starting export run"
        );

        for entity in entities {
            if self.cancel.is_cancelled() {
                let mut skipped = EntityReport::new(&entity.name);
                skipped.error = Some(SnapexError::Cancelled.to_string());
                report.entities.push(skipped);
                continue;
            }

            let started = Instant::now();
            match self.export_entity(entity).await {
                Ok(entity_report) => report.entities.push(entity_report),
                Err(e) => {
                    error!(entity = %entity.name, error = %e, "Entity export failed");
                    let mut failed = EntityReport::new(&entity.name);
                    failed.error = Some(e.to_string());
                    failed.duration_seconds = started.elapsed().as_secs_f64();
                    report.entities.push(failed);
                },
            }
        }

        report.finish();
        report
    }

    /// Export one entity type.
    ///
    /// Errors only when the entity type could not be exported at all
    /// (dedup reset, partition discovery or clearing earlier output).
    /// Partition, manifest and publish failures are recorded in the
    /// returned report. The dedup scope is released on every path.
    pub async fn export_entity(&self, entity: &EntityTarget) -> Result<EntityReport> {
        let scope = run_scope(&self.run_id, &entity.name);
        self.dedup.reset(&scope).await?;

        let result = self.export_scoped(entity, &scope).await;

        if let Err(e) = self.dedup.reset(&scope).await {
            warn!(entity = %entity.name, scope = %scope, error = %e, "Failed to release dedup scope");
        }
        result
    }

    async fn export_scoped(&self, entity: &EntityTarget, scope: &str) -> Result<EntityReport> {
        let started = Instant::now();
        let mut report = EntityReport::new(&entity.name);
        info!(entity = %entity.name, index = %entity.index, "Exporting entity");

        let discovered = discover_partitions(
            self.store.as_ref(),
            &entity.name,
            &entity.index,
            &self.settings.partition_field,
        )
        .await?;
        let keys = unique_keys(discovered);
        report.partitions_total = keys.len();

        let entity_dir = self.config.entity_dir(&entity.name);
        let clear_dir = entity_dir.clone();
        let partition_field = self.settings.partition_field.clone();
        tokio::task::spawn_blocking(move || clear_partition_dirs(&clear_dir, &partition_field))
            .await
            .map_err(|e| SnapexError::Task(e.to_string()))??;

        let prefix = id_prefix(&self.config.id_namespace, &entity.name);
        let pool = WorkerPool::with_cancellation(self.config.workers, self.cancel.clone());

        let results = pool
            .run(keys, |key: String| {
                let task = PartitionTask {
                    entity_type: entity.name.clone(),
                    index: entity.index.clone(),
                    output_dir: partition_dir(&entity_dir, &self.settings.partition_field, &key),
                    partition_key: key,
                    scope: scope.to_string(),
                    id_prefix: prefix.clone(),
                };
                PartitionWalker::new(self.store.clone(), self.dedup.clone(), self.settings.clone(), task).run()
            })
            .await;

        for (key, result) in results {
            match result {
                JobResult::Completed(outcome) => {
                    report.partitions_succeeded += 1;
                    report.records_exported += outcome.records_written;
                    report.duplicates_skipped += outcome.duplicates;
                    report.malformed_skipped += outcome.malformed;
                    report.part_files += outcome.part_files.len();
                },
                JobResult::Failed(e) => report.partitions_failed.push(FailedPartition {
                    partition_key: key,
                    error: e.to_string(),
                }),
                JobResult::Panicked(message) => report.partitions_failed.push(FailedPartition {
                    partition_key: key,
                    error: format!("walker panicked: {}", message),
                }),
                JobResult::Cancelled => report.partitions_cancelled += 1,
            }
        }

        let manifest_dir = entity_dir.clone();
        let entity_type = entity.name.clone();
        let remote_base = self.config.remote_base.clone();
        let manifest = tokio::task::spawn_blocking(move || refresh_manifest(&manifest_dir, &entity_type, &remote_base))
            .await
            .map_err(|e| SnapexError::Task(e.to_string()))
            .and_then(|built| built);

        match manifest {
            Ok(manifest) => {
                report.manifest = Some(manifest.meta);
                if manifest.meta.record_count != report.records_exported && report.partitions_failed.is_empty() {
                    warn!(
                        entity = %entity.name,
                        manifest = manifest.meta.record_count,
                        exported = report.records_exported,
                        "Manifest record count differs from records exported"
                    );
                }
                if let Some(publisher) = &self.publisher {
                    if let Err(e) = publisher.upload_entity(&entity.name, &entity_dir).await {
                        error!(entity = %entity.name, error = %e, "Publishing failed");
                        report.error = Some(e.to_string());
                    }
                }
            },
            Err(e) => {
                error!(entity = %entity.name, error = %e, "Manifest failed");
                report.error = Some(e.to_string());
            },
        }

        report.duration_seconds = started.elapsed().as_secs_f64();
        info!(
            entity = %entity.name,
            partitions = report.partitions_total,
            failed = report.partitions_failed.len(),
            records = report.records_exported,
            "Entity export complete in {:.2}s",
            report.duration_seconds
        );
        Ok(report)
    }
}

/// Drop repeated keys, keeping first-seen order
fn unique_keys(keys: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|key| seen.insert(key.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::MemoryDedupStore;
    use crate::store::MemoryStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_unique_keys_keeps_order() {
        let keys = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(unique_keys(keys), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_export_entity_counts() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        store.extend(
            "funders-v3",
            (1..=5).map(|n| {
                let day = if n % 2 == 0 { "2024-01-01" } else { "2024-01-02" };
                json!({
                    "id": format!("https://openalex.org/F{}", n),
                    "cited_by_count": n,
                    "updated_date": day,
                })
            }),
        );

        let config = ExportConfig::default().with_output_dir(tmp.path()).with_workers(2);
        let exporter = Exporter::new(config, Arc::new(store), Arc::new(MemoryDedupStore::new()));
        let report = exporter
            .export_entity(&EntityTarget::new("funders", "funders-v3"))
            .await
            .unwrap();

        assert_eq!(report.partitions_total, 2);
        assert_eq!(report.partitions_succeeded, 2);
        assert_eq!(report.records_exported, 5);
        assert_eq!(report.manifest.unwrap().record_count, 5);
        assert!(report.is_success());
        assert!(tmp.path().join("funders/manifest").exists());
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_entities() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exporter = Exporter::new(
            ExportConfig::default().with_output_dir(tmp.path()),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryDedupStore::new()),
        )
        .with_cancellation(cancel);

        let report = exporter.run(&[EntityTarget::new("works", "works-v1")]).await;
        assert_eq!(report.entities.len(), 1);
        assert!(!report.is_success());
        assert!(report.finished_at.is_some());
    }
}
