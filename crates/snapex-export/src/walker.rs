//! Partition walker
//!
//! Pages through one partition of one entity type with `search_after`,
//! filters every hit through the run's dedup store and streams accepted
//! documents into a [`PartWriter`].
//!
//! ```text
//! Start -> Paging -> Draining -> Done
//!            |
//!            +-----> Error
//! ```
//!
//! A short page ends the walk: nothing sorts after its last key, so the
//! follow-up query would come back empty. The writer is closed on every
//! exit path, including errors, so part files written before a failure are
//! complete gzip streams.

use serde::Serialize;
use snapex_common::{Result, SnapexError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::dedup::DedupStore;
use crate::record::Record;
use crate::store::{Hit, PageQuery, SearchStore, SortField};
use crate::writer::{remove_part_files, PartFile, PartWriter};

/// Default number of accepted records between progress lines
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WalkState {
    Start,
    Paging,
    Draining,
    Done,
    Error,
}

/// Query and output settings shared by every walker of a run
#[derive(Debug, Clone)]
pub struct WalkSettings {
    pub partition_field: String,
    pub sort: Vec<SortField>,
    pub page_size: usize,
    pub source_excludes: Vec<String>,
    pub max_file_size: u64,
    pub progress_interval: u64,
}

/// One partition to walk
#[derive(Debug, Clone)]
pub struct PartitionTask {
    pub entity_type: String,
    pub index: String,
    pub partition_key: String,
    /// Dedup scope shared by every partition of the entity type
    pub scope: String,
    /// Prefix stripped from document ids before parsing
    pub id_prefix: String,
    pub output_dir: PathBuf,
}

/// Result of a walk that reached `Done`
#[derive(Debug, Clone, Serialize)]
pub struct PartitionOutcome {
    pub entity_type: String,
    pub partition_key: String,
    pub pages: u64,
    pub records_seen: u64,
    pub records_written: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub part_files: Vec<PartFile>,
    pub state: WalkState,
}

#[derive(Debug, Default)]
struct WalkStats {
    pages: u64,
    records_seen: u64,
    records_written: u64,
    duplicates: u64,
    malformed: u64,
}

/// Directory holding the part files of one partition
pub fn partition_dir(entity_dir: &Path, partition_field: &str, partition_key: &str) -> PathBuf {
    entity_dir.join(format!("{}={}", partition_field, partition_key))
}

/// Remove the part files of every `<partition_field>=*` directory under
/// `entity_dir`, then the directories themselves once empty. Returns the
/// number of part files removed.
///
/// Run before an entity's partitions are walked so its manifest describes
/// only what the current run wrote.
pub fn clear_partition_dirs(entity_dir: &Path, partition_field: &str) -> Result<usize> {
    if !entity_dir.is_dir() {
        return Ok(0);
    }

    let dir_prefix = format!("{}=", partition_field);
    let mut removed = 0;
    for entry in std::fs::read_dir(entity_dir)? {
        let entry = entry?;
        let is_partition = entry.file_type()?.is_dir()
            && entry.file_name().to_str().is_some_and(|name| name.starts_with(&dir_prefix));
        if !is_partition {
            continue;
        }

        let dir = entry.path();
        removed += remove_part_files(&dir)?;
        if std::fs::read_dir(&dir)?.next().is_none() {
            std::fs::remove_dir(&dir)?;
        }
    }

    if removed > 0 {
        debug!(dir = %entity_dir.display(), removed, "Removed part files from an earlier run");
    }
    Ok(removed)
}

pub struct PartitionWalker {
    store: Arc<dyn SearchStore>,
    dedup: Arc<dyn DedupStore>,
    settings: Arc<WalkSettings>,
    task: PartitionTask,
    state: WalkState,
}

impl PartitionWalker {
    pub fn new(
        store: Arc<dyn SearchStore>,
        dedup: Arc<dyn DedupStore>,
        settings: Arc<WalkSettings>,
        task: PartitionTask,
    ) -> Self {
        Self {
            store,
            dedup,
            settings,
            task,
            state: WalkState::Start,
        }
    }

    pub fn state(&self) -> WalkState {
        self.state
    }

    /// Walk the partition to completion.
    pub async fn run(mut self) -> Result<PartitionOutcome> {
        let span = info_span!(
            "partition",
            entity = %self.task.entity_type,
            key = %self.task.partition_key
        );
        async move {
            let mut writer = PartWriter::new(&self.task.output_dir, self.settings.max_file_size);
            let mut stats = WalkStats::default();

            if let Err(e) = self.walk(&mut writer, &mut stats).await {
                self.transition(WalkState::Error);
                if let Err(close_err) = writer.close() {
                    warn!(error = %close_err, "Failed to close part writer after walk error");
                }
                return Err(e);
            }

            self.transition(WalkState::Draining);
            let part_files = match writer.close() {
                Ok(parts) => parts,
                Err(e) => {
                    self.transition(WalkState::Error);
                    return Err(e);
                },
            };
            self.transition(WalkState::Done);

            info!(
                pages = stats.pages,
                written = stats.records_written,
                duplicates = stats.duplicates,
                malformed = stats.malformed,
                parts = part_files.len(),
                "Partition complete"
            );

            Ok(PartitionOutcome {
                entity_type: self.task.entity_type.clone(),
                partition_key: self.task.partition_key.clone(),
                pages: stats.pages,
                records_seen: stats.records_seen,
                records_written: stats.records_written,
                duplicates: stats.duplicates,
                malformed: stats.malformed,
                part_files,
                state: self.state,
            })
        }
        .instrument(span)
        .await
    }

    fn transition(&mut self, next: WalkState) {
        debug!(from = ?self.state, to = ?next, "Walker state change");
        self.state = next;
    }

    async fn walk(&mut self, writer: &mut PartWriter, stats: &mut WalkStats) -> Result<()> {
        self.transition(WalkState::Paging);

        let mut query = PageQuery::first(
            self.settings.partition_field.clone(),
            self.task.partition_key.clone(),
            self.settings.sort.clone(),
            self.settings.page_size,
            self.settings.source_excludes.clone(),
        );

        loop {
            let page = self.store.search_page(&self.task.index, &query).await?;
            stats.pages += 1;

            let Some(cursor) = page.last_cursor() else {
                return Ok(());
            };
            let full_page = page.len() >= self.settings.page_size;
            if full_page && cursor.is_empty() {
                return Err(SnapexError::Store(format!(
                    "page {} of partition {} returned a hit without sort values",
                    stats.pages, self.task.partition_key
                )));
            }

            for hit in page.hits {
                self.accept(hit, writer, stats).await?;
            }

            if !full_page {
                return Ok(());
            }
            query = query.after(cursor);
        }
    }

    async fn accept(&self, hit: Hit, writer: &mut PartWriter, stats: &mut WalkStats) -> Result<()> {
        stats.records_seen += 1;

        let record = match Record::from_hit(hit, &self.task.partition_key, &self.task.id_prefix) {
            Ok(record) => record,
            Err(e) => {
                stats.malformed += 1;
                warn!(error = %e, "Skipping record with unparseable id");
                return Ok(());
            },
        };

        if !self.dedup.try_add(&self.task.scope, record.id).await? {
            stats.duplicates += 1;
            debug!(id = record.id, "Record already in dataset");
            return Ok(());
        }

        writer.write(&record.payload)?;
        stats.records_written += 1;

        let interval = self.settings.progress_interval;
        if interval > 0 && stats.records_written % interval == 0 {
            info!(written = stats.records_written, pages = stats.pages, "Partition progress");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::MemoryDedupStore;
    use crate::store::{DateBucket, MemoryStore, Page};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PREFIX: &str = "https://openalex.org/W";

    fn settings(page_size: usize) -> Arc<WalkSettings> {
        Arc::new(WalkSettings {
            partition_field: "updated_date".to_string(),
            sort: vec![SortField::desc("cited_by_count"), SortField::asc("id")],
            page_size,
            source_excludes: vec!["abstract".to_string()],
            max_file_size: 1024 * 1024,
            progress_interval: 0,
        })
    }

    fn task(dir: &Path, key: &str) -> PartitionTask {
        PartitionTask {
            entity_type: "works".to_string(),
            index: "works-v1".to_string(),
            partition_key: key.to_string(),
            scope: "run:works".to_string(),
            id_prefix: PREFIX.to_string(),
            output_dir: partition_dir(dir, "updated_date", key),
        }
    }

    fn work(n: u64, day: &str) -> Value {
        json!({
            "id": format!("{}{}", PREFIX, n),
            "cited_by_count": n % 17,
            "updated_date": day,
            "abstract": "dropped",
        })
    }

    fn store_with(count: u64) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.extend("works-v1", (1..=count).map(|n| work(n, "2024-01-02")));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_short_last_page_ends_walk() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(2500);
        let walker = PartitionWalker::new(
            store.clone(),
            Arc::new(MemoryDedupStore::new()),
            settings(1000),
            task(tmp.path(), "2024-01-02"),
        );

        let outcome = walker.run().await.unwrap();
        assert_eq!(store.page_queries(), 3);
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.records_written, 2500);
        assert_eq!(outcome.state, WalkState::Done);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_empty_page() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(2000);
        let walker = PartitionWalker::new(
            store.clone(),
            Arc::new(MemoryDedupStore::new()),
            settings(1000),
            task(tmp.path(), "2024-01-02"),
        );

        let outcome = walker.run().await.unwrap();
        assert_eq!(store.page_queries(), 3);
        assert_eq!(outcome.records_written, 2000);
    }

    #[tokio::test]
    async fn test_empty_partition_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(10);
        let walker = PartitionWalker::new(
            store,
            Arc::new(MemoryDedupStore::new()),
            settings(1000),
            task(tmp.path(), "1999-01-01"),
        );

        let outcome = walker.run().await.unwrap();
        assert_eq!(outcome.pages, 1);
        assert!(outcome.part_files.is_empty());
        assert!(!partition_dir(tmp.path(), "updated_date", "1999-01-01").exists());
    }

    #[tokio::test]
    async fn test_skips_duplicates_and_malformed_ids() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        store.extend(
            "works-v1",
            vec![
                work(1, "2024-01-02"),
                work(2, "2024-01-02"),
                json!({"id": "https://openalex.org/Wabc", "cited_by_count": 0, "updated_date": "2024-01-02"}),
            ],
        );
        let dedup = Arc::new(MemoryDedupStore::new());
        dedup.try_add("run:works", 2).await.unwrap();

        let outcome = PartitionWalker::new(Arc::new(store), dedup, settings(1000), task(tmp.path(), "2024-01-02"))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.records_seen, 3);
        assert_eq!(outcome.records_written, 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.malformed, 1);
        assert_eq!(outcome.part_files.len(), 1);
    }

    /// Serves scripted pages, then fails
    struct ScriptedStore {
        pages: Mutex<Vec<Page>>,
    }

    #[async_trait]
    impl SearchStore for ScriptedStore {
        async fn search_page(&self, _index: &str, _query: &PageQuery) -> Result<Page> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Err(SnapexError::store("connection reset"));
            }
            Ok(pages.remove(0))
        }

        async fn date_histogram(&self, _index: &str, _field: &str) -> Result<Vec<DateBucket>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_store_error_closes_writer() {
        let tmp = TempDir::new().unwrap();
        let hits = (1..=2)
            .map(|n| Hit {
                id: Some(format!("{}{}", PREFIX, n)),
                source: work(n, "2024-01-02"),
                sort: vec![json!(n), json!(format!("{}{}", PREFIX, n))],
            })
            .collect();
        let store = ScriptedStore {
            pages: Mutex::new(vec![Page { hits }]),
        };

        let result = PartitionWalker::new(
            Arc::new(store),
            Arc::new(MemoryDedupStore::new()),
            settings(2),
            task(tmp.path(), "2024-01-02"),
        )
        .run()
        .await;

        assert!(matches!(result, Err(SnapexError::Store(_))));
        let part = partition_dir(tmp.path(), "updated_date", "2024-01-02").join("part_000.gz");
        let reader = flate2::read::MultiGzDecoder::new(std::fs::File::open(part).unwrap());
        let text = std::io::read_to_string(reader).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_full_page_without_sort_values_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = ScriptedStore {
            pages: Mutex::new(vec![Page {
                hits: vec![Hit {
                    id: Some(format!("{}1", PREFIX)),
                    source: work(1, "2024-01-02"),
                    sort: vec![],
                }],
            }]),
        };

        let result = PartitionWalker::new(
            Arc::new(store),
            Arc::new(MemoryDedupStore::new()),
            settings(1),
            task(tmp.path(), "2024-01-02"),
        )
        .run()
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_clear_partition_dirs() {
        let tmp = TempDir::new().unwrap();
        let old = partition_dir(tmp.path(), "updated_date", "2024-01-01");
        let kept = partition_dir(tmp.path(), "updated_date", "2024-01-02");
        std::fs::create_dir_all(&old).unwrap();
        std::fs::create_dir_all(&kept).unwrap();
        std::fs::write(old.join("part_000.gz"), b"x").unwrap();
        std::fs::write(old.join("part_001.gz"), b"x").unwrap();
        std::fs::write(kept.join("part_000.gz"), b"x").unwrap();
        std::fs::write(kept.join("notes.txt"), b"keep").unwrap();
        std::fs::write(tmp.path().join("manifest"), b"{}").unwrap();
        std::fs::create_dir_all(tmp.path().join("other=2024-01-01")).unwrap();

        assert_eq!(clear_partition_dirs(tmp.path(), "updated_date").unwrap(), 3);
        assert!(!old.exists());
        assert!(!kept.join("part_000.gz").exists());
        assert!(kept.join("notes.txt").exists());
        assert!(tmp.path().join("manifest").exists());
        assert!(tmp.path().join("other=2024-01-01").exists());

        assert_eq!(clear_partition_dirs(&tmp.path().join("missing"), "updated_date").unwrap(), 0);
    }
}
