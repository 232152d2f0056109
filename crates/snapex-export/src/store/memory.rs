//! In-process [`SearchStore`]
//!
//! Holds documents per index and answers page queries with the same
//! semantics the pipeline relies on from Elasticsearch: term match on the
//! day of the partition field, multi-field sort, `search_after` resumption
//! and source excludes. Failures can be injected per partition or for
//! discovery, and page queries of a partition can be delayed, so
//! coordinator error paths and walker races can be exercised.

use async_trait::async_trait;
use serde_json::Value;
use snapex_common::{Result, SnapexError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{compare_sort_keys, DateBucket, Hit, Page, PageQuery, SearchStore};

#[derive(Default)]
pub struct MemoryStore {
    indices: Mutex<HashMap<String, Vec<Value>>>,
    failing_partitions: Mutex<HashSet<String>>,
    failing_histograms: Mutex<HashSet<String>>,
    partition_delays: Mutex<HashMap<String, Duration>>,
    page_queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, index: &str, document: Value) {
        self.extend(index, std::iter::once(document));
    }

    pub fn extend(&self, index: &str, documents: impl IntoIterator<Item = Value>) {
        let mut indices = self.indices.lock().unwrap_or_else(PoisonError::into_inner);
        indices.entry(index.to_string()).or_default().extend(documents);
    }

    /// Every page query for `partition_key` fails from now on
    pub fn fail_partition(&self, partition_key: &str) {
        self.failing_partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(partition_key.to_string());
    }

    /// Every histogram query against `index` fails from now on
    pub fn fail_discovery(&self, index: &str) {
        self.failing_histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index.to_string());
    }

    /// Every page query for `partition_key` waits `delay` first. A zero
    /// delay removes it.
    pub fn delay_partition(&self, partition_key: &str, delay: Duration) {
        let mut delays = self.partition_delays.lock().unwrap_or_else(PoisonError::into_inner);
        if delay.is_zero() {
            delays.remove(partition_key);
        } else {
            delays.insert(partition_key.to_string(), delay);
        }
    }

    /// Number of page queries served, including failed ones
    pub fn page_queries(&self) -> usize {
        self.page_queries.load(Ordering::SeqCst)
    }
}

/// Day part of a date or datetime string
fn day_of(value: &Value) -> Option<&str> {
    value.as_str().and_then(|s| s.split('T').next())
}

fn sort_values(document: &Value, query: &PageQuery) -> Vec<Value> {
    query
        .sort
        .iter()
        .map(|s| document.get(&s.field).cloned().unwrap_or(Value::Null))
        .collect()
}

#[async_trait]
impl SearchStore for MemoryStore {
    async fn search_page(&self, index: &str, query: &PageQuery) -> Result<Page> {
        self.page_queries.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .partition_delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&query.partition_key)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing_partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&query.partition_key);
        if failing {
            return Err(SnapexError::Store(format!(
                "injected failure for partition {}",
                query.partition_key
            )));
        }

        let indices = self.indices.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(documents) = indices.get(index) else {
            return Err(SnapexError::Store(format!("no such index: {}", index)));
        };

        let mut matching: Vec<(Vec<Value>, &Value)> = documents
            .iter()
            .filter(|doc| {
                doc.get(&query.partition_field).and_then(day_of) == Some(query.partition_key.as_str())
            })
            .map(|doc| (sort_values(doc, query), doc))
            .collect();
        matching.sort_by(|a, b| compare_sort_keys(&a.0, &b.0, &query.sort));

        let hits = matching
            .into_iter()
            .filter(|(key, _)| match &query.search_after {
                Some(cursor) => {
                    compare_sort_keys(key, cursor.values(), &query.sort) == std::cmp::Ordering::Greater
                },
                None => true,
            })
            .take(query.size)
            .map(|(sort, doc)| {
                let mut source = doc.clone();
                if let Some(object) = source.as_object_mut() {
                    for excluded in &query.source_excludes {
                        object.remove(excluded);
                    }
                }
                Hit {
                    id: doc.get("id").and_then(Value::as_str).map(str::to_string),
                    source,
                    sort,
                }
            })
            .collect();

        Ok(Page { hits })
    }

    async fn date_histogram(&self, index: &str, field: &str) -> Result<Vec<DateBucket>> {
        let failing = self
            .failing_histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(index);
        if failing {
            return Err(SnapexError::Store(format!("injected discovery failure for {}", index)));
        }

        let indices = self.indices.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        if let Some(documents) = indices.get(index) {
            for day in documents.iter().filter_map(|doc| doc.get(field).and_then(day_of)) {
                *counts.entry(day.to_string()).or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(day, doc_count)| DateBucket {
                key_as_string: format!("{}T00:00:00.000Z", day),
                doc_count,
            })
            .collect())
    }
}
