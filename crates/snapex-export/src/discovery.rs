//! Partition discovery
//!
//! One date-histogram aggregation over the partition field yields every day
//! that holds documents. Keys come back as `2024-01-02T00:00:00.000Z` and are
//! cut down to the day. A non-empty bucket whose key is not a date fails
//! discovery, since dropping it would leave that day unexported.

use chrono::NaiveDate;
use snapex_common::{Result, SnapexError};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

use crate::store::{DateBucket, SearchStore};

/// List the partition keys of `index`, newest first.
///
/// A store failure or an unreadable bucket key is fatal for the entity
/// type: no partial list is returned.
#[instrument(skip(store))]
pub async fn discover_partitions(
    store: &dyn SearchStore,
    entity_type: &str,
    index: &str,
    partition_field: &str,
) -> Result<Vec<String>> {
    let buckets = store
        .date_histogram(index, partition_field)
        .await
        .map_err(|e| SnapexError::discovery(entity_type, e))?;

    let keys = partition_keys(&buckets).map_err(|e| SnapexError::discovery(entity_type, e))?;
    info!(partitions = keys.len(), buckets = buckets.len(), "Partitions discovered");
    Ok(keys)
}

/// Day keys of the non-empty buckets, de-duplicated, newest first
pub fn partition_keys(buckets: &[DateBucket]) -> Result<Vec<String>> {
    let mut days = BTreeSet::new();
    for bucket in buckets.iter().filter(|b| b.doc_count > 0) {
        let day = day_key(&bucket.key_as_string).ok_or_else(|| {
            SnapexError::Parse(format!(
                "histogram bucket key '{}' with {} documents is not a date",
                bucket.key_as_string, bucket.doc_count
            ))
        })?;
        days.insert(day);
    }
    debug!(days = days.len(), "Distinct partition days");
    Ok(days.into_iter().rev().collect())
}

/// `2024-01-02T00:00:00.000Z` -> `2024-01-02`
pub fn day_key(key: &str) -> Option<String> {
    let day = key.split('T').next().unwrap_or(key);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn bucket(key: &str, doc_count: u64) -> DateBucket {
        DateBucket {
            key_as_string: key.to_string(),
            doc_count,
        }
    }

    #[test]
    fn test_day_key() {
        assert_eq!(day_key("2024-01-02T00:00:00.000Z").as_deref(), Some("2024-01-02"));
        assert_eq!(day_key("2024-01-02").as_deref(), Some("2024-01-02"));
        assert_eq!(day_key("yesterday"), None);
        assert_eq!(day_key("2024-13-40T00:00:00.000Z"), None);
    }

    #[test]
    fn test_partition_keys_newest_first_without_gaps() {
        let buckets = vec![
            bucket("2024-01-01T00:00:00.000Z", 4),
            bucket("2024-01-02T00:00:00.000Z", 0),
            bucket("2024-01-03T00:00:00.000Z", 1),
            bucket("2024-01-03T00:00:00.000Z", 2),
            bucket("garbage", 0),
        ];
        assert_eq!(partition_keys(&buckets).unwrap(), vec!["2024-01-03", "2024-01-01"]);
    }

    #[test]
    fn test_partition_keys_rejects_unparseable_non_empty_bucket() {
        let buckets = vec![bucket("2024-01-01T00:00:00.000Z", 4), bucket("garbage", 9)];
        match partition_keys(&buckets) {
            Err(SnapexError::Parse(message)) => assert!(message.contains("garbage")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discover_from_store() {
        let store = MemoryStore::new();
        store.extend(
            "authors-v1",
            vec![
                json!({"id": "A1", "updated_date": "2023-12-31T23:59:59"}),
                json!({"id": "A2", "updated_date": "2024-02-01"}),
            ],
        );
        let keys = discover_partitions(&store, "authors", "authors-v1", "updated_date")
            .await
            .unwrap();
        assert_eq!(keys, vec!["2024-02-01", "2023-12-31"]);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_fatal() {
        let store = MemoryStore::new();
        store.fail_discovery("authors-v1");
        let err = discover_partitions(&store, "authors", "authors-v1", "updated_date")
            .await
            .unwrap_err();
        assert!(matches!(err, SnapexError::Discovery { ref entity_type, .. } if entity_type == "authors"));
    }
}
