//! Search store query interface
//!
//! The pipeline only needs two things from the backing store: a sorted,
//! filtered page of documents that can resume after a given sort key, and
//! the distinct values of the partition field. [`SearchStore`] is that seam;
//! [`elastic::ElasticStore`] binds it to Elasticsearch over HTTP and
//! [`memory::MemoryStore`] is an in-process implementation for tests and
//! dry runs.

pub mod elastic;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snapex_common::Result;
use std::cmp::Ordering;

pub use elastic::ElasticStore;
pub use memory::MemoryStore;

/// Sort direction of one sort field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// One component of the sort key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Sort values of the last hit of a page. Only valid for a query with the
/// same filter and sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor(Vec<Value>);

impl Cursor {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One page request against a single partition
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub partition_field: String,
    pub partition_key: String,
    pub sort: Vec<SortField>,
    pub size: usize,
    pub source_excludes: Vec<String>,
    /// Routing hint so consecutive pages hit the same shard copies
    pub preference: Option<String>,
    pub search_after: Option<Cursor>,
}

impl PageQuery {
    /// First page of a partition: no cursor
    pub fn first(
        partition_field: impl Into<String>,
        partition_key: impl Into<String>,
        sort: Vec<SortField>,
        size: usize,
        source_excludes: Vec<String>,
    ) -> Self {
        let partition_key = partition_key.into();
        Self {
            partition_field: partition_field.into(),
            preference: Some(partition_key.clone()),
            partition_key,
            sort,
            size,
            source_excludes,
            search_after: None,
        }
    }

    /// Next page: identical filter and sort, resuming after `cursor`
    pub fn after(&self, cursor: Cursor) -> Self {
        Self {
            search_after: Some(cursor),
            ..self.clone()
        }
    }
}

/// A single document returned by the store
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Document id assigned by the store (`_id`)
    pub id: Option<String>,
    pub source: Value,
    pub sort: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub hits: Vec<Hit>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Cursor for the page that follows this one
    pub fn last_cursor(&self) -> Option<Cursor> {
        self.hits.last().map(|hit| Cursor::new(hit.sort.clone()))
    }
}

/// One bucket of the partition-field histogram
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DateBucket {
    pub key_as_string: String,
    pub doc_count: u64,
}

#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Execute one page query against `index`
    async fn search_page(&self, index: &str, query: &PageQuery) -> Result<Page>;

    /// Day-granularity histogram of `field` across the whole index
    async fn date_histogram(&self, index: &str, field: &str) -> Result<Vec<DateBucket>>;
}

/// Compare two sort keys under `sort`. Missing components sort first.
pub fn compare_sort_keys(a: &[Value], b: &[Value], sort: &[SortField]) -> Ordering {
    for (i, field) in sort.iter().enumerate() {
        let ordering = compare_values(a.get(i), b.get(i));
        let ordering = match field.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = x.as_f64().unwrap_or(f64::NAN);
                    let y = y.as_f64().unwrap_or(f64::NAN);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                },
            }
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
