//! Elasticsearch binding for [`SearchStore`]
//!
//! Pages are fetched with `search_after` so each request costs one page
//! regardless of how deep into the partition the walker is. Partition keys
//! come from a `date_histogram` aggregation with a one-day interval.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use snapex_common::{Result, SnapexError};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{DateBucket, Hit, Page, PageQuery, SearchStore};

/// Default timeout for store requests in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for an Elasticsearch cluster
#[derive(Clone)]
pub struct ElasticStore {
    client: Client,
    base_url: String,
}

impl ElasticStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SnapexError::store)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn search_url(&self, index: &str) -> String {
        format!("{}/{}/_search", self.base_url, index)
    }

    /// Request body for one page
    pub fn page_body(query: &PageQuery) -> Value {
        let mut term = Map::new();
        term.insert(
            query.partition_field.clone(),
            Value::String(query.partition_key.clone()),
        );

        let sort: Vec<Value> = query
            .sort
            .iter()
            .map(|s| {
                let mut clause = Map::new();
                clause.insert(s.field.clone(), json!({ "order": s.order.as_str() }));
                Value::Object(clause)
            })
            .collect();

        let mut body = json!({
            "query": { "term": term },
            "sort": sort,
            "size": query.size,
            "_source": { "excludes": query.source_excludes },
        });

        if let Some(cursor) = &query.search_after {
            body["search_after"] = Value::Array(cursor.values().to_vec());
        }

        body
    }

    /// Request body for partition discovery
    pub fn histogram_body(field: &str) -> Value {
        json!({
            "size": 0,
            "aggs": {
                "distinct_dates": {
                    "date_histogram": {
                        "field": field,
                        "calendar_interval": "day",
                    }
                }
            }
        })
    }

    async fn check(response: Response, url: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(SnapexError::Store(format!("{} returned {}: {}", url, status, body)))
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(rename = "_source", default)]
    source: Value,
    #[serde(default)]
    sort: Vec<Value>,
}

#[derive(Deserialize)]
struct AggregationResponse {
    aggregations: Aggregations,
}

#[derive(Deserialize)]
struct Aggregations {
    distinct_dates: Histogram,
}

#[derive(Deserialize)]
struct Histogram {
    buckets: Vec<DateBucket>,
}

#[async_trait]
impl SearchStore for ElasticStore {
    #[instrument(skip(self, query), fields(partition = %query.partition_key, resumed = query.search_after.is_some()))]
    async fn search_page(&self, index: &str, query: &PageQuery) -> Result<Page> {
        let url = self.search_url(index);
        let mut request = self.client.post(&url).json(&Self::page_body(query));
        if let Some(preference) = &query.preference {
            request = request.query(&[("preference", preference)]);
        }

        let response = request.send().await.map_err(SnapexError::store)?;
        let response = Self::check(response, &url).await?;
        let parsed: SearchResponse = response.json().await.map_err(SnapexError::store)?;

        let hits: Vec<Hit> = parsed
            .hits
            .hits
            .into_iter()
            .map(|raw| Hit {
                id: raw.id,
                source: raw.source,
                sort: raw.sort,
            })
            .collect();

        debug!(hits = hits.len(), "page fetched");
        Ok(Page { hits })
    }

    #[instrument(skip(self))]
    async fn date_histogram(&self, index: &str, field: &str) -> Result<Vec<DateBucket>> {
        let url = self.search_url(index);
        let response = self
            .client
            .post(&url)
            .json(&Self::histogram_body(field))
            .send()
            .await
            .map_err(SnapexError::store)?;
        let response = Self::check(response, &url).await?;
        let parsed: AggregationResponse = response.json().await.map_err(SnapexError::store)?;

        debug!(buckets = parsed.aggregations.distinct_dates.buckets.len(), "histogram fetched");
        Ok(parsed.aggregations.distinct_dates.buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Cursor, SortField};

    #[test]
    fn test_page_body_first_page() {
        let query = PageQuery::first(
            "updated_date",
            "2024-03-01",
            vec![SortField::desc("cited_by_count"), SortField::asc("id")],
            1000,
            vec!["abstract".to_string()],
        );
        let body = ElasticStore::page_body(&query);

        assert_eq!(body["query"]["term"]["updated_date"], "2024-03-01");
        assert_eq!(body["sort"][0]["cited_by_count"]["order"], "desc");
        assert_eq!(body["sort"][1]["id"]["order"], "asc");
        assert_eq!(body["size"], 1000);
        assert_eq!(body["_source"]["excludes"][0], "abstract");
        assert!(body.get("search_after").is_none());
    }

    #[test]
    fn test_page_body_carries_cursor() {
        let query = PageQuery::first("updated_date", "2024-03-01", vec![SortField::asc("id")], 10, vec![])
            .after(Cursor::new(vec![json!(42), json!("https://openalex.org/W1")]));
        let body = ElasticStore::page_body(&query);
        assert_eq!(body["search_after"], json!([42, "https://openalex.org/W1"]));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let store = ElasticStore::new("http://localhost:9200/", Duration::from_secs(5)).unwrap();
        assert_eq!(store.search_url("works-v18"), "http://localhost:9200/works-v18/_search");
    }
}
