//! Export configuration
//!
//! Defaults, overridden by an optional TOML file, overridden by `SNAPEX_*`
//! environment variables (a `.env` file is loaded first), overridden by CLI
//! flags in `main.rs`.

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use snapex_common::{Result, SnapexError};
use std::path::{Path, PathBuf};

use crate::dedup::DedupBackend;
use crate::store::SortField;
use crate::walker::{WalkSettings, DEFAULT_PROGRESS_INTERVAL};
use crate::writer::DEFAULT_MAX_FILE_SIZE;

// ============================================================================
// Export Configuration Constants
// ============================================================================

/// Default search store endpoint.
pub const DEFAULT_STORE_URL: &str = "http://localhost:9200";

/// Default store request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = crate::store::elastic::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Default number of documents per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default field the export is partitioned on.
pub const DEFAULT_PARTITION_FIELD: &str = "updated_date";

/// Default namespace preceding the type letter of every document id.
pub const DEFAULT_ID_NAMESPACE: &str = "https://openalex.org/";

/// Default destination the manifest URLs point at.
pub const DEFAULT_REMOTE_BASE: &str = "s3://openalex/data";

/// Default Redis URL for the shared dedup store.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/2";

/// Default root of local output, relative to the working directory.
pub const DEFAULT_OUTPUT_BASE: &str = "data";

/// Source fields never exported.
pub const DEFAULT_SOURCE_EXCLUDES: &[&str] =
    &["_source", "fulltext", "abstract", "version", "@version", "@timestamp"];

/// Entity types and the indices they are read from.
pub const DEFAULT_ENTITIES: &[(&str, &str)] = &[
    ("authors", "authors-v10"),
    ("concepts", "concepts-v8"),
    ("funders", "funders-v3"),
    ("institutions", "institutions-v5"),
    ("publishers", "publishers-v4"),
    ("sources", "sources-v2"),
    ("works", "works-v18-*,-*invalid-data"),
];

/// One entity type and the index (or index pattern) holding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTarget {
    pub name: String,
    pub index: String,
}

impl EntityTarget {
    pub fn new(name: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: index.into(),
        }
    }
}

pub fn default_entities() -> Vec<EntityTarget> {
    DEFAULT_ENTITIES
        .iter()
        .map(|(name, index)| EntityTarget::new(*name, *index))
        .collect()
}

pub fn default_sort() -> Vec<SortField> {
    vec![SortField::desc("cited_by_count"), SortField::asc("id")]
}

/// `./data/<YYYY_MM_DD>` for today
pub fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_BASE).join(Utc::now().format("%Y_%m_%d").to_string())
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub store_url: String,
    pub request_timeout_secs: u64,
    pub output_dir: PathBuf,
    pub entities: Vec<EntityTarget>,
    pub partition_field: String,
    pub sort: Vec<SortField>,
    pub page_size: usize,
    pub source_excludes: Vec<String>,
    pub max_file_size: u64,
    pub workers: usize,
    pub id_namespace: String,
    pub remote_base: String,
    pub dedup_backend: DedupBackend,
    pub redis_url: String,
    pub progress_interval: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            store_url: DEFAULT_STORE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            output_dir: default_output_dir(),
            entities: default_entities(),
            partition_field: DEFAULT_PARTITION_FIELD.to_string(),
            sort: default_sort(),
            page_size: DEFAULT_PAGE_SIZE,
            source_excludes: DEFAULT_SOURCE_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            workers: default_workers(),
            id_namespace: DEFAULT_ID_NAMESPACE.to_string(),
            remote_base: DEFAULT_REMOTE_BASE.to_string(),
            dedup_backend: DedupBackend::default(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl ExportConfig {
    /// Defaults overridden by the environment
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file; keys it leaves out keep their defaults
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Optional file, then environment, then validation
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `SNAPEX_*` variables that are set and parse
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SNAPEX_STORE_URL") {
            self.store_url = url;
        }
        if let Ok(dir) = std::env::var("SNAPEX_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(page_size) = env_parse("SNAPEX_PAGE_SIZE") {
            self.page_size = page_size;
        }
        if let Some(max_file_size) = env_parse("SNAPEX_MAX_FILE_SIZE") {
            self.max_file_size = max_file_size;
        }
        if let Some(workers) = env_parse("SNAPEX_WORKERS") {
            self.workers = workers;
        }
        if let Some(backend) = env_parse("SNAPEX_DEDUP_BACKEND") {
            self.dedup_backend = backend;
        }
        if let Ok(url) = std::env::var("SNAPEX_REDIS_URL") {
            self.redis_url = url;
        }
        if let Ok(base) = std::env::var("SNAPEX_REMOTE_BASE") {
            self.remote_base = base;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_url.is_empty() {
            return Err(SnapexError::Config("Store URL cannot be empty".to_string()));
        }

        if self.page_size == 0 {
            return Err(SnapexError::Config("Page size must be greater than 0".to_string()));
        }

        if self.max_file_size == 0 {
            return Err(SnapexError::Config("Max file size must be greater than 0".to_string()));
        }

        if self.workers == 0 {
            return Err(SnapexError::Config("Worker count must be greater than 0".to_string()));
        }

        if self.sort.is_empty() {
            return Err(SnapexError::Config("Sort must name at least one field".to_string()));
        }

        if self.entities.is_empty() {
            return Err(SnapexError::Config("No entity types configured".to_string()));
        }

        if self.dedup_backend == DedupBackend::Redis && self.redis_url.is_empty() {
            return Err(SnapexError::Config(
                "Redis dedup backend selected but no Redis URL configured".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_entities(mut self, entities: Vec<EntityTarget>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_remote_base(mut self, remote_base: impl Into<String>) -> Self {
        self.remote_base = remote_base.into();
        self
    }

    /// Configured entities matching `names`, all of them when `names` is empty
    pub fn select_entities(&self, names: &[String]) -> Result<Vec<EntityTarget>> {
        if names.is_empty() {
            return Ok(self.entities.clone());
        }

        names
            .iter()
            .map(|name| {
                self.entities
                    .iter()
                    .find(|e| &e.name == name)
                    .cloned()
                    .ok_or_else(|| {
                        let known: Vec<&str> = self.entities.iter().map(|e| e.name.as_str()).collect();
                        SnapexError::Config(format!(
                            "Unknown entity type '{}' (known: {})",
                            name,
                            known.join(", ")
                        ))
                    })
            })
            .collect()
    }

    pub fn entity_dir(&self, entity_type: &str) -> PathBuf {
        self.output_dir.join(entity_type)
    }

    pub fn walk_settings(&self) -> WalkSettings {
        WalkSettings {
            partition_field: self.partition_field.clone(),
            sort: self.sort.clone(),
            page_size: self.page_size,
            source_excludes: self.source_excludes.clone(),
            max_file_size: self.max_file_size,
            progress_interval: self.progress_interval,
        }
    }
}
