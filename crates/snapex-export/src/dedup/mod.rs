//! Run-scoped dedup store
//!
//! Every partition walker asks the dedup store before writing a record.
//! `try_add` is an atomic check-and-set: for one scope it returns `true`
//! exactly once per id, no matter how many walkers race on it. That single
//! property is what makes a run emit each record at most once even though
//! pages of a moving dataset can repeat documents across partitions.
//!
//! Two backends:
//! - [`MemoryDedupStore`]: lock-striped in-process set, for single-process runs
//! - [`RedisDedupStore`]: Redis set per scope, for walkers spread across processes

mod memory;
mod redis_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snapex_common::Result;
use std::sync::Arc;

pub use memory::MemoryDedupStore;
pub use redis_store::RedisDedupStore;

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Record `id` under `scope`. Returns true only for the first insertion.
    async fn try_add(&self, scope: &str, id: u64) -> Result<bool>;

    /// Forget every id recorded under `scope`. Clearing an empty scope is a no-op.
    async fn reset(&self, scope: &str) -> Result<()>;
}

/// Which dedup backend a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupBackend {
    #[default]
    Memory,
    Redis,
}

impl std::str::FromStr for DedupBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(DedupBackend::Memory),
            "redis" => Ok(DedupBackend::Redis),
            _ => Err(anyhow::anyhow!("Invalid dedup backend: {}", s)),
        }
    }
}

impl std::fmt::Display for DedupBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupBackend::Memory => write!(f, "memory"),
            DedupBackend::Redis => write!(f, "redis"),
        }
    }
}

/// Open the configured backend
pub async fn connect(backend: DedupBackend, redis_url: &str) -> Result<Arc<dyn DedupStore>> {
    match backend {
        DedupBackend::Memory => Ok(Arc::new(MemoryDedupStore::new())),
        DedupBackend::Redis => Ok(Arc::new(RedisDedupStore::connect(redis_url).await?)),
    }
}

/// Dedup scope of one entity type within one run. Ids of different entity
/// types share the integer space, so each type gets its own scope.
pub fn run_scope(run_id: &str, entity_type: &str) -> String {
    format!("{}:{}", run_id, entity_type)
}
