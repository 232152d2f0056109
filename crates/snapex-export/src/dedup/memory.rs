//! In-process dedup store

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use snapex_common::Result;

use super::DedupStore;

/// One lock-striped id set per scope. `DashSet::insert` locks a single
/// shard and reports whether the id was new, which gives the atomic
/// check-and-set `try_add` needs. Resetting a scope drops its whole set.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    scopes: DashMap<String, DashSet<u64>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids held across all scopes
    pub fn len(&self) -> usize {
        self.scopes.iter().map(|set| set.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scopes currently holding a set
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn try_add(&self, scope: &str, id: u64) -> Result<bool> {
        if let Some(set) = self.scopes.get(scope) {
            return Ok(set.insert(id));
        }
        Ok(self.scopes.entry(scope.to_string()).or_default().insert(id))
    }

    async fn reset(&self, scope: &str) -> Result<()> {
        self.scopes.remove(scope);
        Ok(())
    }
}
