//! Redis-backed dedup store
//!
//! One Redis set per scope. `SADD` is atomic on the server, so walkers in
//! several processes can share a run scope.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use snapex_common::{Result, SnapexError};
use tracing::{debug, info};

use super::DedupStore;

const KEY_PREFIX: &str = "snapex:dedup:";

#[derive(Clone)]
pub struct RedisDedupStore {
    connection: MultiplexedConnection,
}

impl RedisDedupStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(SnapexError::dedup)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(SnapexError::dedup)?;

        info!(url = %redact(url), "Connected to Redis dedup store");
        Ok(Self { connection })
    }

    pub fn key(scope: &str) -> String {
        format!("{}{}", KEY_PREFIX, scope)
    }
}

/// Drop credentials from a redis URL before it is logged
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        },
        _ => url.to_string(),
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn try_add(&self, scope: &str, id: u64) -> Result<bool> {
        let mut connection = self.connection.clone();
        let added: i64 = redis::cmd("SADD")
            .arg(Self::key(scope))
            .arg(id)
            .query_async(&mut connection)
            .await
            .map_err(SnapexError::dedup)?;
        Ok(added == 1)
    }

    async fn reset(&self, scope: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(Self::key(scope))
            .query_async(&mut connection)
            .await
            .map_err(SnapexError::dedup)?;
        debug!(scope, removed, "Dedup scope cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key() {
        assert_eq!(RedisDedupStore::key("run-1:works"), "snapex:dedup:run-1:works");
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("redis://user:pw@cache:6379/2"), "redis://***@cache:6379/2");
        assert_eq!(redact("redis://localhost:6379/2"), "redis://localhost:6379/2");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        assert!(matches!(
            RedisDedupStore::connect("not a url").await,
            Err(SnapexError::Dedup(_))
        ));
    }
}
