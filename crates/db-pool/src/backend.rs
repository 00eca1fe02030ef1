//! Database backend capability set (spec §9 redesign note: "model the
//! database backend as a narrow capability set").
//!
//! Concrete backends (Postgres via `sqlx`, an in-memory fake for tests)
//! implement this trait; the pool and failover manager never reach
//! through it for anything else.

use async_trait::async_trait;

use crate::error::DbPoolResult;

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub rows_affected: u64,
    pub rows: Vec<serde_json::Value>,
}

#[async_trait]
pub trait DbBackend: Send + Sync + std::fmt::Debug {
    async fn execute(&self, query: &str, params: &[serde_json::Value]) -> DbPoolResult<QueryResult>;
    async fn ping(&self) -> DbPoolResult<()>;
    async fn close(&self) -> DbPoolResult<()>;
}

/// Zero-arg factory yielding a new backend session for a connection
/// string (spec §6 "Backend factory").
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn connect(&self, connection_string: &str) -> DbPoolResult<Box<dyn DbBackend>>;
}

#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: String,
    pub description: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
    pub checksum: String,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    pub struct FakeBackend {
        pub healthy: Arc<AtomicBool>,
        pub calls: Arc<AtomicU64>,
    }

    impl FakeBackend {
        pub fn new(healthy: bool) -> Self {
            Self { healthy: Arc::new(AtomicBool::new(healthy)), calls: Arc::new(AtomicU64::new(0)) }
        }
    }

    #[async_trait]
    impl DbBackend for FakeBackend {
        async fn execute(&self, _query: &str, _params: &[serde_json::Value]) -> DbPoolResult<QueryResult> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.healthy.load(Ordering::Relaxed) {
                Ok(QueryResult { rows_affected: 0, rows: Vec::new() })
            } else {
                Err(crate::error::DbPoolError::BackendError("backend down".to_string()))
            }
        }

        async fn ping(&self) -> DbPoolResult<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.healthy.load(Ordering::Relaxed) {
                Ok(())
            } else {
                Err(crate::error::DbPoolError::BackendError("ping failed".to_string()))
            }
        }

        async fn close(&self) -> DbPoolResult<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    pub struct FakeBackendFactory {
        pub healthy: Arc<AtomicBool>,
    }

    impl FakeBackendFactory {
        pub fn new(healthy: bool) -> Self {
            Self { healthy: Arc::new(AtomicBool::new(healthy)) }
        }
    }

    #[async_trait]
    impl BackendFactory for FakeBackendFactory {
        async fn connect(&self, _connection_string: &str) -> DbPoolResult<Box<dyn DbBackend>> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(Box::new(FakeBackend { healthy: self.healthy.clone(), calls: Arc::new(AtomicU64::new(0)) }))
            } else {
                Err(crate::error::DbPoolError::BackendError("connect failed".to_string()))
            }
        }
    }
}
