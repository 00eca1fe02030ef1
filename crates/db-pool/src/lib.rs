//! Bounded connection pool and failover-aware database gateway (spec
//! §4.6, §4.7). Depends on `taskfabric-core` for the shared error type
//! only; it has no scheduling knowledge.

pub mod backend;
pub mod backup;
pub mod error;
pub mod failover;
pub mod migration;
pub mod pool;
pub mod postgres;

pub use backend::{BackendFactory, DbBackend, MigrationRecord, QueryResult};
pub use backup::{BackupManifest, BackupType, ColumnSchema, TableBackup};
pub use error::{DbPoolError, DbPoolResult};
pub use failover::{DatabaseEndpoint, FailoverConfig, FailoverEvent, FailoverManager, FailoverMode, FailoverPhase, FailoverPolicy};
pub use migration::MigrationRunner;
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use postgres::{PostgresBackend, PostgresBackendFactory};
