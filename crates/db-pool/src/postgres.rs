//! Postgres-backed `DbBackend`, grounded on
//! `gator-db::pool::create_pool`'s use of `sqlx` against Postgres. Each
//! instance owns exactly one physical connection; pooling of these is
//! `ConnectionPool`'s job, not `sqlx::PgPool`'s.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Postgres, Row};

use crate::backend::{BackendFactory, DbBackend, QueryResult};
use crate::error::{DbPoolError, DbPoolResult};

pub struct PostgresBackend {
    conn: tokio::sync::Mutex<Option<PgConnection>>,
}

impl PostgresBackend {
    pub async fn connect(url: &str) -> DbPoolResult<Self> {
        let conn = PgConnection::connect(url).await.map_err(|e| DbPoolError::BackendError(e.to_string()))?;
        Ok(Self { conn: tokio::sync::Mutex::new(Some(conn)) })
    }
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl DbBackend for PostgresBackend {
    async fn execute(&self, query: &str, params: &[serde_json::Value]) -> DbPoolResult<QueryResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| DbPoolError::BackendError("connection closed".to_string()))?;

        let mut q = sqlx::query(query);
        for param in params {
            q = bind_json(q, param);
        }

        let rows = q.fetch_all(&mut *conn).await.map_err(|e| DbPoolError::BackendError(e.to_string()))?;
        let rows_affected = rows.len() as u64;
        let rows = rows.into_iter().map(row_to_json).collect();
        Ok(QueryResult { rows_affected, rows })
    }

    async fn ping(&self) -> DbPoolResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| DbPoolError::BackendError("connection closed".to_string()))?;
        conn.ping().await.map_err(|e| DbPoolError::BackendError(e.to_string()))
    }

    async fn close(&self) -> DbPoolResult<()> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().await.map_err(|e| DbPoolError::BackendError(e.to_string()))?;
        }
        Ok(())
    }
}

fn bind_json<'q>(query: Query<'q, Postgres, PgArguments>, value: &serde_json::Value) -> Query<'q, Postgres, PgArguments> {
    match value {
        serde_json::Value::Null => query.bind(None::<String>),
        serde_json::Value::Bool(b) => query.bind(*b),
        serde_json::Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
        serde_json::Value::Number(n) => query.bind(n.as_f64()),
        serde_json::Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Best-effort text decoding; this backend is used for migration and
/// backup bookkeeping, not for general query result consumption.
fn row_to_json(row: PgRow) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let value = row.try_get::<Option<String>, _>(column.ordinal()).ok().flatten().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null);
        map.insert(name, value);
    }
    serde_json::Value::Object(map)
}

pub struct PostgresBackendFactory;

#[async_trait]
impl BackendFactory for PostgresBackendFactory {
    async fn connect(&self, connection_string: &str) -> DbPoolResult<Box<dyn DbBackend>> {
        let backend = PostgresBackend::connect(connection_string).await?;
        Ok(Box::new(backend))
    }
}
