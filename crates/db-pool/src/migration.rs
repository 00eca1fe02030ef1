//! Migration record table (spec §6: "the only schema the core
//! mandates"): `(version PRIMARY KEY, description, applied_at, checksum)`.

use chrono::Utc;
use serde_json::json;

use crate::backend::{DbBackend, MigrationRecord};
use crate::error::DbPoolResult;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS taskfabric_migrations (\
    version TEXT PRIMARY KEY, \
    description TEXT NOT NULL, \
    applied_at TIMESTAMPTZ NOT NULL, \
    checksum TEXT NOT NULL\
)";

pub struct MigrationRunner;

impl MigrationRunner {
    pub async fn ensure_table(backend: &dyn DbBackend) -> DbPoolResult<()> {
        backend.execute(CREATE_TABLE_SQL, &[]).await?;
        Ok(())
    }

    pub async fn applied_versions(backend: &dyn DbBackend) -> DbPoolResult<Vec<String>> {
        let result = backend.execute("SELECT version FROM taskfabric_migrations ORDER BY version", &[]).await?;
        Ok(result.rows.into_iter().filter_map(|row| row.get("version").and_then(|v| v.as_str()).map(str::to_string)).collect())
    }

    /// Records a migration as applied. Idempotent: re-applying the same
    /// version is a no-op from the caller's perspective since the
    /// version is the primary key.
    pub async fn record_applied(backend: &dyn DbBackend, version: &str, description: &str, checksum: &str) -> DbPoolResult<MigrationRecord> {
        let applied_at = Utc::now();
        backend
            .execute(
                "INSERT INTO taskfabric_migrations (version, description, applied_at, checksum) VALUES ($1, $2, $3, $4) ON CONFLICT (version) DO NOTHING",
                &[json!(version), json!(description), json!(applied_at.to_rfc3339()), json!(checksum)],
            )
            .await?;
        Ok(MigrationRecord { version: version.to_string(), description: description.to_string(), applied_at, checksum: checksum.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::FakeBackend;

    #[tokio::test]
    async fn ensure_table_and_record_applied_do_not_error() {
        let backend = FakeBackend::new(true);
        MigrationRunner::ensure_table(&backend).await.unwrap();
        let record = MigrationRunner::record_applied(&backend, "0001", "initial schema", "deadbeef").await.unwrap();
        assert_eq!(record.version, "0001");
    }
}
