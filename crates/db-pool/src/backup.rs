//! Backup manifest: JSON, optionally gzip-compressed (spec §6).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::DbBackend;
use crate::error::{DbPoolError, DbPoolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
    Differential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableBackup {
    pub structure: HashMap<String, ColumnSchema>,
    pub records: Vec<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_id: String,
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    pub tables: HashMap<String, TableBackup>,
}

impl BackupManifest {
    pub fn new(backup_id: impl Into<String>, backup_type: BackupType) -> Self {
        Self { backup_id: backup_id.into(), backup_type, created_at: Utc::now(), tables: HashMap::new() }
    }

    pub fn add_table(&mut self, name: impl Into<String>, table: TableBackup) {
        self.tables.insert(name.into(), table);
    }

    pub fn write_to(&self, path: &Path, gzip: bool) -> DbPoolResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| DbPoolError::InvalidArgument(e.to_string()))?;
        if gzip {
            let file = std::fs::File::create(path).map_err(|e| DbPoolError::InvalidArgument(e.to_string()))?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&json).map_err(|e| DbPoolError::InvalidArgument(e.to_string()))?;
            encoder.finish().map_err(|e| DbPoolError::InvalidArgument(e.to_string()))?;
        } else {
            std::fs::write(path, json).map_err(|e| DbPoolError::InvalidArgument(e.to_string()))?;
        }
        Ok(())
    }

    pub fn read_from(path: &Path, gzip: bool) -> DbPoolResult<Self> {
        let bytes = if gzip {
            let file = std::fs::File::open(path).map_err(|e| DbPoolError::InvalidArgument(e.to_string()))?;
            let mut decoder = GzDecoder::new(file);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| DbPoolError::InvalidArgument(e.to_string()))?;
            out
        } else {
            std::fs::read(path).map_err(|e| DbPoolError::InvalidArgument(e.to_string()))?
        };
        serde_json::from_slice(&bytes).map_err(|e| DbPoolError::InvalidArgument(e.to_string()))
    }

    /// Validates the manifest, optionally drops each target table,
    /// re-creates structure, and inserts records (spec §6 restoration).
    pub async fn restore(&self, backend: &dyn DbBackend, drop_existing: bool) -> DbPoolResult<()> {
        self.validate()?;
        for (table_name, table) in &self.tables {
            if drop_existing {
                backend.execute(&format!("DROP TABLE IF EXISTS {table_name}"), &[]).await?;
            }
            let columns: Vec<String> = table
                .structure
                .iter()
                .map(|(col, schema)| {
                    let nullability = if schema.nullable { "" } else { " NOT NULL" };
                    format!("{col} {}{nullability}", schema.data_type)
                })
                .collect();
            backend.execute(&format!("CREATE TABLE IF NOT EXISTS {table_name} ({})", columns.join(", ")), &[]).await?;

            for record in &table.records {
                let cols: Vec<&String> = record.keys().collect();
                let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("${i}")).collect();
                let values: Vec<Value> = cols.iter().map(|c| record[*c].clone()).collect();
                let col_list = cols.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ");
                backend
                    .execute(&format!("INSERT INTO {table_name} ({col_list}) VALUES ({})", placeholders.join(", ")), &values)
                    .await?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> DbPoolResult<()> {
        if self.backup_id.is_empty() {
            return Err(DbPoolError::InvalidArgument("backup manifest missing backup_id".to_string()));
        }
        for (name, table) in &self.tables {
            for record in &table.records {
                for col in record.keys() {
                    if !table.structure.contains_key(col) {
                        return Err(DbPoolError::InvalidArgument(format!("table {name} record references undeclared column {col}")));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::FakeBackend;

    fn sample_manifest() -> BackupManifest {
        let mut manifest = BackupManifest::new("backup-1", BackupType::Full);
        let mut structure = HashMap::new();
        structure.insert("id".to_string(), ColumnSchema { data_type: "INTEGER".to_string(), nullable: false, default: None });
        structure.insert("name".to_string(), ColumnSchema { data_type: "TEXT".to_string(), nullable: true, default: None });
        let mut record = HashMap::new();
        record.insert("id".to_string(), Value::from(1));
        record.insert("name".to_string(), Value::from("alice"));
        manifest.add_table("users", TableBackup { structure, records: vec![record] });
        manifest
    }

    #[test]
    fn round_trips_through_gzip_file() {
        let manifest = sample_manifest();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json.gz");
        manifest.write_to(&path, true).unwrap();
        let loaded = BackupManifest::read_from(&path, true).unwrap();
        assert_eq!(loaded.backup_id, "backup-1");
        assert_eq!(loaded.tables.len(), 1);
    }

    #[test]
    fn validate_rejects_record_with_undeclared_column() {
        let mut manifest = sample_manifest();
        manifest.tables.get_mut("users").unwrap().records[0].insert("extra".to_string(), Value::from("oops"));
        assert!(manifest.validate().is_err());
    }

    #[tokio::test]
    async fn restore_creates_table_and_inserts_records() {
        let manifest = sample_manifest();
        let backend = FakeBackend::new(true);
        manifest.restore(&backend, true).await.unwrap();
    }
}
