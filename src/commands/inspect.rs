// ABOUTME: Inspect command: lists the databases and tables stored in a snapshot directory
// ABOUTME: Reads artifact names and schema files only, never connects to a cluster

use crate::snapshot::SnapshotIndex;
use crate::transport::schema::read_ddl_artifact;
use anyhow::{bail, Result};
use std::path::Path;

/// One database as recorded in a snapshot directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseReport {
    pub database: String,
    /// Tables in the schema artifact; `None` when it is missing or unreadable
    pub schema_tables: Option<Vec<String>>,
    pub stats_tables: Vec<String>,
}

impl DatabaseReport {
    /// Statistics artifacts whose table has no DDL in the schema artifact
    pub fn orphaned_stats(&self) -> Vec<String> {
        let Some(schema_tables) = &self.schema_tables else {
            return self.stats_tables.clone();
        };
        self.stats_tables
            .iter()
            .filter(|table| !schema_tables.iter().any(|s| s.eq_ignore_ascii_case(table)))
            .cloned()
            .collect()
    }
}

/// Summarise every database found in `dir`
pub fn describe_snapshot(dir: &Path) -> Result<Vec<DatabaseReport>> {
    if !dir.is_dir() {
        bail!("Snapshot directory {} does not exist", dir.display());
    }

    let index = SnapshotIndex::scan(dir)?;
    let mut reports = Vec::new();

    for database in index.databases() {
        let schema_tables = index
            .get(database)
            .and_then(|artifacts| artifacts.schema.as_ref())
            .and_then(|path| match read_ddl_artifact(path) {
                Ok(schemas) => Some(schemas.into_keys().collect()),
                Err(e) => {
                    tracing::warn!("⚠ {:#}", e);
                    None
                }
            });
        reports.push(DatabaseReport {
            database: database.to_string(),
            schema_tables,
            stats_tables: index.tables(database),
        });
    }

    Ok(reports)
}

pub async fn inspect(dir: &Path) -> Result<()> {
    let reports = describe_snapshot(dir)?;

    if reports.is_empty() {
        tracing::warn!("⚠ No snapshot artifacts found in {}", dir.display());
        return Ok(());
    }

    println!("Snapshot {}", dir.display());
    for report in &reports {
        match &report.schema_tables {
            Some(tables) => println!(
                "  {}: {} table schema(s), {} statistics file(s)",
                report.database,
                tables.len(),
                report.stats_tables.len()
            ),
            None => println!(
                "  {}: no schema file, {} statistics file(s)",
                report.database,
                report.stats_tables.len()
            ),
        }
        for table in report.orphaned_stats() {
            println!("    ⚠ statistics for '{}' without a table schema", table);
        }
    }
    Ok(())
}
