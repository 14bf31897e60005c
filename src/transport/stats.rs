// ABOUTME: Exports per-table statistics dumps and loads them into a target cluster
// ABOUTME: Best-effort per table: failures are reported while sibling tables continue

use crate::client::{DiagnosticClient, RelationalClient};
use crate::error::{kind_of, TransportError};
use crate::mysql::reader;
use crate::snapshot::{Artifact, SnapshotIndex};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// One table or artifact whose statistics could not be transported
#[derive(Debug)]
pub struct StatsFailure {
    pub database: String,
    /// Table name on export, artifact path on import
    pub subject: String,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct StatsExportReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<StatsFailure>,
}

impl StatsExportReport {
    pub fn merge(&mut self, other: StatsExportReport) {
        self.written.extend(other.written);
        self.failures.extend(other.failures);
    }
}

#[derive(Debug, Default)]
pub struct StatsImportReport {
    pub loaded: Vec<PathBuf>,
    pub failures: Vec<StatsFailure>,
}

impl StatsImportReport {
    pub fn merge(&mut self, other: StatsImportReport) {
        self.loaded.extend(other.loaded);
        self.failures.extend(other.failures);
    }
}

/// Dump the statistics of each table in `tables` into its own artifact
pub async fn export_stats<D>(
    diagnostic: &D,
    database: &str,
    tables: &[String],
    dir: &Path,
) -> StatsExportReport
where
    D: DiagnosticClient + ?Sized,
{
    let mut report = StatsExportReport::default();

    for table in tables {
        match export_table_stats(diagnostic, database, table, dir).await {
            Ok(path) => {
                tracing::info!(
                    "✓ Exported statistics of {}.{} into {}",
                    database,
                    table,
                    path.display()
                );
                report.written.push(path);
            }
            Err(error) => {
                tracing::warn!("⚠ {:#}", error);
                report.failures.push(StatsFailure {
                    database: database.to_string(),
                    subject: table.clone(),
                    error,
                });
            }
        }
    }

    report
}

/// Stream one table's dump to a temp file and rename it into place
pub async fn export_table_stats<D>(
    diagnostic: &D,
    database: &str,
    table: &str,
    dir: &Path,
) -> Result<PathBuf>
where
    D: DiagnosticClient + ?Sized,
{
    async {
        let path = Artifact::stats(database, table)?.path_in(dir);

        let tmp = tempfile::Builder::new()
            .prefix(".stats-")
            .suffix(".partial")
            .tempfile_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        let mut file = tokio::fs::File::from_std(
            tmp.as_file()
                .try_clone()
                .context("Failed to open temp file for writing")?,
        );

        let bytes = diagnostic.dump_stats(database, table, &mut file).await?;
        file.flush().await.context("Failed to flush statistics dump")?;
        drop(file);

        tmp.persist(&path)
            .with_context(|| format!("Failed to persist {}", path.display()))?;

        tracing::debug!("Wrote {} byte(s) to {}", bytes, path.display());
        Ok::<_, anyhow::Error>(path)
    }
    .await
    .context(TransportError::StatsExport {
        database: database.to_string(),
        table: table.to_string(),
    })
}

/// Load every statistics artifact of `database` found in `index`
///
/// A failing artifact is recorded and skipped. Losing the connection to the
/// target is returned as an error, since no later artifact could load either.
pub async fn import_stats<C>(
    client: &mut C,
    database: &str,
    index: &SnapshotIndex,
) -> Result<StatsImportReport>
where
    C: RelationalClient + ?Sized,
{
    let mut report = StatsImportReport::default();
    let artifacts = index.stats_artifacts(database);
    if artifacts.is_empty() {
        tracing::info!("No statistics artifacts for database '{}'", database);
        return Ok(report);
    }

    // Register the whole batch first so the client whitelists it in one go.
    let mut registered = Vec::with_capacity(artifacts.len());
    for path in artifacts {
        match client.register_local_file(&path).await {
            Ok(()) => registered.push(path),
            Err(e) => fatal_or_recorded(&mut report, database, path, e)?,
        }
    }

    for path in registered {
        match client
            .exec(Some(database), &reader::load_stats_sql(&path))
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "✓ Imported statistics from {} into {}/{}",
                    path.display(),
                    client.endpoint(),
                    database
                );
                report.loaded.push(path);
            }
            Err(e) => fatal_or_recorded(&mut report, database, path, e)?,
        }
    }

    Ok(report)
}

/// Connection loss is returned; anything else is recorded against the artifact
fn fatal_or_recorded(
    report: &mut StatsImportReport,
    database: &str,
    path: PathBuf,
    error: anyhow::Error,
) -> Result<()> {
    if matches!(kind_of(&error), Some(TransportError::Connection { .. })) {
        return Err(error.context(format!(
            "Lost the connection while loading statistics from {}",
            path.display()
        )));
    }
    record_import_failure(report, database, path, error);
    Ok(())
}

fn record_import_failure(
    report: &mut StatsImportReport,
    database: &str,
    path: PathBuf,
    error: anyhow::Error,
) {
    let error = error.context(TransportError::StatsImport {
        database: database.to_string(),
        path: path.clone(),
    });
    tracing::warn!("⚠ {:#}", error);
    report.failures.push(StatsFailure {
        database: database.to_string(),
        subject: path.display().to_string(),
        error,
    });
}
