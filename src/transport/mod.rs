// ABOUTME: Orchestrates snapshot export from a source and import into a destination
// ABOUTME: Provisions ephemeral instances as needed and always releases them

pub mod schema;
pub mod stats;

pub use schema::{export_schema, import_schema, DdlArtifact, DdlMode};
pub use stats::{export_stats, import_stats, StatsExportReport, StatsFailure, StatsImportReport};

use crate::client::{DiagnosticClient, RelationalClient};
use crate::diagnostic::HttpDiagnosticClient;
use crate::endpoint::{Endpoint, EndpointSpec};
use crate::error::TransportError;
use crate::filters::{SystemDatabases, TableFilter};
use crate::instance::{Instance, InstanceManager};
use crate::mysql::{self, reader};
use crate::snapshot::{Artifact, SnapshotIndex};
use anyhow::{bail, Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};

/// Everything one transport run needs
#[derive(Debug, Clone)]
pub struct TransportPlan {
    pub source: Option<EndpointSpec>,
    pub destination: Option<EndpointSpec>,
    pub dir: PathBuf,
    /// Empty means every user database (export) or every snapshotted database (import)
    pub databases: Vec<String>,
    pub filter: TableFilter,
    pub system_databases: SystemDatabases,
    pub ddl_mode: DdlMode,
}

#[derive(Debug, Default)]
pub struct ExportSummary {
    pub schema_files: Vec<PathBuf>,
    pub stats: StatsExportReport,
    /// Discovered databases whose names cannot be stored as artifacts
    pub skipped_databases: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub databases: Vec<String>,
    pub tables_created: usize,
    pub stats: StatsImportReport,
}

#[derive(Debug, Default)]
pub struct TransportSummary {
    pub export: Option<ExportSummary>,
    pub import: Option<ImportSummary>,
}

/// Run export (if a source is configured) and then import (if a destination is)
pub async fn run(plan: &TransportPlan, instances: &InstanceManager) -> Result<TransportSummary> {
    let mut summary = TransportSummary::default();

    if let Some(source) = &plan.source {
        tracing::info!(
            "Exporting schemas and statistics from {} into {}",
            source.describe(),
            plan.dir.display()
        );
        let export = with_endpoint(source, instances, |endpoint| async move {
            let mut client = mysql::connect_mysql(&endpoint).await?;
            let diagnostic = HttpDiagnosticClient::new(&endpoint)?;
            let result = export_snapshot(
                &mut client,
                &diagnostic,
                &plan.databases,
                &plan.filter,
                &plan.system_databases,
                &plan.dir,
            )
            .await;
            close(client).await;
            result
        })
        .await
        .context("Failed to export schemas and statistics")?;
        tracing::info!("✓ Export from {} complete", source.describe());
        summary.export = Some(export);
    }

    if let Some(destination) = &plan.destination {
        tracing::info!(
            "Importing schemas and statistics from {} into {}",
            plan.dir.display(),
            destination.describe()
        );
        let import = with_endpoint(destination, instances, |endpoint| async move {
            let mut client = mysql::connect_mysql(&endpoint).await?;
            let result =
                import_snapshot(&mut client, &plan.databases, &plan.dir, plan.ddl_mode).await;
            close(client).await;
            result
        })
        .await
        .context("Failed to import schemas and statistics")?;
        tracing::info!("✓ Import into {} complete", destination.describe());
        summary.import = Some(import);
    }

    Ok(summary)
}

/// Resolve `spec` to an endpoint, run `work`, and release any instance started for it
async fn with_endpoint<F, Fut, T>(
    spec: &EndpointSpec,
    instances: &InstanceManager,
    work: F,
) -> Result<T>
where
    F: FnOnce(Endpoint) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut instance: Option<Instance> = None;
    let endpoint = match spec {
        EndpointSpec::Remote(endpoint) => endpoint.clone(),
        EndpointSpec::Ephemeral { version } => {
            let started = instances.start(version).await?;
            let endpoint = started.endpoint();
            instance = Some(started);
            endpoint
        }
    };

    let result = work(endpoint).await;

    if let Some(mut instance) = instance {
        instance.release().await;
    }

    result
}

async fn close(client: mysql::MysqlClient) {
    if let Err(e) = client.disconnect().await {
        tracing::debug!("{:#}", e);
    }
}

/// Export schemas for every database, then statistics for the same tables
///
/// A schema failure is fatal; statistics failures are collected in the summary.
pub async fn export_snapshot<C, D>(
    client: &mut C,
    diagnostic: &D,
    databases: &[String],
    filter: &TableFilter,
    system: &SystemDatabases,
    dir: &Path,
) -> Result<ExportSummary>
where
    C: RelationalClient + ?Sized,
    D: DiagnosticClient + ?Sized,
{
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create snapshot directory {}", dir.display()))?;

    let discover = databases.is_empty();
    let databases = if discover {
        let discovered = reader::list_databases(client, system).await?;
        tracing::info!("Exporting all {} user database(s)", discovered.len());
        discovered
    } else {
        databases.to_vec()
    };

    let mut summary = ExportSummary::default();
    let mut selections = Vec::with_capacity(databases.len());

    for database in &databases {
        // Only explicitly requested databases fail the run on an unencodable name.
        if discover {
            if let Err(e) = Artifact::schema(database) {
                tracing::warn!("⚠ Skipping database '{}': {:#}", database, e);
                summary.skipped_databases.push(database.clone());
                continue;
            }
        }

        let tables = reader::list_tables(client, database)
            .await
            .context(TransportError::SchemaExport {
                database: database.clone(),
            })?;
        let selected = filter.apply(&tables);
        tracing::info!(
            "Database '{}': {} of {} table(s) selected",
            database,
            selected.len(),
            tables.len()
        );

        let path = export_schema(client, database, &selected, dir).await?;
        summary.schema_files.push(path);
        selections.push((database, selected));
    }

    for (database, tables) in selections {
        let report = export_stats(diagnostic, database, &tables, dir).await;
        summary.stats.merge(report);
    }

    if !summary.stats.failures.is_empty() {
        tracing::warn!(
            "⚠ Statistics export failed for {} table(s); see warnings above",
            summary.stats.failures.len()
        );
    }

    Ok(summary)
}

/// Replay schemas for every database, then load their statistics
///
/// A schema failure is fatal and happens before any statistics are loaded;
/// statistics failures are collected in the summary unless the connection
/// to the target is lost.
pub async fn import_snapshot<C>(
    client: &mut C,
    databases: &[String],
    dir: &Path,
    mode: DdlMode,
) -> Result<ImportSummary>
where
    C: RelationalClient + ?Sized,
{
    if !dir.is_dir() {
        bail!("Snapshot directory {} does not exist", dir.display());
    }

    let index = SnapshotIndex::scan(dir)?;

    let databases = if databases.is_empty() {
        let discovered = index.schema_databases();
        tracing::info!(
            "Importing all {} database(s) found in {}",
            discovered.len(),
            dir.display()
        );
        discovered
    } else {
        databases.to_vec()
    };

    let mut summary = ImportSummary::default();

    for database in &databases {
        summary.tables_created += import_schema(client, database, dir, mode).await?;
    }

    for database in &databases {
        let report = import_stats(client, database, &index).await?;
        summary.stats.merge(report);
    }

    if !summary.stats.failures.is_empty() {
        tracing::warn!(
            "⚠ Statistics import failed for {} artifact(s); see warnings above",
            summary.stats.failures.len()
        );
    }

    summary.databases = databases;
    Ok(summary)
}
