// ABOUTME: Transport command: export a snapshot from a source and import it into a destination
// ABOUTME: Resolves configuration, runs interactive selection and prints the run summary

use crate::config::TransportConfig;
use crate::endpoint::EndpointSpec;
use crate::error::{kind_of, TransportError};
use crate::filters::SystemDatabases;
use crate::interactive;
use crate::transport::{self, TransportSummary};
use anyhow::{bail, Context, Result};

/// Run one transport with fully merged configuration
///
/// # Arguments
///
/// * `config` - File settings with command-line overrides already applied
/// * `interactive` - Prompt for databases and ignored tables on the source first
///
/// # Errors
///
/// Fails on invalid settings, unreachable clusters, instance provisioning
/// problems, and schema export or import failures. Statistics failures are
/// reported as warnings and do not fail the run.
pub async fn transport(mut config: TransportConfig, interactive: bool) -> Result<()> {
    if interactive {
        let source = match config.source.to_spec()? {
            Some(EndpointSpec::Remote(endpoint)) => endpoint,
            Some(EndpointSpec::Ephemeral { .. }) => {
                bail!("Interactive selection needs a running source cluster, not an ephemeral one")
            }
            None => bail!("Interactive selection needs a source (--src-addr)"),
        };
        let system = match &config.system_databases {
            Some(names) => SystemDatabases::new(names),
            None => SystemDatabases::default(),
        };

        let selection = interactive::select_databases_and_tables(&source, &system).await?;
        if selection.is_empty() {
            tracing::warn!("⚠ Nothing selected; exiting");
            return Ok(());
        }
        config.databases = selection.databases;
        config.ignore_tables.extend(selection.ignore_tables);
    }

    let plan = config.to_plan()?;
    let instances = config.instance_manager();

    let summary = match transport::run(&plan, &instances).await {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(hint) = kind_of(&e).and_then(recovery_hint) {
                tracing::warn!("⚠ {}", hint);
            }
            return Err(e).context("Transport failed");
        }
    };

    print_summary(&summary, &plan.dir);
    Ok(())
}

fn recovery_hint(kind: &TransportError) -> Option<String> {
    match kind {
        TransportError::Connection { endpoint } => Some(format!(
            "Check that {} is reachable and the credentials are correct",
            endpoint
        )),
        TransportError::Provision { version, .. } => Some(format!(
            "Install it with `tiup install tidb:{}` or pass --auto-install",
            version
        )),
        TransportError::ReadinessTimeout { .. } => Some(
            "Raise --readiness-timeout or read the instance log in its data directory".to_string(),
        ),
        _ => None,
    }
}

fn print_summary(summary: &TransportSummary, dir: &std::path::Path) {
    println!();
    println!("========================================");
    println!("Transport Summary");
    println!("========================================");
    println!("Snapshot directory: {}", dir.display());

    if let Some(export) = &summary.export {
        println!(
            "Exported: {} schema file(s), {} statistics file(s)",
            export.schema_files.len(),
            export.stats.written.len()
        );
        for database in &export.skipped_databases {
            println!("  ⚠ skipped database '{}': name cannot be stored in a snapshot", database);
        }
        for failure in &export.stats.failures {
            println!("  ✗ stats {}.{}: {:#}", failure.database, failure.subject, failure.error);
        }
    }

    if let Some(import) = &summary.import {
        println!(
            "Imported: {} database(s), {} table(s), {} statistics file(s)",
            import.databases.len(),
            import.tables_created,
            import.stats.loaded.len()
        );
        for failure in &import.stats.failures {
            println!("  ✗ stats {}: {:#}", failure.subject, failure.error);
        }
    }

    println!("========================================");
}
