// ABOUTME: Interactive terminal UI for database and table selection
// ABOUTME: Lets the operator pick source databases and tables to ignore before exporting

use crate::client::RelationalClient;
use crate::endpoint::Endpoint;
use crate::filters::SystemDatabases;
use crate::mysql::{self, reader};
use anyhow::{Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, MultiSelect};
use std::collections::BTreeSet;

/// Databases and ignored tables picked by the operator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub databases: Vec<String>,
    pub ignore_tables: Vec<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}

/// Interactive database and table selection against a source cluster
///
/// Presents a terminal UI for selecting:
/// 1. Which databases to export (multi-select)
/// 2. For each selected database, which tables to ignore (multi-select)
/// 3. Summary and confirmation
///
/// Ignored table names apply to every selected database, the same way
/// `--ignore-tables` does.
///
/// # Arguments
///
/// * `endpoint` - Source cluster to browse
/// * `system` - Databases never offered for selection
///
/// # Errors
///
/// Returns an error if the source cannot be reached, its catalog cannot be
/// listed, or the operator cancels.
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use tidb_snapshot_transport::endpoint::Endpoint;
/// # use tidb_snapshot_transport::filters::SystemDatabases;
/// # use tidb_snapshot_transport::interactive::select_databases_and_tables;
/// # async fn example() -> Result<()> {
/// let source = Endpoint::new("10.0.0.1", 4000, 10080);
/// let selection = select_databases_and_tables(&source, &SystemDatabases::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn select_databases_and_tables(
    endpoint: &Endpoint,
    system: &SystemDatabases,
) -> Result<Selection> {
    tracing::info!("Starting interactive database and table selection...");

    tracing::info!("Connecting to source {}...", endpoint);
    let mut client = mysql::connect_mysql(endpoint)
        .await
        .context("Failed to connect to source cluster")?;
    tracing::info!("✓ Connected to source");

    let result = prompt(&mut client, system).await;
    if let Err(e) = client.disconnect().await {
        tracing::debug!("{:#}", e);
    }
    result
}

async fn prompt<C>(client: &mut C, system: &SystemDatabases) -> Result<Selection>
where
    C: RelationalClient + ?Sized,
{
    let all_databases = reader::list_databases(client, system)
        .await
        .context("Failed to list databases on source")?;

    if all_databases.is_empty() {
        tracing::warn!("⚠ No user databases found on source");
        return Ok(Selection::default());
    }
    tracing::info!("✓ Found {} database(s)", all_databases.len());

    println!("Select databases to export:");
    println!("(Use arrow keys to navigate, Space to select, Enter to confirm)");
    println!();

    let db_selections = MultiSelect::with_theme(&ColorfulTheme::default())
        .items(&all_databases)
        .interact()
        .context("Failed to get database selection")?;

    if db_selections.is_empty() {
        tracing::warn!("⚠ No databases selected");
        return Ok(Selection::default());
    }

    let databases = pick(&all_databases, &db_selections);
    let mut ignored = Vec::new();

    for db_name in &databases {
        let tables = reader::list_tables(client, db_name)
            .await
            .with_context(|| format!("Failed to list tables from database '{}'", db_name))?;

        if tables.is_empty() {
            tracing::info!("  No tables found in database '{}'", db_name);
            continue;
        }

        println!(
            "Select tables to IGNORE in '{}' (or press Enter to keep all):",
            db_name
        );
        let exclusions = MultiSelect::with_theme(&ColorfulTheme::default())
            .items(&tables)
            .interact()
            .with_context(|| {
                format!("Failed to get table selection for database '{}'", db_name)
            })?;

        let picked = pick(&tables, &exclusions);
        if picked.is_empty() {
            tracing::info!("✓ Keeping all tables of '{}'", db_name);
        } else {
            tracing::info!("✓ Ignoring {} table(s) of '{}'", picked.len(), db_name);
        }
        ignored.extend(picked);
    }

    let selection = build_selection(databases, ignored);
    print_summary(&selection);

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Proceed with this selection?")
        .default(true)
        .interact()
        .context("Failed to get confirmation")?;

    if !confirmed {
        tracing::warn!("⚠ User cancelled operation");
        anyhow::bail!("Interactive selection cancelled by user");
    }

    tracing::info!("✓ Selection confirmed");
    Ok(selection)
}

fn pick(items: &[String], indices: &[usize]) -> Vec<String> {
    indices
        .iter()
        .filter_map(|&idx| items.get(idx).cloned())
        .collect()
}

/// Deduplicate ignored names case-insensitively, keeping the first spelling
fn build_selection(databases: Vec<String>, ignored: Vec<String>) -> Selection {
    let mut seen = BTreeSet::new();
    let ignore_tables = ignored
        .into_iter()
        .filter(|table| seen.insert(table.to_lowercase()))
        .collect();
    Selection {
        databases,
        ignore_tables,
    }
}

fn print_summary(selection: &Selection) {
    println!();
    println!("========================================");
    println!("Transport Selection Summary");
    println!("========================================");
    println!("Databases to export: {}", selection.databases.len());
    for db in &selection.databases {
        println!("  ✓ {}", db);
    }
    if selection.ignore_tables.is_empty() {
        println!("Tables to ignore: none");
    } else {
        println!("Tables to ignore (in every database): {}", selection.ignore_tables.len());
        for table in &selection.ignore_tables {
            println!("  ✗ {}", table);
        }
    }
    println!("========================================");
    println!();
}
