// ABOUTME: MySQL-dialect catalog queries used by the transports
// ABOUTME: Lists databases and tables, reads DDL, and builds schema and stats statements

use crate::client::{RelationalClient, Row};
use crate::filters::SystemDatabases;
use crate::utils::{quote_ident, quote_literal};
use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// List all user databases, skipping the configured system databases
pub async fn list_databases<C>(client: &mut C, system: &SystemDatabases) -> Result<Vec<String>>
where
    C: RelationalClient + ?Sized,
{
    let rows = client
        .query(None, "SHOW DATABASES")
        .await
        .context("Failed to list databases")?;

    let databases: Vec<String> = rows
        .into_iter()
        .filter_map(first_column)
        .filter(|db| !system.contains(db))
        .collect();

    tracing::debug!("Found {} user database(s)", databases.len());

    Ok(databases)
}

/// List all tables (and views) of `db_name`
pub async fn list_tables<C>(client: &mut C, db_name: &str) -> Result<Vec<String>>
where
    C: RelationalClient + ?Sized,
{
    let sql = format!("SHOW TABLES FROM {}", quote_ident(db_name));
    let rows = client
        .query(None, &sql)
        .await
        .with_context(|| format!("Failed to list tables from database '{}'", db_name))?;

    let tables: Vec<String> = rows.into_iter().filter_map(first_column).collect();

    tracing::debug!("Found {} table(s) in database '{}'", tables.len(), db_name);

    Ok(tables)
}

/// Read the `CREATE` statement of one table
///
/// Returns the table name as reported by the server together with its DDL.
pub async fn show_create_table<C>(
    client: &mut C,
    db_name: &str,
    table_name: &str,
) -> Result<(String, String)>
where
    C: RelationalClient + ?Sized,
{
    let sql = format!(
        "SHOW CREATE TABLE {}.{}",
        quote_ident(db_name),
        quote_ident(table_name)
    );
    let rows = client
        .query(None, &sql)
        .await
        .with_context(|| format!("Failed to execute SQL: {}", sql))?;

    let row = rows.into_iter().next().ok_or_else(|| {
        anyhow!(
            "SHOW CREATE TABLE returned no rows for '{}.{}'",
            db_name,
            table_name
        )
    })?;

    // Tables yield (name, ddl); views append charset and collation columns.
    let mut columns = row.into_iter();
    let name = columns
        .next()
        .flatten()
        .unwrap_or_else(|| table_name.to_string());
    let ddl = columns.next().flatten().ok_or_else(|| {
        anyhow!(
            "SHOW CREATE TABLE returned no DDL for '{}.{}'",
            db_name,
            table_name
        )
    })?;

    Ok((name, ddl))
}

pub fn create_database_sql(db_name: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", quote_ident(db_name))
}

pub fn load_stats_sql(path: &Path) -> String {
    format!("LOAD STATS {}", quote_literal(&path.to_string_lossy()))
}

fn first_column(row: Row) -> Option<String> {
    row.into_iter().next().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_create_database_sql() {
        assert_eq!(
            create_database_sql("shop"),
            "CREATE DATABASE IF NOT EXISTS `shop`"
        );
        assert_eq!(
            create_database_sql("we`ird"),
            "CREATE DATABASE IF NOT EXISTS `we``ird`"
        );
    }

    #[test]
    fn test_load_stats_sql_quotes_path() {
        let path = PathBuf::from("/tmp/snap/stats-shop-orders.json");
        assert_eq!(
            load_stats_sql(&path),
            "LOAD STATS '/tmp/snap/stats-shop-orders.json'"
        );
    }

    #[test]
    fn test_first_column_skips_null() {
        assert_eq!(first_column(vec![Some("a".into()), None]), Some("a".into()));
        assert_eq!(first_column(vec![None]), None);
        assert_eq!(first_column(Vec::new()), None);
    }
}
