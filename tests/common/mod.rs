// ABOUTME: In-memory stand-ins for a TiDB cluster and its diagnostic endpoint
// ABOUTME: Understand just the statements the transports issue, with failure injection

#![allow(dead_code)]

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tidb_snapshot_transport::client::{DiagnosticClient, RelationalClient, Row};
use tidb_snapshot_transport::endpoint::Endpoint;
use tidb_snapshot_transport::error::TransportError;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A cluster whose catalog lives in maps
pub struct MemoryCluster {
    endpoint: Endpoint,
    /// database → table → DDL
    pub databases: BTreeMap<String, BTreeMap<String, String>>,
    pub registered: BTreeSet<PathBuf>,
    /// (database, path) of every successful LOAD STATS
    pub loaded_stats: Vec<(String, PathBuf)>,
    /// Statements containing any of these fragments fail
    pub fail_on: Vec<String>,
    /// Reconnecting after a local file registration fails
    pub drop_on_reconnect: bool,
    reconnect_pending: bool,
    pub executed: Vec<String>,
}

impl MemoryCluster {
    pub fn new(name: &str) -> Self {
        let mut databases = BTreeMap::new();
        for system in ["INFORMATION_SCHEMA", "METRICS_SCHEMA", "PERFORMANCE_SCHEMA", "mysql"] {
            databases.insert(system.to_string(), BTreeMap::new());
        }
        Self {
            endpoint: Endpoint::new(name, 4000, 10080),
            databases,
            registered: BTreeSet::new(),
            loaded_stats: Vec::new(),
            fail_on: Vec::new(),
            drop_on_reconnect: false,
            reconnect_pending: false,
            executed: Vec::new(),
        }
    }

    pub fn with_table(mut self, database: &str, table: &str) -> Self {
        let ddl = table_ddl(table);
        self.databases
            .entry(database.to_string())
            .or_default()
            .insert(table.to_string(), ddl);
        self
    }

    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_on.push(fragment.to_string());
        self
    }

    pub fn losing_connection_on_reconnect(mut self) -> Self {
        self.drop_on_reconnect = true;
        self
    }

    pub fn tables(&self, database: &str) -> Vec<String> {
        self.databases
            .get(database)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ddl(&self, database: &str, table: &str) -> Option<&str> {
        self.databases
            .get(database)
            .and_then(|tables| tables.get(table))
            .map(String::as_str)
    }

    fn check_session(&self) -> Result<()> {
        if self.reconnect_pending && self.drop_on_reconnect {
            return Err(anyhow!("Connection refused (os error 111)")).context(
                TransportError::Connection {
                    endpoint: self.endpoint.to_string(),
                },
            );
        }
        Ok(())
    }

    fn check_injected(&self, sql: &str) -> Result<()> {
        if let Some(fragment) = self.fail_on.iter().find(|f| sql.contains(f.as_str())) {
            bail!("injected failure on '{}'", fragment);
        }
        Ok(())
    }

    fn create_table(&mut self, database: Option<&str>, sql: &str) -> Result<()> {
        let database = database.ok_or_else(|| anyhow!("No database selected"))?;
        let rest = strip_prefix_ci(sql, "CREATE TABLE ").ok_or_else(|| anyhow!("bad DDL"))?;
        let (if_not_exists, rest) = match strip_prefix_ci(rest, "IF NOT EXISTS ") {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        let (table, _) = parse_ident(rest)?;

        let tables = self
            .databases
            .get_mut(database)
            .ok_or_else(|| anyhow!("Unknown database '{}'", database))?;
        if tables.contains_key(&table) {
            if if_not_exists {
                return Ok(());
            }
            bail!("Table '{}.{}' already exists", database, table);
        }
        tables.insert(table.clone(), table_ddl(&table));
        Ok(())
    }

    fn load_stats(&mut self, database: Option<&str>, sql: &str) -> Result<()> {
        let database = database.ok_or_else(|| anyhow!("No database selected"))?;
        let literal = sql
            .strip_prefix("LOAD STATS '")
            .and_then(|rest| rest.strip_suffix('\''))
            .ok_or_else(|| anyhow!("bad LOAD STATS statement"))?;
        let path = PathBuf::from(unescape_literal(literal));
        if !self.registered.contains(&path) {
            bail!("LOCAL INFILE request for unregistered file {}", path.display());
        }
        if !path.is_file() {
            bail!("Cannot read {}", path.display());
        }
        self.loaded_stats.push((database.to_string(), path));
        Ok(())
    }
}

/// The DDL a table with `name` reports
pub fn table_ddl(name: &str) -> String {
    format!(
        "CREATE TABLE `{}` (\n  `id` int(11) NOT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        name
    )
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn unescape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse one backtick-quoted identifier and return the remainder
fn parse_ident(s: &str) -> Result<(String, &str)> {
    let body = s
        .strip_prefix('`')
        .ok_or_else(|| anyhow!("expected quoted identifier in '{}'", s))?;
    let mut name = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '`' {
            if matches!(chars.peek(), Some((_, '`'))) {
                chars.next();
                name.push('`');
                continue;
            }
            return Ok((name, &body[i + 1..]));
        }
        name.push(c);
    }
    bail!("unterminated identifier in '{}'", s)
}

#[async_trait]
impl RelationalClient for MemoryCluster {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn query(&mut self, _database: Option<&str>, sql: &str) -> Result<Vec<Row>> {
        self.executed.push(sql.to_string());
        self.check_session()?;
        self.check_injected(sql)?;

        if sql == "SHOW DATABASES" {
            return Ok(self.databases.keys().map(|db| vec![Some(db.clone())]).collect());
        }
        if let Some(rest) = sql.strip_prefix("SHOW TABLES FROM ") {
            let (database, _) = parse_ident(rest)?;
            let tables = self
                .databases
                .get(&database)
                .ok_or_else(|| anyhow!("Unknown database '{}'", database))?;
            return Ok(tables.keys().map(|t| vec![Some(t.clone())]).collect());
        }
        if let Some(rest) = sql.strip_prefix("SHOW CREATE TABLE ") {
            let (database, rest) = parse_ident(rest)?;
            let rest = rest
                .strip_prefix('.')
                .ok_or_else(|| anyhow!("expected qualified table"))?;
            let (table, _) = parse_ident(rest)?;
            let ddl = self
                .ddl(&database, &table)
                .ok_or_else(|| anyhow!("Table '{}.{}' doesn't exist", database, table))?;
            return Ok(vec![vec![Some(table.clone()), Some(ddl.to_string())]]);
        }
        bail!("unsupported query: {}", sql)
    }

    async fn exec(&mut self, database: Option<&str>, sql: &str) -> Result<()> {
        self.executed.push(sql.to_string());
        self.check_session()?;
        self.check_injected(sql)?;

        if let Some(rest) = sql.strip_prefix("CREATE DATABASE IF NOT EXISTS ") {
            let (database, _) = parse_ident(rest)?;
            self.databases.entry(database).or_default();
            return Ok(());
        }
        if strip_prefix_ci(sql, "CREATE TABLE ").is_some() {
            return self.create_table(database, sql);
        }
        if sql.starts_with("LOAD STATS ") {
            return self.load_stats(database, sql);
        }
        bail!("unsupported statement: {}", sql)
    }

    async fn register_local_file(&mut self, path: &Path) -> Result<()> {
        if self.registered.insert(path.to_path_buf()) {
            self.reconnect_pending = true;
        }
        Ok(())
    }
}

/// A diagnostic endpoint that serves a small JSON document per table
#[derive(Default)]
pub struct FakeDiagnostic {
    pub failing_tables: BTreeSet<String>,
}

impl FakeDiagnostic {
    pub fn failing(tables: &[&str]) -> Self {
        Self {
            failing_tables: tables.iter().map(|t| t.to_string()).collect(),
        }
    }
}

pub fn stats_payload(database: &str, table: &str) -> String {
    format!(
        "{{\"database_name\":\"{}\",\"table_name\":\"{}\",\"columns\":{{}}}}",
        database, table
    )
}

#[async_trait]
impl DiagnosticClient for FakeDiagnostic {
    async fn dump_stats(
        &self,
        database: &str,
        table: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        if self.failing_tables.contains(table) {
            bail!("HTTP status server error (500 Internal Server Error)");
        }
        let payload = stats_payload(database, table);
        sink.write_all(payload.as_bytes()).await?;
        Ok(payload.len() as u64)
    }
}
