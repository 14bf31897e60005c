// ABOUTME: MySQL-protocol client for TiDB clusters built on mysql_async
// ABOUTME: Implements RelationalClient with explicit per-call databases and LOCAL INFILE whitelisting

pub mod reader;

use crate::client::{RelationalClient, Row};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::utils::quote_ident;
use anyhow::{Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Value, WhiteListFsHandler};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Database a fresh session starts in
const DEFAULT_DATABASE: &str = "mysql";

/// A live session against one cluster
pub struct MysqlClient {
    endpoint: Endpoint,
    conn: Conn,
    current_database: Option<String>,
    local_files: BTreeSet<PathBuf>,
    handler_stale: bool,
}

/// Connect to a TiDB (or any MySQL-protocol) endpoint
///
/// Opens a session in the `mysql` database and verifies it with a ping.
///
/// # Errors
///
/// Returns an error tagged with [`TransportError::Connection`] if the server
/// cannot be reached or rejects the credentials.
///
/// # Examples
///
/// ```no_run
/// # use tidb_snapshot_transport::endpoint::Endpoint;
/// # use tidb_snapshot_transport::mysql::connect_mysql;
/// # async fn example() -> anyhow::Result<()> {
/// let endpoint = Endpoint::new("127.0.0.1", 4000, 10080);
/// let client = connect_mysql(&endpoint).await?;
/// # Ok(())
/// # }
/// ```
pub async fn connect_mysql(endpoint: &Endpoint) -> Result<MysqlClient> {
    tracing::info!("Connecting to {}", endpoint);

    let conn = open_session(endpoint, &BTreeSet::new())
        .await
        .context(TransportError::Connection {
            endpoint: endpoint.to_string(),
        })?;

    tracing::debug!("Successfully connected to {}", endpoint);

    Ok(MysqlClient {
        endpoint: endpoint.clone(),
        conn,
        current_database: None,
        local_files: BTreeSet::new(),
        handler_stale: false,
    })
}

fn build_opts(endpoint: &Endpoint, local_files: &BTreeSet<PathBuf>) -> Opts {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(endpoint.host.clone())
        .tcp_port(endpoint.port)
        .user(Some(endpoint.user.clone()))
        .db_name(Some(DEFAULT_DATABASE));

    if !endpoint.password.is_empty() {
        builder = builder.pass(Some(endpoint.password.clone()));
    }

    if !local_files.is_empty() {
        builder = builder.local_infile_handler(Some(WhiteListFsHandler::new(
            local_files.iter().cloned(),
        )));
    }

    Opts::from(builder)
}

async fn open_session(endpoint: &Endpoint, local_files: &BTreeSet<PathBuf>) -> Result<Conn> {
    let mut conn = Conn::new(build_opts(endpoint, local_files))
        .await
        .context("Failed to create MySQL connection")?;
    conn.ping()
        .await
        .context("Failed to verify MySQL connection")?;
    Ok(conn)
}

impl MysqlClient {
    /// Close the session
    pub async fn disconnect(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .with_context(|| format!("Failed to disconnect from {}", self.endpoint))
    }

    /// Prepare the session for a statement in `database`
    ///
    /// Reconnects first when new local files were registered, since the
    /// LOCAL INFILE whitelist is fixed per connection.
    async fn session(&mut self, database: Option<&str>) -> Result<&mut Conn> {
        if self.handler_stale {
            tracing::debug!(
                "Reconnecting to {} with {} whitelisted local file(s)",
                self.endpoint,
                self.local_files.len()
            );
            let fresh = open_session(&self.endpoint, &self.local_files)
                .await
                .context(TransportError::Connection {
                    endpoint: self.endpoint.to_string(),
                })?;
            let stale = std::mem::replace(&mut self.conn, fresh);
            if let Err(e) = stale.disconnect().await {
                tracing::debug!("Ignoring error while closing old session: {}", e);
            }
            self.current_database = None;
            self.handler_stale = false;
        }

        if let Some(db) = database {
            if self.current_database.as_deref() != Some(db) {
                self.conn
                    .query_drop(format!("USE {}", quote_ident(db)))
                    .await
                    .with_context(|| format!("Failed to switch to database '{}'", db))?;
                self.current_database = Some(db.to_string());
            }
        }

        Ok(&mut self.conn)
    }
}

#[async_trait]
impl RelationalClient for MysqlClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn query(&mut self, database: Option<&str>, sql: &str) -> Result<Vec<Row>> {
        let conn = self.session(database).await?;
        let rows: Vec<mysql_async::Row> = conn
            .query(sql)
            .await
            .with_context(|| format!("Failed to execute query: {}", sql))?;

        Ok(rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.as_ref(i).and_then(value_to_string))
                    .collect()
            })
            .collect())
    }

    async fn exec(&mut self, database: Option<&str>, sql: &str) -> Result<()> {
        let conn = self.session(database).await?;
        conn.query_drop(sql)
            .await
            .with_context(|| format!("Failed to execute statement: {}", sql))
    }

    async fn register_local_file(&mut self, path: &Path) -> Result<()> {
        if self.local_files.insert(path.to_path_buf()) {
            tracing::debug!("Registered local file {}", path.display());
            self.handler_stale = true;
        }
        Ok(())
    }
}

/// Render a text-protocol value; NULL becomes `None`
fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        other => Some(other.as_sql(true).trim_matches('\'').to_string()),
    }
}
