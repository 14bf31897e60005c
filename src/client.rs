// ABOUTME: Capabilities consumed by the transports: SQL execution and diagnostic fetches
// ABOUTME: Implemented for real clusters by the mysql and diagnostic modules

use crate::endpoint::Endpoint;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWrite;

/// A result row; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// Executes SQL against one cluster.
///
/// The database a statement runs in is passed with every call instead of being
/// left as session state.
#[async_trait]
pub trait RelationalClient: Send {
    fn endpoint(&self) -> &Endpoint;

    async fn query(&mut self, database: Option<&str>, sql: &str) -> Result<Vec<Row>>;

    async fn exec(&mut self, database: Option<&str>, sql: &str) -> Result<()>;

    /// Allow the server to read `path` through a LOCAL INFILE request.
    async fn register_local_file(&mut self, path: &Path) -> Result<()>;
}

/// Fetches statistics dumps from a cluster's diagnostic endpoint.
#[async_trait]
pub trait DiagnosticClient: Send + Sync {
    /// Stream the statistics dump of `database.table` into `sink` and return
    /// the number of bytes written. The payload is opaque.
    async fn dump_stats(
        &self,
        database: &str,
        table: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;
}
