// ABOUTME: Error kinds surfaced by snapshot export, import, and instance provisioning
// ABOUTME: Attached to anyhow chains as context so callers can classify failures

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Classifies a failure of a transport run.
///
/// Every variant is attached to an `anyhow::Error` with `.context(...)`, so the
/// underlying cause stays in the chain and the kind can be recovered with
/// `err.downcast_ref::<TransportError>()`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}")]
    Connection { endpoint: String },

    #[error("Failed to provision TiDB {version}: {reason}")]
    Provision { version: String, reason: String },

    #[error("TiDB {version} did not become ready on status port {status_port} within {waited:?}")]
    ReadinessTimeout {
        version: String,
        status_port: u16,
        waited: Duration,
    },

    #[error("Failed to export schemas of database '{database}'")]
    SchemaExport { database: String },

    #[error("Failed to export statistics of table '{database}.{table}'")]
    StatsExport { database: String, table: String },

    #[error("Failed to import schemas of database '{database}' from {}", path.display())]
    SchemaImport { database: String, path: PathBuf },

    #[error("Failed to import statistics of database '{database}' from {}", path.display())]
    StatsImport { database: String, path: PathBuf },
}

/// Returns the transport kind attached anywhere in an error chain.
pub fn kind_of(err: &anyhow::Error) -> Option<&TransportError> {
    err.downcast_ref::<TransportError>()
}
