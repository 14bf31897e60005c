// ABOUTME: Utility functions for SQL quoting, tool discovery and temp directories
// ABOUTME: Provides identifier escaping and managed directories that survive SIGKILL cleanup

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use which::which;

/// Quote a MySQL identifier with backticks
///
/// Embedded backticks are doubled, so any table or database name can be used
/// verbatim in generated statements.
///
/// # Examples
///
/// ```
/// # use tidb_snapshot_transport::utils::quote_ident;
/// assert_eq!(quote_ident("orders"), "`orders`");
/// assert_eq!(quote_ident("we`ird"), "`we``ird`");
/// ```
pub fn quote_ident(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Quote a MySQL string literal with single quotes
///
/// Backslashes and single quotes are escaped.
///
/// # Examples
///
/// ```
/// # use tidb_snapshot_transport::utils::quote_literal;
/// assert_eq!(quote_literal("/tmp/stats-db-t.json"), "'/tmp/stats-db-t.json'");
/// assert_eq!(quote_literal("it's"), "'it\\'s'");
/// ```
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// Sanitize an identifier (table name, database name, etc.) for display
///
/// Removes control characters and limits length to prevent log injection attacks
/// and ensure readable error messages.
///
/// # Examples
///
/// ```
/// # use tidb_snapshot_transport::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// assert_eq!(sanitize_identifier(&"a".repeat(200)).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Locate an executable on `PATH`
///
/// # Errors
///
/// Returns an error with installation instructions if the tool is missing.
pub fn find_tool(tool: &str) -> Result<PathBuf> {
    which(tool).with_context(|| {
        format!(
            "Required tool '{}' was not found on PATH.\n\
             \n\
             Install TiUP with:\n\
             curl --proto '=https' --tlsv1.2 -sSf https://tiup-mirrors.pingcap.com/install.sh | sh",
            tool
        )
    })
}

/// Default snapshot directory for runs that do not name one
///
/// Directory naming format: `{temp}/plan-change-capturer/{unix-seconds}`
pub fn default_snapshot_dir() -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    std::env::temp_dir()
        .join("plan-change-capturer")
        .join(timestamp.to_string())
}

/// Create a managed temporary directory with explicit cleanup support
///
/// Creates a directory named `{prefix}{timestamp}-{random}` under the system temp
/// directory. Unlike `TempDir`, which relies on `Drop`, these directories can be
/// found and removed on a later startup if the process was killed with SIGKILL.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn create_managed_temp_dir(prefix: &str) -> Result<PathBuf> {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let random: u32 = rand::random();

    let temp_path = std::env::temp_dir().join(format!("{}{}-{:08x}", prefix, timestamp, random));

    std::fs::create_dir_all(&temp_path)
        .with_context(|| format!("Failed to create temp directory at {}", temp_path.display()))?;

    tracing::debug!("Created managed temp directory: {}", temp_path.display());

    Ok(temp_path)
}

/// Clean up stale temporary directories from previous runs
///
/// Removes directories under the system temp directory whose name starts with
/// `prefix` and whose modification time is older than `max_age_secs`.
///
/// # Returns
///
/// Returns the number of directories cleaned up.
///
/// # Errors
///
/// Returns an error if the system temp directory cannot be read. Individual
/// directory removal errors are logged but don't fail the entire operation.
pub fn cleanup_stale_temp_dirs(prefix: &str, max_age_secs: u64) -> Result<usize> {
    let system_temp = std::env::temp_dir();
    let now = SystemTime::now();
    let mut cleaned_count = 0;

    let entries = std::fs::read_dir(&system_temp).with_context(|| {
        format!(
            "Failed to read system temp directory: {}",
            system_temp.display()
        )
    })?;

    for entry in entries.flatten() {
        let path = entry.path();

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) || !path.is_dir() {
            continue;
        }

        let age = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => now.duration_since(modified).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(
                    "Failed to get metadata for temp directory {}: {}",
                    path.display(),
                    e
                );
                continue;
            }
        };

        if age.as_secs() <= max_age_secs {
            continue;
        }

        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::info!(
                    "Cleaned up stale temp directory: {} (age: {}s)",
                    path.display(),
                    age.as_secs()
                );
                cleaned_count += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to remove stale temp directory {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }

    if cleaned_count > 0 {
        tracing::info!(
            "Cleaned up {} stale temp directory(ies) older than {} seconds",
            cleaned_count,
            max_age_secs
        );
    }

    Ok(cleaned_count)
}

/// Remove a managed temporary directory
///
/// Refuses to touch anything whose name does not start with `prefix`. A
/// directory that is already gone is not an error.
pub fn remove_managed_temp_dir(prefix: &str, path: &Path) -> Result<()> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.starts_with(prefix) => {}
        Some(_) => bail!(
            "Refusing to remove directory that doesn't match our naming pattern: {}",
            path.display()
        ),
        None => bail!("Invalid temp directory path: {}", path.display()),
    }

    if !path.exists() {
        return Ok(());
    }

    tracing::debug!("Removing managed temp directory: {}", path.display());

    std::fs::remove_dir_all(path)
        .with_context(|| format!("Failed to remove temp directory at {}", path.display()))?;

    Ok(())
}
