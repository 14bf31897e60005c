// ABOUTME: Exports table DDL into per-database schema artifacts and replays them
// ABOUTME: Export is all-or-nothing per database; import stops at the first failing statement

use crate::client::RelationalClient;
use crate::error::TransportError;
use crate::mysql::reader;
use crate::snapshot::Artifact;
use anyhow::{Context, Result};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Table name → `CREATE` statement of one database
pub type DdlArtifact = BTreeMap<String, String>;

/// How stored statements are replayed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DdlMode {
    /// `CREATE TABLE` becomes `CREATE TABLE IF NOT EXISTS`, so re-imports succeed
    #[default]
    IfNotExists,
    /// Statements run exactly as stored
    Verbatim,
}

/// Capture the DDL of `tables` in `database` and write its schema artifact
///
/// Any failing table aborts the whole database: no artifact is written.
pub async fn export_schema<C>(
    client: &mut C,
    database: &str,
    tables: &[String],
    dir: &Path,
) -> Result<PathBuf>
where
    C: RelationalClient + ?Sized,
{
    let result = async {
        let artifact = Artifact::schema(database)?;

        let mut schemas = DdlArtifact::new();
        for table in tables {
            let (name, ddl) = reader::show_create_table(client, database, table).await?;
            schemas.insert(name, ddl);
        }

        let path = artifact.path_in(dir);
        write_ddl_artifact(&path, &schemas)?;
        Ok::<_, anyhow::Error>((path, schemas.len()))
    }
    .await
    .context(TransportError::SchemaExport {
        database: database.to_string(),
    })?;

    let (path, count) = result;
    tracing::info!(
        "✓ Exported {} table schema(s) of {}/{} into {}",
        count,
        client.endpoint(),
        database,
        path.display()
    );
    Ok(path)
}

/// Create `database` on the target and replay its schema artifact
pub async fn import_schema<C>(
    client: &mut C,
    database: &str,
    dir: &Path,
    mode: DdlMode,
) -> Result<usize>
where
    C: RelationalClient + ?Sized,
{
    let path = Artifact::schema(database)
        .context(TransportError::SchemaImport {
            database: database.to_string(),
            path: dir.to_path_buf(),
        })?
        .path_in(dir);
    let failure = || TransportError::SchemaImport {
        database: database.to_string(),
        path: path.clone(),
    };

    let schemas = read_ddl_artifact(&path).with_context(failure)?;

    client
        .exec(None, &reader::create_database_sql(database))
        .await
        .with_context(|| format!("Failed to create database '{}'", database))
        .with_context(failure)?;

    for (table, ddl) in &schemas {
        let statement = prepare_statement(ddl, mode);
        client
            .exec(Some(database), &statement)
            .await
            .with_context(|| format!("Failed to create table '{}'", table))
            .with_context(failure)?;
    }

    tracing::info!(
        "✓ Imported {} table schema(s) from {} into {}/{}",
        schemas.len(),
        path.display(),
        client.endpoint(),
        database
    );
    Ok(schemas.len())
}

/// Write the artifact atomically, pretty-printed with tabs
pub fn write_ddl_artifact(path: &Path, schemas: &DdlArtifact) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;

    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(tmp.as_file_mut(), formatter);
    schemas
        .serialize(&mut serializer)
        .with_context(|| format!("Failed to serialize schemas for {}", path.display()))?;
    tmp.as_file_mut()
        .write_all(b"\n")
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tmp.persist(path)
        .with_context(|| format!("Failed to persist {}", path.display()))?;
    Ok(())
}

pub fn read_ddl_artifact(path: &Path) -> Result<DdlArtifact> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse schema file {}", path.display()))
}

/// Trim a stored statement and apply the replay mode
pub fn prepare_statement(ddl: &str, mode: DdlMode) -> Cow<'_, str> {
    let trimmed = ddl.trim();
    if mode == DdlMode::Verbatim {
        return Cow::Borrowed(trimmed);
    }

    const CREATE_TABLE: &str = "CREATE TABLE";
    const IF_NOT_EXISTS: &str = "IF NOT EXISTS";

    let Some(head) = trimmed.get(..CREATE_TABLE.len()) else {
        return Cow::Borrowed(trimmed);
    };
    let rest = &trimmed[CREATE_TABLE.len()..];
    if !head.eq_ignore_ascii_case(CREATE_TABLE) || !rest.starts_with(char::is_whitespace) {
        return Cow::Borrowed(trimmed);
    }

    let rest = rest.trim_start();
    let already = rest
        .get(..IF_NOT_EXISTS.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(IF_NOT_EXISTS));
    if already {
        return Cow::Borrowed(trimmed);
    }

    Cow::Owned(format!("{} {} {}", CREATE_TABLE, IF_NOT_EXISTS, rest))
}
