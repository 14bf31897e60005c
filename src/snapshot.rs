// ABOUTME: On-disk naming contract for schema and statistics artifacts
// ABOUTME: Encodes (kind, database, table) into file names and recovers them from a directory

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Separator between the fields of an artifact file name
pub const SEPARATOR: char = '-';

const SCHEMA_PREFIX: &str = "schema-";
const SCHEMA_SUFFIX: &str = ".sql";
const STATS_PREFIX: &str = "stats-";
const STATS_SUFFIX: &str = ".json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    /// All table DDL of one database
    Schema,
    /// The statistics dump of one table
    Stats,
}

impl ArtifactKind {
    fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Schema => SCHEMA_PREFIX,
            ArtifactKind::Stats => STATS_PREFIX,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::Schema => SCHEMA_SUFFIX,
            ArtifactKind::Stats => STATS_SUFFIX,
        }
    }

    fn field_count(self) -> usize {
        match self {
            ArtifactKind::Schema => 1,
            ArtifactKind::Stats => 2,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Schema => f.write_str("schema"),
            ArtifactKind::Stats => f.write_str("stats"),
        }
    }
}

/// Identity of one artifact file.
///
/// Names are case-folded to lower case, so the same artifact is addressed no
/// matter how the database or table was spelled on the command line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Artifact {
    kind: ArtifactKind,
    database: String,
    table: Option<String>,
}

impl Artifact {
    pub fn schema(database: &str) -> Result<Self> {
        Ok(Self {
            kind: ArtifactKind::Schema,
            database: encodable(database, "database")?,
            table: None,
        })
    }

    pub fn stats(database: &str, table: &str) -> Result<Self> {
        Ok(Self {
            kind: ArtifactKind::Stats,
            database: encodable(database, "database")?,
            table: Some(encodable(table, "table")?),
        })
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn file_name(&self) -> String {
        let mut name = String::from(self.kind.prefix());
        name.push_str(&self.database);
        if let Some(table) = &self.table {
            name.push(SEPARATOR);
            name.push_str(table);
        }
        name.push_str(self.kind.suffix());
        name
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Recover an artifact from a file name
    ///
    /// Returns `None` for names that carry neither prefix/suffix pair, or whose
    /// body does not split into the kind's number of non-empty fields.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (kind, body) = [ArtifactKind::Schema, ArtifactKind::Stats]
            .into_iter()
            .find_map(|kind| {
                file_name
                    .strip_prefix(kind.prefix())
                    .and_then(|rest| rest.strip_suffix(kind.suffix()))
                    .map(|body| (kind, body))
            })?;

        let fields: Vec<&str> = body.split(SEPARATOR).collect();
        if fields.len() != kind.field_count() {
            return None;
        }

        let mut folded = Vec::with_capacity(fields.len());
        for field in fields {
            folded.push(encodable(field, "field").ok()?);
        }

        let mut fields = folded.into_iter();
        let database = fields.next()?;
        Some(Self {
            kind,
            database,
            table: fields.next(),
        })
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{} artifact {}.{}", self.kind, self.database, table),
            None => write!(f, "{} artifact {}", self.kind, self.database),
        }
    }
}

/// Validate and case-fold one name for use inside a file name
fn encodable(name: &str, label: &str) -> Result<String> {
    if name.is_empty() {
        bail!("{} name cannot be empty", label);
    }
    if name == "." || name == ".." {
        bail!("{} name '{}' is not a valid file name component", label, name);
    }
    if let Some(bad) = name
        .chars()
        .find(|c| *c == SEPARATOR || *c == '/' || *c == '\\' || c.is_control())
    {
        bail!(
            "{} name '{}' contains '{}', which cannot be encoded in an artifact file name",
            label,
            crate::utils::sanitize_identifier(name),
            bad.escape_default()
        );
    }
    Ok(name.to_lowercase())
}

/// Artifacts found for one database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseArtifacts {
    pub schema: Option<PathBuf>,
    pub stats: BTreeMap<String, PathBuf>,
}

/// Every artifact in a snapshot directory, recovered from file names alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotIndex {
    databases: BTreeMap<String, DatabaseArtifacts>,
}

impl SnapshotIndex {
    /// Scan the top level of `dir`; subdirectories and unrelated files are skipped.
    pub fn scan(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read snapshot directory {}", dir.display()))?;

        let mut index = Self::default();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("Failed to read snapshot directory {}", dir.display()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match Artifact::parse(name) {
                Some(artifact) => index.insert(artifact, path),
                None => tracing::debug!("Skipping unrelated file {}", path.display()),
            }
        }

        Ok(index)
    }

    fn insert(&mut self, artifact: Artifact, path: PathBuf) {
        let entry = self.databases.entry(artifact.database).or_default();
        match artifact.table {
            None => entry.schema = Some(path),
            Some(table) => {
                entry.stats.insert(table, path);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    /// Databases that have a schema artifact
    pub fn schema_databases(&self) -> Vec<String> {
        self.databases
            .iter()
            .filter(|(_, artifacts)| artifacts.schema.is_some())
            .map(|(db, _)| db.clone())
            .collect()
    }

    pub fn get(&self, database: &str) -> Option<&DatabaseArtifacts> {
        self.databases.get(&database.to_lowercase())
    }

    /// Tables of `database` that have a statistics artifact
    pub fn tables(&self, database: &str) -> Vec<String> {
        self.get(database)
            .map(|artifacts| artifacts.stats.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Statistics artifact paths of `database`, ordered by table
    pub fn stats_artifacts(&self, database: &str) -> Vec<PathBuf> {
        self.get(database)
            .map(|artifacts| artifacts.stats.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_file_names() {
        assert_eq!(Artifact::schema("test").unwrap().file_name(), "schema-test.sql");
        assert_eq!(
            Artifact::stats("test", "t1").unwrap().file_name(),
            "stats-test-t1.json"
        );
    }

    #[test]
    fn test_names_are_case_folded() {
        let artifact = Artifact::stats("Sales", "Orders").unwrap();
        assert_eq!(artifact.file_name(), "stats-sales-orders.json");

        let parsed = Artifact::parse("STATS-Sales-Orders.json");
        assert!(parsed.is_none(), "prefix is matched exactly");

        let parsed = Artifact::parse("stats-Sales-Orders.json").unwrap();
        assert_eq!(parsed, artifact);
    }

    #[test]
    fn test_encode_rejects_reserved_characters() {
        assert!(Artifact::schema("").is_err());
        assert!(Artifact::schema("my-db").is_err());
        assert!(Artifact::stats("db", "a/b").is_err());
        assert!(Artifact::stats("db", "a\\b").is_err());
        assert!(Artifact::stats("db", "..").is_err());
        assert!(Artifact::stats("db", "t\n").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_field_counts() {
        assert!(Artifact::parse("schema-db-t1.sql").is_none());
        assert!(Artifact::parse("stats-db.json").is_none());
        assert!(Artifact::parse("stats-db-t1-extra.json").is_none());
        assert!(Artifact::parse("stats--t1.json").is_none());
        assert!(Artifact::parse("schema-.sql").is_none());
    }

    #[test]
    fn test_parse_rejects_unrelated_names() {
        for name in [
            "README.md",
            "schema-db.json",
            "stats-db-t1.sql",
            "backup-db.sql",
            "stats-db-t1.json.bak",
            ".stats-db-t1.partial",
        ] {
            assert!(Artifact::parse(name).is_none(), "{} should be skipped", name);
        }
    }

    #[test]
    fn test_scan_skips_unrelated_files() {
        let dir = tempdir().unwrap();
        for name in [
            "schema-shop.sql",
            "stats-shop-orders.json",
            "stats-shop-users.json",
            "stats-crm-leads.json",
            "notes.txt",
            "schema-bad-name.sql",
            "stats-shop.json",
        ] {
            fs::write(dir.path().join(name), b"{}").unwrap();
        }
        fs::create_dir(dir.path().join("schema-nested.sql")).unwrap();

        let index = SnapshotIndex::scan(dir.path()).unwrap();

        assert_eq!(index.databases().collect::<Vec<_>>(), vec!["crm", "shop"]);
        assert_eq!(index.schema_databases(), vec!["shop".to_string()]);
        assert_eq!(index.tables("shop"), vec!["orders", "users"]);
        assert_eq!(index.tables("SHOP"), vec!["orders", "users"]);
        assert_eq!(index.tables("crm"), vec!["leads"]);
        assert!(index.get("crm").unwrap().schema.is_none());
        assert_eq!(
            index.stats_artifacts("shop"),
            vec![
                dir.path().join("stats-shop-orders.json"),
                dir.path().join("stats-shop-users.json"),
            ]
        );
        assert!(index.tables("missing").is_empty());
    }

    #[test]
    fn test_scan_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = SnapshotIndex::scan(&missing).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    proptest! {
        #[test]
        fn prop_stats_round_trip(
            database in "[a-z0-9_$.]{1,20}",
            table in "[a-z0-9_$.]{1,20}",
        ) {
            prop_assume!(database != "." && database != "..");
            prop_assume!(table != "." && table != "..");
            let artifact = Artifact::stats(&database, &table).unwrap();
            let parsed = Artifact::parse(&artifact.file_name()).unwrap();
            prop_assert_eq!(parsed.kind(), ArtifactKind::Stats);
            prop_assert_eq!(parsed.database(), database.as_str());
            prop_assert_eq!(parsed.table(), Some(table.as_str()));
        }

        #[test]
        fn prop_schema_round_trip(database in "[a-z0-9_$.]{1,20}") {
            prop_assume!(database != "." && database != "..");
            let artifact = Artifact::schema(&database).unwrap();
            let parsed = Artifact::parse(&artifact.file_name()).unwrap();
            prop_assert_eq!(parsed, artifact);
        }
    }
}
