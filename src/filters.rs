// ABOUTME: Central filtering logic shared by schema and statistics transport
// ABOUTME: Handles table include/ignore lists and the system database set

use std::collections::BTreeSet;

/// Table allow-list and ignore-list, compared case-insensitively
///
/// A table passes when it is not ignored and, if an allow-list is present,
/// appears in it. The ignore-list always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFilter {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl TableFilter {
    pub fn new<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            include: fold_all(include),
            exclude: fold_all(exclude),
        }
    }

    /// Creates an empty filter (transport everything)
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn include(&self) -> &BTreeSet<String> {
        &self.include
    }

    pub fn exclude(&self) -> &BTreeSet<String> {
        &self.exclude
    }

    /// Determines if a table should be transported
    pub fn passes(&self, table: &str) -> bool {
        let folded = table.to_lowercase();
        if self.exclude.contains(&folded) {
            return false;
        }
        self.include.is_empty() || self.include.contains(&folded)
    }

    /// Keeps the tables that pass, preserving their order and original case
    pub fn apply<'a, I>(&self, tables: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        tables
            .into_iter()
            .filter(|table| {
                let keep = self.passes(table);
                if !keep {
                    tracing::debug!("Ignoring table '{}'", table);
                }
                keep
            })
            .cloned()
            .collect()
    }
}

/// Built-in databases skipped when enumerating a cluster's databases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemDatabases(BTreeSet<String>);

impl SystemDatabases {
    pub const DEFAULTS: [&'static str; 4] = [
        "INFORMATION_SCHEMA",
        "METRICS_SCHEMA",
        "PERFORMANCE_SCHEMA",
        "mysql",
    ];

    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(fold_all(names))
    }

    pub fn contains(&self, database: &str) -> bool {
        self.0.contains(&database.to_lowercase())
    }
}

impl Default for SystemDatabases {
    fn default() -> Self {
        Self::new(Self::DEFAULTS)
    }
}

fn fold_all<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}
