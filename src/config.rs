// ABOUTME: Parses transport configuration files and merges command-line overrides
// ABOUTME: Converts TOML settings into endpoint specs, filters and instance options

use crate::endpoint::{
    Endpoint, EndpointSpec, DEFAULT_PORT, DEFAULT_STATUS_PORT, DEFAULT_USER,
};
use crate::filters::{SystemDatabases, TableFilter};
use crate::instance::{locator::ServerLocator, InstanceManager, DEFAULT_READINESS_TIMEOUT};
use crate::transport::{DdlMode, TransportPlan};
use crate::utils;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    #[serde(default)]
    pub source: EndpointConfig,
    #[serde(default)]
    pub destination: EndpointConfig,
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub ignore_tables: Vec<String>,
    pub system_databases: Option<Vec<String>>,
    #[serde(default)]
    pub verbatim_ddl: bool,
    #[serde(default)]
    pub instance: InstanceConfig,
}

/// One side of the run; every field may come from the file or the command line
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub status_port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub tiup_home: Option<PathBuf>,
    pub readiness_timeout_secs: Option<u64>,
    #[serde(default)]
    pub auto_install: bool,
}

pub fn load_config_from_file(path: &Path) -> Result<TransportConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("Failed to parse TOML config at {}", path.display()))
}

impl EndpointConfig {
    /// Fields set in `overrides` replace ours
    pub fn merge(self, overrides: EndpointConfig) -> Self {
        Self {
            host: overrides.host.or(self.host),
            port: overrides.port.or(self.port),
            status_port: overrides.status_port.or(self.status_port),
            user: overrides.user.or(self.user),
            password: overrides.password.or(self.password),
            version: overrides.version.or(self.version),
        }
    }

    /// A host means a remote cluster, a bare version an ephemeral instance,
    /// neither means this side is not configured.
    pub fn to_spec(&self) -> Result<Option<EndpointSpec>> {
        let host = self.host.as_deref().map(str::trim).filter(|h| !h.is_empty());
        let version = self
            .version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match (host, version) {
            (Some(host), _) => {
                let mut endpoint = Endpoint::new(
                    host,
                    self.port.unwrap_or(DEFAULT_PORT),
                    self.status_port.unwrap_or(DEFAULT_STATUS_PORT),
                )
                .with_credentials(
                    self.user.clone().unwrap_or_else(|| DEFAULT_USER.to_string()),
                    self.password.clone().unwrap_or_default(),
                );
                if let Some(version) = version {
                    endpoint = endpoint.with_version(version);
                }
                Ok(Some(EndpointSpec::Remote(endpoint)))
            }
            (None, Some(version)) => {
                if self.port.is_some() || self.status_port.is_some() {
                    bail!(
                        "Ports cannot be set for an ephemeral TiDB {} instance; they are allocated automatically",
                        version
                    );
                }
                Ok(Some(EndpointSpec::Ephemeral {
                    version: version.to_string(),
                }))
            }
            (None, None) => Ok(None),
        }
    }
}

impl TransportConfig {
    /// Fields set in `overrides` replace ours; list fields replace when non-empty
    pub fn merge(self, overrides: TransportConfig) -> Self {
        Self {
            source: self.source.merge(overrides.source),
            destination: self.destination.merge(overrides.destination),
            dir: overrides.dir.or(self.dir),
            databases: pick_list(overrides.databases, self.databases),
            tables: pick_list(overrides.tables, self.tables),
            ignore_tables: pick_list(overrides.ignore_tables, self.ignore_tables),
            system_databases: overrides.system_databases.or(self.system_databases),
            verbatim_ddl: overrides.verbatim_ddl || self.verbatim_ddl,
            instance: InstanceConfig {
                tiup_home: overrides.instance.tiup_home.or(self.instance.tiup_home),
                readiness_timeout_secs: overrides
                    .instance
                    .readiness_timeout_secs
                    .or(self.instance.readiness_timeout_secs),
                auto_install: overrides.instance.auto_install || self.instance.auto_install,
            },
        }
    }

    pub fn to_plan(&self) -> Result<TransportPlan> {
        let source = self.source.to_spec().context("Invalid source settings")?;
        let destination = self
            .destination
            .to_spec()
            .context("Invalid destination settings")?;

        if source.is_none() && destination.is_none() {
            bail!(
                "Nothing to do: configure a source (--src-addr or --src-version) \
                 and/or a destination (--dst-addr or --dst-version)"
            );
        }

        let system_databases = match &self.system_databases {
            Some(names) => SystemDatabases::new(names),
            None => SystemDatabases::default(),
        };

        Ok(TransportPlan {
            source,
            destination,
            dir: self.dir.clone().unwrap_or_else(utils::default_snapshot_dir),
            databases: clean_names(&self.databases),
            filter: TableFilter::new(&self.tables, &self.ignore_tables),
            system_databases,
            ddl_mode: if self.verbatim_ddl {
                DdlMode::Verbatim
            } else {
                DdlMode::IfNotExists
            },
        })
    }

    pub fn instance_manager(&self) -> InstanceManager {
        let tiup_home = self
            .instance
            .tiup_home
            .clone()
            .unwrap_or_else(ServerLocator::default_tiup_home);
        let timeout = self
            .instance
            .readiness_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_READINESS_TIMEOUT);
        InstanceManager::new(
            ServerLocator::new(tiup_home, self.instance.auto_install),
            timeout,
        )
    }
}

fn pick_list(overrides: Vec<String>, base: Vec<String>) -> Vec<String> {
    if overrides.is_empty() {
        base
    } else {
        overrides
    }
}

fn clean_names(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}
