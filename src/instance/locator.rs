// ABOUTME: Resolves a TiDB version to an installed tidb-server binary
// ABOUTME: Looks inside the TiUP component store and optionally installs missing versions

use crate::error::TransportError;
use crate::utils;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

const SERVER_BINARY: &str = "tidb-server";

/// Finds `tidb-server` for a version under `{tiup_home}/components/tidb/{version}`
#[derive(Debug, Clone)]
pub struct ServerLocator {
    tiup_home: PathBuf,
    auto_install: bool,
}

impl ServerLocator {
    pub fn new(tiup_home: PathBuf, auto_install: bool) -> Self {
        Self {
            tiup_home,
            auto_install,
        }
    }

    /// `$TIUP_HOME`, falling back to `$HOME/.tiup`
    pub fn default_tiup_home() -> PathBuf {
        if let Some(home) = std::env::var_os("TIUP_HOME") {
            return PathBuf::from(home);
        }
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tiup")
    }

    pub fn tiup_home(&self) -> &Path {
        &self.tiup_home
    }

    pub fn binary_path(&self, version: &str) -> PathBuf {
        self.tiup_home
            .join("components")
            .join("tidb")
            .join(version)
            .join(SERVER_BINARY)
    }

    /// Resolve `version` to an executable
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::Provision`] when the version string is
    /// malformed or the version is not installed (and cannot be installed).
    pub async fn locate(&self, version: &str) -> Result<PathBuf> {
        validate_version(version)?;

        let binary = self.binary_path(version);
        if binary.is_file() {
            return Ok(binary);
        }

        if !self.auto_install {
            return Err(provision_error(
                version,
                format!(
                    "{} not found; install it with `tiup install tidb:{}`",
                    binary.display(),
                    version
                ),
            ));
        }

        self.install(version).await?;

        if binary.is_file() {
            Ok(binary)
        } else {
            Err(provision_error(
                version,
                format!("installation finished but {} is missing", binary.display()),
            ))
        }
    }

    async fn install(&self, version: &str) -> Result<()> {
        let tiup = utils::find_tool("tiup").context(TransportError::Provision {
            version: version.to_string(),
            reason: "tiup is not installed".to_string(),
        })?;

        tracing::info!("Installing TiDB {} with {}", version, tiup.display());

        let status = Command::new(&tiup)
            .arg("install")
            .arg(format!("tidb:{}", version))
            .env("TIUP_HOME", &self.tiup_home)
            .status()
            .await
            .context(TransportError::Provision {
                version: version.to_string(),
                reason: format!("failed to run {}", tiup.display()),
            })?;

        if !status.success() {
            return Err(provision_error(
                version,
                format!("`tiup install tidb:{}` exited with {}", version, status),
            ));
        }

        tracing::info!("✓ Installed TiDB {}", version);
        Ok(())
    }
}

impl Default for ServerLocator {
    fn default() -> Self {
        Self::new(Self::default_tiup_home(), false)
    }
}

/// Versions name a directory, so only a conservative character set is allowed.
pub fn validate_version(version: &str) -> Result<()> {
    if version.trim().is_empty() {
        return Err(provision_error(version, "no TiDB version given".to_string()));
    }
    if version.starts_with('.')
        || !version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
    {
        return Err(provision_error(
            version,
            format!(
                "'{}' is not a valid version identifier",
                utils::sanitize_identifier(version)
            ),
        ));
    }
    Ok(())
}

/// Storage engine an embedded single-node server supports
///
/// Releases before v4.0.0 predate unistore.
pub fn store_engine(version: &str) -> &'static str {
    match major_version(version) {
        Some(major) if major < 4 => "mocktikv",
        _ => "unistore",
    }
}

fn major_version(version: &str) -> Option<u32> {
    let trimmed = version.strip_prefix('v').unwrap_or(version);
    trimmed.split('.').next()?.parse().ok()
}

pub(crate) fn provision_error(version: &str, reason: String) -> anyhow::Error {
    anyhow::Error::new(TransportError::Provision {
        version: version.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;
    use tempfile::tempdir;

    #[test]
    fn test_validate_version() {
        assert!(validate_version("v6.5.0").is_ok());
        assert!(validate_version("nightly").is_ok());
        assert!(validate_version("v7.1.0-alpha+build_1").is_ok());

        for bad in ["", "  ", "../v6.5.0", "v6/5", ".hidden", "v6.5.0;rm"] {
            let err = validate_version(bad).unwrap_err();
            assert!(
                matches!(kind_of(&err), Some(TransportError::Provision { .. })),
                "'{}' should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_store_engine_by_version() {
        assert_eq!(store_engine("v3.0.12"), "mocktikv");
        assert_eq!(store_engine("v4.0.0"), "unistore");
        assert_eq!(store_engine("6.5.0"), "unistore");
        assert_eq!(store_engine("nightly"), "unistore");
    }

    #[tokio::test]
    async fn test_locate_installed_version() {
        let home = tempdir().unwrap();
        let locator = ServerLocator::new(home.path().to_path_buf(), false);
        let binary = locator.binary_path("v6.5.0");
        std::fs::create_dir_all(binary.parent().unwrap()).unwrap();
        std::fs::write(&binary, b"#!/bin/sh\n").unwrap();

        assert_eq!(locator.locate("v6.5.0").await.unwrap(), binary);
    }

    #[tokio::test]
    async fn test_locate_unknown_version_is_provision_error() {
        let home = tempdir().unwrap();
        let locator = ServerLocator::new(home.path().to_path_buf(), false);

        let err = locator.locate("v99.0.0").await.unwrap_err();
        match kind_of(&err) {
            Some(TransportError::Provision { version, reason }) => {
                assert_eq!(version, "v99.0.0");
                assert!(reason.contains("tiup install tidb:v99.0.0"));
            }
            other => panic!("unexpected error kind: {:?}", other),
        }
    }
}
