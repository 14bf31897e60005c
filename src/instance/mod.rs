// ABOUTME: Lifecycle of disposable, version-pinned TiDB server processes
// ABOUTME: Allocates ports, launches tidb-server, waits for readiness, and tears it down

pub mod locator;
pub mod ports;

pub use locator::ServerLocator;
pub use ports::PortReservation;

use crate::diagnostic::HttpDiagnosticClient;
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::utils;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

const LOCALHOST: &str = "127.0.0.1";

/// Prefix of the managed temp dirs holding instance data
pub const DATA_DIR_PREFIX: &str = "tidb-snapshot-instance-";

/// Data dirs left behind by killed runs are removed after a day
const STALE_DATA_DIR_SECS: u64 = 86_400;

pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_INTERVAL: Duration = Duration::from_millis(500);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Starts ephemeral TiDB instances
#[derive(Debug, Clone)]
pub struct InstanceManager {
    locator: ServerLocator,
    readiness_timeout: Duration,
}

impl InstanceManager {
    pub fn new(locator: ServerLocator, readiness_timeout: Duration) -> Self {
        if let Err(e) = utils::cleanup_stale_temp_dirs(DATA_DIR_PREFIX, STALE_DATA_DIR_SECS) {
            tracing::warn!("Failed to clean up stale instance directories: {:#}", e);
        }
        Self {
            locator,
            readiness_timeout,
        }
    }

    pub fn locator(&self) -> &ServerLocator {
        &self.locator
    }

    pub fn readiness_timeout(&self) -> Duration {
        self.readiness_timeout
    }

    /// Start a `tidb-server` of `version` and wait until it accepts connections
    ///
    /// # Errors
    ///
    /// - [`TransportError::Provision`] if the version cannot be located or the
    ///   process fails to launch or exits during startup. Locating happens
    ///   before any port is reserved.
    /// - [`TransportError::ReadinessTimeout`] if the process is not reachable
    ///   within the readiness timeout.
    ///
    /// A failed start never leaves a process, a data directory or a port
    /// reservation behind.
    pub async fn start(&self, version: &str) -> Result<Instance> {
        let binary = self.locator.locate(version).await?;

        let reservation = PortReservation::allocate(2).context(TransportError::Provision {
            version: version.to_string(),
            reason: "no free local ports".to_string(),
        })?;
        let (port, status_port) = (reservation.ports()[0], reservation.ports()[1]);

        let data_dir =
            utils::create_managed_temp_dir(DATA_DIR_PREFIX).context(TransportError::Provision {
                version: version.to_string(),
                reason: "cannot create a data directory".to_string(),
            })?;

        tracing::info!(
            "Starting TiDB {} on port {} (status port {})",
            version,
            port,
            status_port
        );

        let child = match spawn_server(&binary, version, port, status_port, &data_dir) {
            Ok(child) => child,
            Err(e) => {
                if let Err(cleanup) = utils::remove_managed_temp_dir(DATA_DIR_PREFIX, &data_dir) {
                    tracing::warn!("{:#}", cleanup);
                }
                return Err(e.context(TransportError::Provision {
                    version: version.to_string(),
                    reason: format!("failed to launch {}", binary.display()),
                }));
            }
        };

        let mut instance = Instance {
            version: version.to_string(),
            port,
            status_port,
            child: Some(child),
            data_dir: Some(data_dir),
            reservation: Some(reservation),
        };

        if let Err(e) = self.wait_until_ready(&mut instance).await {
            instance.release().await;
            return Err(e);
        }

        tracing::info!("✓ TiDB {} is ready at {}", version, instance.endpoint());
        Ok(instance)
    }

    async fn wait_until_ready(&self, instance: &mut Instance) -> Result<()> {
        let status = HttpDiagnosticClient::new(&instance.endpoint())?;
        let started = Instant::now();

        loop {
            if let Some(exit) = instance.exit_status()? {
                return Err(anyhow::Error::new(TransportError::Provision {
                    version: instance.version.clone(),
                    reason: format!(
                        "tidb-server exited during startup with {}; see {}",
                        exit,
                        instance.log_path().map(|p| p.display().to_string()).unwrap_or_default()
                    ),
                }));
            }

            if status.is_ready(PROBE_TIMEOUT).await
                && TcpStream::connect((LOCALHOST, instance.port)).await.is_ok()
            {
                return Ok(());
            }

            if started.elapsed() >= self.readiness_timeout {
                return Err(anyhow::Error::new(TransportError::ReadinessTimeout {
                    version: instance.version.clone(),
                    status_port: instance.status_port,
                    waited: started.elapsed(),
                }));
            }

            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }
}

impl Default for InstanceManager {
    fn default() -> Self {
        Self::new(ServerLocator::default(), DEFAULT_READINESS_TIMEOUT)
    }
}

fn spawn_server(
    binary: &Path,
    version: &str,
    port: u16,
    status_port: u16,
    data_dir: &Path,
) -> Result<Child> {
    Command::new(binary)
        .arg("-host")
        .arg(LOCALHOST)
        .arg("-P")
        .arg(port.to_string())
        .arg("-status")
        .arg(status_port.to_string())
        .arg("-store")
        .arg(locator::store_engine(version))
        .arg("-path")
        .arg(data_dir.join("store"))
        .arg("-log-file")
        .arg(data_dir.join("tidb.log"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", binary.display()))
}

/// A running ephemeral instance, exclusively owned by its creator
///
/// Call [`Instance::release`] when done; it is safe to call repeatedly.
/// Dropping an unreleased instance still kills the process.
#[derive(Debug)]
pub struct Instance {
    version: String,
    port: u16,
    status_port: u16,
    child: Option<Child>,
    data_dir: Option<PathBuf>,
    reservation: Option<PortReservation>,
}

impl Instance {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status_port(&self) -> u16 {
        self.status_port
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(LOCALHOST, self.port, self.status_port).with_version(self.version.clone())
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("tidb.log"))
    }

    pub fn is_released(&self) -> bool {
        self.child.is_none() && self.data_dir.is_none() && self.reservation.is_none()
    }

    fn exit_status(&mut self) -> Result<Option<std::process::ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child
                .try_wait()
                .context("Failed to poll tidb-server process"),
            None => Ok(None),
        }
    }

    /// Terminate the process, remove its data and free its ports
    ///
    /// Already-exited processes and repeated calls are fine; failures are
    /// logged rather than returned.
    pub async fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!("TiDB {} already exited with {}", self.version, status);
                }
                _ => {
                    tracing::info!("Stopping TiDB {} on port {}", self.version, self.port);
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to stop TiDB {}: {}", self.version, e);
                    }
                }
            }
        }

        if let Some(dir) = self.data_dir.take() {
            if let Err(e) = utils::remove_managed_temp_dir(DATA_DIR_PREFIX, &dir) {
                tracing::warn!("{:#}", e);
            }
        }

        self.reservation.take();
    }

    #[cfg(test)]
    fn from_child(version: &str, child: Child) -> Result<Self> {
        let reservation = PortReservation::allocate(2)?;
        let (port, status_port) = (reservation.ports()[0], reservation.ports()[1]);
        Ok(Self {
            version: version.to_string(),
            port,
            status_port,
            child: Some(child),
            data_dir: Some(utils::create_managed_temp_dir(DATA_DIR_PREFIX)?),
            reservation: Some(reservation),
        })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        if let Some(dir) = self.data_dir.take() {
            let _ = utils::remove_managed_temp_dir(DATA_DIR_PREFIX, &dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_unknown_version_fails_before_reserving_ports() {
        let home = tempdir().unwrap();
        let manager = InstanceManager::new(
            ServerLocator::new(home.path().to_path_buf(), false),
            Duration::from_secs(1),
        );
        let allocations = ports::allocations_on_this_thread();

        let err = manager.start("v0.0.0-unknown").await.unwrap_err();
        assert!(matches!(
            kind_of(&err),
            Some(TransportError::Provision { .. })
        ));
        // Locating runs before allocation, so nothing was launched or reserved.
        assert!(format!("{:#}", err).contains("not found"));
        assert_eq!(ports::allocations_on_this_thread(), allocations);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_release_is_idempotent() {
        let child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut instance = Instance::from_child("v6.5.0", child).unwrap();
        let ports = [instance.port(), instance.status_port()];
        let data_dir = instance.data_dir.clone().unwrap();
        assert!(ports.iter().all(|p| ports::is_reserved(*p)));

        instance.release().await;
        assert!(instance.is_released());
        assert!(!data_dir.exists());
        assert!(ports.iter().all(|p| !ports::is_reserved(*p)));

        instance.release().await;
        assert!(instance.is_released());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_release_after_process_exited() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().await.unwrap();
        let mut instance = Instance::from_child("v6.5.0", child).unwrap();

        instance.release().await;
        assert!(instance.is_released());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_exiting_during_startup_is_provision_error() {
        let home = tempdir().unwrap();
        let locator = ServerLocator::new(home.path().to_path_buf(), false);
        let binary = locator.binary_path("v6.5.0");
        std::fs::create_dir_all(binary.parent().unwrap()).unwrap();
        std::fs::write(&binary, b"#!/bin/sh\nexit 3\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let manager = InstanceManager::new(locator, Duration::from_secs(10));
        let allocations = ports::allocations_on_this_thread();
        let err = manager.start("v6.5.0").await.unwrap_err();
        assert!(matches!(
            kind_of(&err),
            Some(TransportError::Provision { .. })
        ));
        // Allocation ran before the launch failed.
        assert_eq!(ports::allocations_on_this_thread(), allocations + 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreachable_server_times_out() {
        let home = tempdir().unwrap();
        let locator = ServerLocator::new(home.path().to_path_buf(), false);
        let binary = locator.binary_path("v6.5.0");
        std::fs::create_dir_all(binary.parent().unwrap()).unwrap();
        std::fs::write(&binary, b"#!/bin/sh\nexec sleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let manager = InstanceManager::new(locator, Duration::from_millis(300));
        let err = manager.start("v6.5.0").await.unwrap_err();
        match kind_of(&err) {
            Some(TransportError::ReadinessTimeout { version, .. }) => {
                assert_eq!(version, "v6.5.0")
            }
            other => panic!("unexpected error kind: {:?}", other),
        }
    }
}
