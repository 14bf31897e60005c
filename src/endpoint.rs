// ABOUTME: Connection endpoints for source and destination clusters
// ABOUTME: Distinguishes remote clusters from version-pinned ephemeral instances

use std::fmt;

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_STATUS_PORT: u16 = 10080;
pub const DEFAULT_USER: &str = "root";

/// One cluster or instance to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub status_port: u16,
    pub user: String,
    pub password: String,
    pub version: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, status_port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            status_port,
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            version: None,
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Base URL of the diagnostic (status) HTTP interface
    pub fn status_url(&self) -> String {
        format!("http://{}:{}", self.host, self.status_port)
    }
}

// Credentials stay out of logs.
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// How one side of a transport run is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSpec {
    /// An already running cluster
    Remote(Endpoint),
    /// A disposable local instance started for the run
    Ephemeral { version: String },
}

impl EndpointSpec {
    pub fn describe(&self) -> String {
        match self {
            EndpointSpec::Remote(endpoint) => endpoint.to_string(),
            EndpointSpec::Ephemeral { version } => format!("ephemeral TiDB {}", version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_hides_password() {
        let endpoint = Endpoint::new("10.0.0.1", 4000, 10080).with_credentials("admin", "s3cret");
        let shown = endpoint.to_string();
        assert_eq!(shown, "admin@10.0.0.1:4000");
        assert!(!shown.contains("s3cret"));
    }

    #[test]
    fn status_url_uses_status_port() {
        let endpoint = Endpoint::new("127.0.0.1", 4001, 10081);
        assert_eq!(endpoint.status_url(), "http://127.0.0.1:10081");
    }
}
