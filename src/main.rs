// ABOUTME: CLI entry point for tidb-snapshot-transport
// ABOUTME: Parses commands and routes to appropriate handlers

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tidb_snapshot_transport::commands;
use tidb_snapshot_transport::config::{
    load_config_from_file, EndpointConfig, InstanceConfig, TransportConfig,
};

#[derive(Parser)]
#[command(name = "tidb-snapshot-transport")]
#[command(
    about = "Move TiDB schemas and optimizer statistics between clusters and versions",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export schemas and statistics from a source and/or import them into a destination
    Transport(TransportArgs),
    /// List the databases and tables stored in a snapshot directory
    Inspect {
        #[arg(long)]
        dir: PathBuf,
    },
}

#[derive(Args)]
struct TransportArgs {
    /// TOML file with settings; command-line flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source cluster address
    #[arg(long)]
    src_addr: Option<String>,
    #[arg(long)]
    src_port: Option<u16>,
    #[arg(long)]
    src_status_port: Option<u16>,
    #[arg(long)]
    src_user: Option<String>,
    #[arg(long)]
    src_password: Option<String>,
    /// Source version; without --src-addr an ephemeral instance of it is started
    #[arg(long)]
    src_version: Option<String>,

    /// Destination cluster address
    #[arg(long)]
    dst_addr: Option<String>,
    #[arg(long)]
    dst_port: Option<u16>,
    #[arg(long)]
    dst_status_port: Option<u16>,
    #[arg(long)]
    dst_user: Option<String>,
    #[arg(long)]
    dst_password: Option<String>,
    /// Destination version; without --dst-addr an ephemeral instance of it is started
    #[arg(long)]
    dst_version: Option<String>,

    /// Snapshot directory (default: a timestamped directory under the system temp dir)
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Databases to transport (comma-separated); empty means all. Import
    /// discovers snapshot databases by lowercased file name, so pass
    /// mixed-case names explicitly
    #[arg(long, value_delimiter = ',')]
    dbs: Vec<String>,
    /// Only these tables (comma-separated); empty means all
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,
    /// Skip these tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    ignore_tables: Vec<String>,

    /// Interactive mode for selecting databases/tables
    #[arg(long)]
    interactive: bool,
    /// Replay CREATE statements exactly as exported instead of adding IF NOT EXISTS
    #[arg(long)]
    verbatim_ddl: bool,

    /// Seconds to wait for an ephemeral instance to become ready
    #[arg(long)]
    readiness_timeout: Option<u64>,
    /// TiUP home holding installed tidb-server binaries
    #[arg(long)]
    tiup_home: Option<PathBuf>,
    /// Install missing tidb-server versions through tiup
    #[arg(long)]
    auto_install: bool,
}

impl TransportArgs {
    fn into_config(self) -> anyhow::Result<(TransportConfig, bool)> {
        let file = match &self.config {
            Some(path) => load_config_from_file(path)?,
            None => TransportConfig::default(),
        };

        let overrides = TransportConfig {
            source: EndpointConfig {
                host: self.src_addr,
                port: self.src_port,
                status_port: self.src_status_port,
                user: self.src_user,
                password: self.src_password,
                version: self.src_version,
            },
            destination: EndpointConfig {
                host: self.dst_addr,
                port: self.dst_port,
                status_port: self.dst_status_port,
                user: self.dst_user,
                password: self.dst_password,
                version: self.dst_version,
            },
            dir: self.dir,
            databases: self.dbs,
            tables: self.tables,
            ignore_tables: self.ignore_tables,
            system_databases: None,
            verbatim_ddl: self.verbatim_ddl,
            instance: InstanceConfig {
                tiup_home: self.tiup_home,
                readiness_timeout_secs: self.readiness_timeout,
                auto_install: self.auto_install,
            },
        };

        Ok((file.merge(overrides), self.interactive))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Transport(args) => {
            let (config, interactive) = args.into_config()?;
            commands::transport(config, interactive).await
        }
        Commands::Inspect { dir } => commands::inspect(&dir).await,
    }
}
