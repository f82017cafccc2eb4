//! rmadmind: the cluster resource manager admin daemon.
//!
//! Single binary that assembles the admin control plane:
//! - State store (redb)
//! - Configuration snapshot + refresh coordinator
//! - Node registry, label store, decommission lifecycle, resource overrides
//! - Federation policy store + subcluster sweeper
//! - Admin gateway over HTTP
//!
//! # Usage
//!
//! ```text
//! rmadmind serve --port 8033 --data-dir /var/lib/rmadmin --conf-dir /etc/rmadmin
//! ```

mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rmadmind", about = "Cluster resource manager admin daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the admin control plane.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8033")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/rmadmin")]
        data_dir: PathBuf,

        /// Directory holding the refreshable `<domain>.toml` files.
        #[arg(long, default_value = "/etc/rmadmin")]
        conf_dir: PathBuf,

        /// Include host list; nodes listed with a port are registered at startup.
        #[arg(long)]
        include_file: Option<PathBuf>,

        /// Exclude host list.
        #[arg(long)]
        exclude_file: Option<PathBuf>,

        /// Default graceful decommission timeout in seconds.
        #[arg(long, default_value = "3600")]
        decommission_timeout: u64,

        /// Seconds without a heartbeat before a subcluster is lost.
        #[arg(long, default_value = "1800")]
        subcluster_timeout: u64,

        /// Seconds without a heartbeat before a node is not live.
        #[arg(long, default_value = "600")]
        node_liveness_timeout: u64,

        /// Subcluster sweep interval in seconds.
        #[arg(long, default_value = "60")]
        sweep_interval: u64,

        /// Subclusters to register at startup.
        #[arg(long = "subcluster")]
        subclusters: Vec<String>,

        /// Start in standby.
        #[arg(long)]
        standby: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rmadmind=debug,rmadmin=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            conf_dir,
            include_file,
            exclude_file,
            decommission_timeout,
            subcluster_timeout,
            node_liveness_timeout,
            sweep_interval,
            subclusters,
            standby,
        } => {
            serve::run(serve::ServeOptions {
                port,
                data_dir,
                conf_dir,
                include_file,
                exclude_file,
                decommission_timeout,
                subcluster_timeout,
                node_liveness_timeout,
                sweep_interval,
                subclusters,
                standby,
            })
            .await
        }
    }
}
