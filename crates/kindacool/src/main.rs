mod commands;
mod progress;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kindacool")]
#[command(about = "Kinda cool k3s clusters on OpenStack", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage clusters
    Cluster(ClusterCommand),
    /// Show version information
    Version,
}

#[derive(Args)]
struct ClusterCommand {
    /// Cluster name
    #[arg(
        short,
        long,
        global = true,
        default_value = "kindacool",
        env = "KINDACOOL_CLUSTER"
    )]
    name: String,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    action: ClusterAction,
}

#[derive(Subcommand)]
enum ClusterAction {
    /// Create a cluster, or converge an existing one
    Create(commands::create::CreateArgs),
    /// Tear a cluster down
    #[command(visible_alias = "rm")]
    Destroy,
    /// List clusters
    Ls,
    /// Print a cluster's kubeconfig
    Kubeconfig {
        /// Print a shell export of KUBECONFIG instead
        #[arg(long)]
        export: bool,
    },
    /// Print a cluster's SSH private key
    Sshkey,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Version => {
            println!("kindacool {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Cluster(cluster) => {
            let name = cluster.name.as_str();
            match cluster.action {
                ClusterAction::Create(args) => {
                    commands::create::handle(name, args, cluster.verbose).await?
                }
                ClusterAction::Destroy => commands::destroy::handle(name, cluster.verbose).await?,
                ClusterAction::Ls => commands::ls::handle().await?,
                ClusterAction::Kubeconfig { export } => {
                    commands::kubeconfig::handle(name, export).await?
                }
                ClusterAction::Sshkey => commands::sshkey::handle(name).await?,
            }
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Commands::Cluster(c) if c.verbose);
    init_tracing(verbose);

    // Resources created before cancellation stay in the state for the next run
    let result = tokio::select! {
        result = run(cli) => result,
        _ = shutdown_signal() => Err(anyhow::anyhow!("interrupted")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "An error occurred:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
