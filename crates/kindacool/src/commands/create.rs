use crate::progress::ClusterProgress;
use clap::Args;
use colored::Colorize;
use kindacool_k3s::{ClusterArgs, ClusterSpec, KubeconfigSummary, OutputKey, spec};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Additional ports to open (repeatable)
    #[arg(short = 'p', long = "additional-ports", alias = "additionalPorts")]
    additional_ports: Vec<u16>,
    /// Machine flavor
    #[arg(short, long, default_value = spec::DEFAULT_FLAVOR)]
    flavor: String,
    /// Create a routed network and give every node a floating IP
    #[arg(long)]
    public: bool,
    /// Number of nodes; the first runs the control plane
    #[arg(
        short = 'c',
        long,
        alias = "nodeCount",
        default_value_t = spec::DEFAULT_NODE_COUNT,
        allow_negative_numbers = true
    )]
    node_count: i32,
    /// Boot volume size in GB, 0 boots from the image
    #[arg(
        long,
        alias = "volumeSize",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    volume_size: i32,
    /// Image to boot from
    #[arg(long, alias = "machineImage", default_value = spec::DEFAULT_IMAGE)]
    machine_image: String,
    /// SSH user of the image
    #[arg(long, alias = "machineUser", default_value = spec::DEFAULT_USER)]
    machine_user: String,
    /// Existing network to attach to (required unless --public)
    #[arg(long, alias = "privateNetworkName", default_value = "")]
    private_network_name: String,
    /// Floating IP pool (--public)
    #[arg(long, alias = "publicIPPool", default_value = "")]
    public_ip_pool: String,
    /// External network name (--public)
    #[arg(long, alias = "publicNetworkName", default_value = "")]
    public_network_name: String,
    /// External network id (--public)
    #[arg(long, alias = "publicNetworkID", default_value = "")]
    public_network_id: String,
}

impl From<CreateArgs> for ClusterArgs {
    fn from(args: CreateArgs) -> Self {
        ClusterArgs {
            additional_ports: args.additional_ports,
            flavor: args.flavor,
            node_count: args.node_count,
            volume_size: args.volume_size,
            machine_image: args.machine_image,
            machine_user: args.machine_user,
            private_network_name: args.private_network_name,
            public: args.public,
            public_ip_pool: args.public_ip_pool,
            public_network_name: args.public_network_name,
            public_network_id: args.public_network_id,
        }
    }
}

pub async fn handle(name: &str, args: CreateArgs, verbose: bool) -> anyhow::Result<()> {
    let spec = ClusterSpec::from(ClusterArgs::from(args));
    spec.validate()?;

    let manager = super::manager()?;
    manager.ensure_environment().await?;

    let progress = ClusterProgress::new(
        &format!("Creating cluster {} ({} nodes)...", name, spec.node_count),
        verbose,
    );
    let report = match manager.provision(name, &spec).await {
        Ok(report) => report,
        Err(e) => {
            progress.finish_error();
            return Err(e.into());
        }
    };

    progress.set_message("Writing kubeconfig...");
    let kubeconfig = manager.fetch_output(name, OutputKey::Kubeconfig).await?;
    let path = kindacool_config::write_kubeconfig(name, kubeconfig.expose())?;
    progress.finish_success(&format!("Cluster {} is {}", name, report.state));

    if let Ok(summary) = KubeconfigSummary::parse(kubeconfig.expose()) {
        if let Some(server) = summary.server() {
            println!("API server: {}", server.cyan());
        }
    }
    println!("Kubeconfig: {}", path.display().to_string().cyan());
    println!();
    println!("{}", "To use it:".bold());
    println!("  eval $(kindacool cluster kubeconfig --export -n {})", name);

    Ok(())
}
