use std::path::PathBuf;
use std::sync::Arc;

use bitgrid_cluster::{Cluster, Node};
use bitgrid_core::Holder;
use bitgrid_server::{Api, HolderSyncer, NopPeerClient, ServerConfig};
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bitgrid-server", about = "bitgrid distributed bitmap index node")]
struct Args {
    /// path to TOML configuration file
    #[arg(short = 'c', long, env = "BITGRID_CONFIG")]
    config: Option<PathBuf>,

    /// print default configuration as TOML and exit
    #[arg(long)]
    config_template: bool,

    /// address to listen on and advertise to peers (host:port)
    #[arg(short, long, env = "BITGRID_BIND")]
    bind: Option<String>,

    /// directory holding indexes, fields and fragments
    #[arg(short, long, env = "BITGRID_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// stable id of this node. default: random
    #[arg(long, env = "BITGRID_NODE_ID")]
    node_id: Option<String>,

    /// copies kept of every slice
    #[arg(long, env = "BITGRID_REPLICAS")]
    replicas: Option<usize>,

    /// static cluster members, comma separated, as id=host:port
    #[arg(long, env = "BITGRID_HOSTS", value_delimiter = ',')]
    hosts: Vec<String>,

    /// id of the initial coordinator. default: lowest node id
    #[arg(long, env = "BITGRID_COORDINATOR")]
    coordinator: Option<String>,

    /// log queries slower than this many milliseconds
    #[arg(long, env = "BITGRID_LONG_QUERY_TIME_MS")]
    long_query_time_ms: Option<u64>,

    /// milliseconds a cluster broadcast may take before it counts as failed
    #[arg(long, env = "BITGRID_BROADCAST_TIMEOUT_MS")]
    broadcast_timeout_ms: Option<u64>,

    /// seconds between anti-entropy passes (0 = disabled)
    #[arg(long, env = "BITGRID_ANTI_ENTROPY_INTERVAL_SECS")]
    anti_entropy_interval_secs: Option<u64>,
}

/// Applies CLI overrides to a `ServerConfig`. Only values given on the
/// command line or in the environment take effect, so the order stays
/// defaults → TOML file → env vars → CLI flags.
fn apply_args(cfg: &mut ServerConfig, args: &Args) {
    if let Some(ref bind) = args.bind {
        cfg.bind = bind.clone();
    }
    if let Some(ref dir) = args.data_dir {
        cfg.data_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(ref id) = args.node_id {
        cfg.node_id = id.clone();
    }
    if let Some(v) = args.replicas {
        cfg.cluster.replicas = v;
    }
    if !args.hosts.is_empty() {
        cfg.cluster.hosts = args.hosts.clone();
    }
    if let Some(ref id) = args.coordinator {
        cfg.cluster.coordinator = id.clone();
    }
    if let Some(v) = args.long_query_time_ms {
        cfg.cluster.long_query_time_ms = v;
    }
    if let Some(v) = args.broadcast_timeout_ms {
        cfg.cluster.broadcast_timeout_ms = v;
    }
    if let Some(v) = args.anti_entropy_interval_secs {
        cfg.anti_entropy_interval_secs = v;
    }
}

/// Prints `msg` to stderr and exits with code 1.
fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitgrid=info".into()),
        )
        .init();

    let args = Args::parse();

    // --config-template: dump defaults and exit
    if args.config_template {
        match ServerConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                std::process::exit(0);
            }
            Err(e) => exit_err(format!("failed to generate config template: {e}")),
        }
    }

    let mut cfg = match &args.config {
        Some(path) => ServerConfig::from_file(path).unwrap_or_else(|e| exit_err(e)),
        None => ServerConfig::default(),
    };
    apply_args(&mut cfg, &args);

    let addr = cfg.bind_addr().unwrap_or_else(|e| exit_err(e));
    let cluster_config = cfg.cluster_config().unwrap_or_else(|e| exit_err(e));
    let local = Node::new(cfg.resolved_node_id(), addr);
    let local_id = local.id.clone();

    let holder = Holder::open(cfg.data_dir_path()).unwrap_or_else(|e| {
        exit_err(format!(
            "failed to open data dir '{}': {e}",
            cfg.data_dir_path().display()
        ))
    });
    let holder = Arc::new(holder);
    info!(
        data_dir = %holder.path().display(),
        indexes = holder.indexes().len(),
        "holder opened"
    );

    let cluster = Arc::new(Cluster::new(local, cluster_config));
    // every member is configured statically, so the cluster is complete
    if let Err(e) = cluster.bootstrap() {
        exit_err(format!("failed to start cluster: {e}"));
    }
    if cluster.nodes().len() > 1 {
        warn!(
            members = cluster.nodes().len(),
            "no peer transport configured: cluster messages stay on this node"
        );
    }

    let api = Arc::new(
        Api::new(Arc::clone(&holder), Arc::clone(&cluster))
            .with_broadcast_timeout(cfg.broadcast_timeout()),
    );

    if let Some(interval) = cfg.anti_entropy_interval() {
        let syncer = HolderSyncer::new(
            Arc::clone(&holder),
            Arc::clone(&cluster),
            Arc::new(NopPeerClient),
        );
        tokio::spawn(syncer.run(interval));
        info!(interval_secs = interval.as_secs(), "anti-entropy enabled");
    }

    info!(
        node = %local_id,
        addr = %addr,
        state = %api.state(),
        coordinator = api.cluster().is_coordinator(),
        version = api.version(),
        slice_width = api.info().slice_width,
        "bitgrid node ready"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutting down");
    if let Err(e) = holder.close() {
        error!("failed to close holder: {e}");
    }
}
