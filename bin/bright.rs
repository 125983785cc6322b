use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use bright::api::{create_router, AppState};
use bright::config::{Config, RaftSettings};
use bright::consensus::proto::raft_service_server::RaftServiceServer;
use bright::consensus::{spawn_join_task, BrightNode, RaftServiceImpl};
use bright::ingress::{postgres, IngressContext, IngressManager};
use bright::metrics::BrightMetrics;
use bright::rpc::RpcClient;
use bright::store::IndexStore;

#[derive(Parser)]
#[command(name = "bright")]
#[command(about = "Clusterable full-text search service", long_about = None)]
struct Args {
    /// HTTP API port
    #[arg(long, env = "BRIGHT_PORT", default_value = "3000")]
    port: u16,

    /// Master key for bearer-token authentication
    #[arg(long, env = "BRIGHT_MASTER_KEY")]
    master_key: Option<String>,

    /// Data directory for indexes, raft state and ingress configs
    #[arg(long, env = "BRIGHT_DATA_PATH", default_value = "./data")]
    data_path: PathBuf,

    /// Log filter (tracing EnvFilter syntax)
    #[arg(long, env = "BRIGHT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Create missing indexes on document insertion
    #[arg(
        long,
        env = "BRIGHT_AUTO_CREATE_INDEX",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    auto_create_index: bool,

    /// Join or seed a Raft cluster
    #[arg(long, env = "BRIGHT_RAFT_ENABLED")]
    raft_enabled: bool,

    /// Unique node id within the cluster
    #[arg(long, env = "BRIGHT_RAFT_NODE_ID", default_value = "1")]
    raft_node_id: u64,

    /// Bind address for the Raft transport
    #[arg(long, env = "BRIGHT_RAFT_BIND", default_value = "0.0.0.0:7000")]
    raft_bind: String,

    /// Advertised Raft address (DNS name preferred); defaults to the bind address
    #[arg(long, env = "BRIGHT_RAFT_ADVERTISE")]
    raft_advertise: Option<String>,

    /// Seed a fresh cluster with this node as the only voter
    #[arg(long, env = "BRIGHT_RAFT_BOOTSTRAP")]
    raft_bootstrap: bool,

    /// Comma-separated Raft addresses of peers to join through
    #[arg(long, env = "BRIGHT_RAFT_PEERS", value_delimiter = ',')]
    raft_peers: Vec<String>,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&args.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config {
        port: args.port,
        master_key: args.master_key,
        data_path: args.data_path,
        auto_create_index: args.auto_create_index,
        raft: args.raft_enabled.then(|| RaftSettings {
            node_id: args.raft_node_id,
            bind_addr: args.raft_bind.clone(),
            advertise_addr: args
                .raft_advertise
                .clone()
                .unwrap_or_else(|| args.raft_bind.clone()),
            bootstrap: args.raft_bootstrap,
            peers: args.raft_peers.clone(),
        }),
    });

    info!(
        version = bright::VERSION,
        port = config.port,
        auth_enabled = config.requires_auth(),
        data_path = %config.data_path.display(),
        raft_enabled = config.raft_enabled(),
        "starting bright"
    );

    let metrics = Arc::new(BrightMetrics::new().context("failed to build metrics registry")?);
    let store = Arc::new(IndexStore::open(&config.data_path).context("failed to open index store")?);
    let rpc = Arc::new(RpcClient::new().context("failed to build rpc client")?);

    let mut raft_server = None;
    let node = match config.raft.clone() {
        Some(settings) => {
            let node = Arc::new(
                BrightNode::new(settings.clone(), &config.raft_dir(), Arc::clone(&store))
                    .await
                    .context("failed to initialize raft node")?,
            );

            let bind_addr: SocketAddr = settings
                .bind_addr
                .parse()
                .context("invalid raft bind address")?;
            let service = RaftServiceImpl::new(Arc::clone(&node.raft));
            raft_server = Some(tokio::spawn(async move {
                if let Err(e) = tonic::transport::Server::builder()
                    .add_service(RaftServiceServer::new(service))
                    .serve(bind_addr)
                    .await
                {
                    error!(error = %e, "raft transport server failed");
                }
            }));

            info!(
                node_id = settings.node_id,
                bind = %settings.bind_addr,
                advertise = %settings.advertise_addr,
                bootstrap = settings.bootstrap,
                "raft enabled"
            );

            if settings.bootstrap {
                node.bootstrap().await.context("cluster bootstrap failed")?;
            } else if !settings.peers.is_empty() {
                spawn_join_task(Arc::clone(&node), Arc::clone(&rpc), Arc::clone(&config));
            }

            Some(node)
        }
        None => None,
    };

    let ingresses = Arc::new(IngressManager::new(
        &config.data_path,
        IngressContext {
            store: Arc::clone(&store),
            node: node.clone(),
            metrics: Arc::clone(&metrics),
        },
    ));
    ingresses.register_factory("postgres", Box::new(postgres::factory));
    if let Err(e) = ingresses.load() {
        warn!(error = %e, "failed to load ingress configurations");
    }
    if let Err(e) = ingresses.start_all().await {
        warn!(error = %e, "some ingresses failed to start");
    }

    let app = create_router(AppState {
        store: Arc::clone(&store),
        node: node.clone(),
        config: Arc::clone(&config),
        rpc: Arc::clone(&rpc),
        ingresses: Arc::clone(&ingresses),
        metrics: Arc::clone(&metrics),
        started_at: Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .context("failed to bind http listener")?;
    info!(port = config.port, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("shutting down");
    ingresses.stop_all().await;

    if let Some(node) = node {
        if let Err(e) = node.shutdown().await {
            warn!(error = %e, "raft shutdown reported an error");
        }
    }
    if let Some(server) = raft_server {
        server.abort();
    }

    info!("shutdown complete");
    Ok(())
}
