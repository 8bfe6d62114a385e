use clap::Parser;
use mymq::config::BrokerConfig;
use mymq::{
    AppState, Broker, ConsumerPool, DeadLetterQueue, IdempotencyMode, IdempotencyStore,
    LogProcessor, MessageQueue, MetricsRecorder, MymqProducer, ReplicationClient, Result,
    WalAppender,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mymq")]
#[command(about = "In-process message broker with WAL, quorum replication, and live metrics")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value = "8080")]
    port: u16,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write-ahead log file path
    #[arg(long, default_value = "./mymq-wal.log")]
    wal_path: String,

    #[arg(long, default_value = "10000")]
    queue_size: usize,

    #[arg(long, default_value = "1000")]
    dlq_size: usize,

    #[arg(long, default_value = "100")]
    poll_interval_ms: u64,

    #[arg(long, default_value = "1")]
    num_consumers: usize,

    /// Node identifier within the cluster
    #[arg(long, default_value = "node-0")]
    node_id: String,

    /// Peer base URLs, comma separated (e.g. http://10.0.0.2:8080)
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Required acknowledgements including self
    #[arg(long, default_value = "1")]
    quorum: i32,

    /// Keep admitted message IDs forever instead of releasing on success
    #[arg(long)]
    permanent_idempotency: bool,

    /// Replay the WAL into the local queue before serving
    #[arg(long)]
    recovery_mode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&args.log_level))
        .init();

    let mut config = BrokerConfig::default();
    config.host = args.host;
    config.port = args.port;
    config.mymq.queue_size = args.queue_size;
    config.mymq.dlq_size = args.dlq_size;
    config.mymq.poll_interval_ms = args.poll_interval_ms;
    config.mymq.wal_path = args.wal_path;
    config.mymq.num_consumers = args.num_consumers;
    config.cluster.node_id = args.node_id;
    config.cluster.peers = args.peers;
    config.cluster.quorum = args.quorum;
    config
        .validate()
        .map_err(mymq::MymqError::Config)?;

    info!("Starting MyMQ broker on {}:{}", config.host, config.port);
    info!("Node ID: {}", config.cluster.node_id);
    info!("Peers: {:?}", config.cluster.peers);
    info!("Quorum: {}", config.cluster.quorum);
    info!("WAL path: {}", config.mymq.wal_path);
    info!("Consumers: {}", config.mymq.num_consumers);
    info!("Recovery mode: {}", args.recovery_mode);

    let mymq_metrics = Arc::new(MetricsRecorder::new());
    let kafka_metrics = Arc::new(MetricsRecorder::new());

    let idempotency_mode = if args.permanent_idempotency {
        IdempotencyMode::Permanent
    } else {
        IdempotencyMode::ReleaseOnSuccess
    };
    let idempotency = Arc::new(IdempotencyStore::new(idempotency_mode));

    let broker = Arc::new(Broker::new(
        MessageQueue::new(config.mymq.queue_size),
        DeadLetterQueue::new(config.mymq.dlq_size, Arc::clone(&mymq_metrics)),
        WalAppender::new(&config.mymq.wal_path)?,
        Arc::clone(&idempotency),
        Arc::clone(&mymq_metrics),
        config.cluster.clone(),
        ReplicationClient::new()?,
    ));

    if args.recovery_mode {
        let recovered = broker.recover_from_wal().await?;
        info!("Recovered {} message(s) from the WAL", recovered);
    }

    let producer = Arc::new(MymqProducer::new(
        Arc::clone(&broker),
        Arc::clone(&mymq_metrics),
    ));

    let consumers = Arc::new(ConsumerPool::new(
        Arc::clone(&broker),
        Arc::clone(&mymq_metrics),
        Arc::clone(&idempotency),
        Arc::new(LogProcessor),
        config.mymq.num_consumers,
        config.mymq.poll_interval_ms,
    ));
    consumers.start();

    let state = AppState {
        mymq_metrics,
        kafka_metrics,
        producer,
        broker,
        consumers: Arc::clone(&consumers),
        idempotency,
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| mymq::MymqError::Config(format!("invalid listen address: {e}")))?;

    mymq::http_server::serve(state, addr, async {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    })
    .await?;

    consumers.shutdown().await;
    info!("MyMQ shut down successfully");
    Ok(())
}

fn parse_log_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            warn!("Invalid log level '{}', defaulting to 'info'", level);
            tracing::Level::INFO
        }
    }
}
