use hearsay::config::NodeConfig;
use hearsay::gossip::{GossipService, Responder};
use hearsay::notify::LogNotifier;
use hearsay::peer::{unix_millis, AppState, DiscoveredPeer};
use hearsay::status::{StatusEvaluator, SystemProbes};
use hearsay::store::MemoryRepository;
use hearsay::transport::{serve, TcpTransport};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(tracing_subscriber::fmt::layer())
    .init();

  // Exclude the command
  let path = std::env::args().nth(1).map(PathBuf::from);
  let cfg = NodeConfig::load(path.as_deref())?;
  let identity = cfg.identity();
  let owned = DiscoveredPeer::owned(
    identity.clone(),
    unix_millis(),
    AppState::new(env!("CARGO_PKG_VERSION"), cfg.geo_position),
  );
  let repository = Arc::new(MemoryRepository::new(owned, cfg.seeds()));
  let notifier = Arc::new(LogNotifier);
  let transport = Arc::new(TcpTransport::new(cfg.connect_timeout, cfg.io_timeout));
  let evaluator = StatusEvaluator::from_config(Arc::new(SystemProbes::new(&cfg)), &cfg);
  let service = GossipService::new(
    repository.clone(),
    transport,
    notifier.clone(),
    evaluator,
    cfg.tick_interval,
  )
  .await?;

  let listener = TcpListener::bind(("0.0.0.0", cfg.port)).await?;
  info!(node = %identity, "listening for gossip");
  let responder = Arc::new(Responder::new(repository, notifier));
  tokio::spawn(async move {
    if let Err(e) = serve(listener, responder).await {
      error!(error = %e, "gossip listener failed");
    }
  });

  service
    .run(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
      }
    })
    .await;
  Ok(())
}
