use crate::error::GossipError;
use crate::gossip::{merge_discovered, Cycle, CycleReport};
use crate::notify::Notifier;
use crate::peer::unix_millis;
use crate::status::StatusEvaluator;
use crate::store::Repository;
use crate::transport::Transport;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Drives the gossip of one node: on every tick, refreshes the owned peer, runs a cycle and
/// merges what it brought back.
pub struct GossipService {
  repository: Arc<dyn Repository>,
  notifier: Arc<dyn Notifier>,
  evaluator: StatusEvaluator,
  cycle: Cycle,
  tick_interval: Duration,
  rng: SmallRng,
}
impl GossipService {
  /// Fails with [`GossipError::EmptySeed`] if the repository holds no seeds: such a node could
  /// never join a cluster.
  pub async fn new(
    repository: Arc<dyn Repository>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    evaluator: StatusEvaluator,
    tick_interval: Duration,
  ) -> Result<GossipService, GossipError> {
    if repository.list_seed_peers().await?.is_empty() {
      return Err(GossipError::EmptySeed);
    }
    Ok(GossipService {
      cycle: Cycle::new(repository.clone(), transport),
      repository: repository,
      notifier: notifier,
      evaluator: evaluator,
      tick_interval: tick_interval,
      rng: SmallRng::from_entropy(),
    })
  }

  /// Replaces the random source of target selection, for reproducible runs.
  pub fn with_rng(mut self, rng: SmallRng) -> GossipService {
    self.rng = rng;
    self
  }

  /// One tick. Cycles of one service never overlap since this takes `&mut self`.
  pub async fn tick(&mut self) -> Result<CycleReport, GossipError> {
    self.refresh_owned().await?;
    let report = self.cycle.run(&mut self.rng).await?;
    self.apply(&report).await?;
    Ok(report)
  }

  async fn refresh_owned(&self) -> Result<(), GossipError> {
    let mut owned = self.repository.get_owned_peer().await?;
    owned.heartbeat.beat(unix_millis());
    let seeds = self.repository.list_seed_peers().await?;
    let known = self.repository.list_known_peers().await?;
    self.evaluator.refresh(&mut owned, &seeds, &known).await;
    self.repository.update_owned_peer(owned).await?;
    Ok(())
  }

  // Reachable first: a target whose SYN passed and whose ACK did not ends up unreachable.
  // Every write is tried; the first repository error is returned after that.
  async fn apply(&self, report: &CycleReport) -> Result<(), GossipError> {
    for e in report.errors.iter() {
      warn!(error = %e, "gossip round failed");
    }
    let mut failure = None;
    for target in report.reachable.iter() {
      if let Err(e) = self.repository.set_reachable(target.key()).await {
        warn!(peer = %target, error = %e, "cannot mark peer reachable");
        failure.get_or_insert(e);
      }
    }
    for target in report.unreachable.iter() {
      if let Err(e) = self.repository.set_unreachable(target.key()).await {
        warn!(peer = %target, error = %e, "cannot mark peer unreachable");
        failure.get_or_insert(e);
      }
    }
    let now = unix_millis();
    let mut merged = 0;
    for peer in report.discovered.iter().cloned() {
      let identity = peer.identity.clone();
      match merge_discovered(&*self.repository, &*self.notifier, peer, now).await {
        Ok(true) => merged += 1,
        Ok(false) => {}
        Err(e) => {
          warn!(peer = %identity, error = %e, "cannot merge discovered peer");
          failure.get_or_insert(e);
        }
      }
    }
    debug!(
      targets = report.targets.len(),
      reachable = report.reachable.len(),
      unreachable = report.unreachable.len(),
      discovered = report.discovered.len(),
      merged,
      "gossip cycle done"
    );
    match failure {
      Some(e) => Err(e.into()),
      None => Ok(()),
    }
  }

  /// Ticks until `shutdown` completes. Failed ticks are logged and the next one runs as usual.
  pub async fn run<F: Future<Output = ()>>(mut self, shutdown: F) {
    let mut interval = tokio::time::interval(self.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);
    info!(every = ?self.tick_interval, "gossip service started");
    loop {
      tokio::select! {
        _ = &mut shutdown => {
          info!("gossip service stopped");
          return;
        }
        _ = interval.tick() => match self.tick().await {
          Ok(_) => {}
          Err(GossipError::EmptySeed) => error!("no seed peers, gossip skipped"),
          Err(e) => warn!(error = %e, "gossip tick failed"),
        },
      }
    }
  }
}

#[cfg(test)]
use crate::config::NtpConfig;
#[cfg(test)]
use crate::gossip::Responder;
#[cfg(test)]
use crate::notify::ChannelNotifier;
#[cfg(test)]
use crate::peer::{
  AppState, DiscoveredPeer, HeartbeatState, Host, Peer, PeerIdentity, PeerStatus, PublicKey, Seed,
};
#[cfg(test)]
use crate::store::{MemoryRepository, RepositoryError, Upsert};
#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(test)]
use crate::testkit::{FixedProbes, SimNetwork};

#[cfg(test)]
fn evaluator() -> StatusEvaluator {
  let ntp = NtpConfig {
    servers: vec![],
    ..Default::default()
  };
  StatusEvaluator::new(Arc::new(FixedProbes::healthy()), ntp, Duration::from_secs(60), 3)
}

// Fails the first upsert, then behaves like the table it wraps.
#[cfg(test)]
struct FlakyRepository {
  inner: MemoryRepository,
  failed: AtomicBool,
}
#[cfg(test)]
#[async_trait]
impl Repository for FlakyRepository {
  async fn list_seed_peers(&self) -> Result<Vec<Seed>, RepositoryError> {
    self.inner.list_seed_peers().await
  }

  async fn list_known_peers(&self) -> Result<Vec<Peer>, RepositoryError> {
    self.inner.list_known_peers().await
  }

  async fn list_reachable_peers(&self) -> Result<Vec<Peer>, RepositoryError> {
    self.inner.list_reachable_peers().await
  }

  async fn list_unreachable_peers(&self) -> Result<Vec<Peer>, RepositoryError> {
    self.inner.list_unreachable_peers().await
  }

  async fn get_peer(&self, key: &PublicKey) -> Result<Option<Peer>, RepositoryError> {
    self.inner.get_peer(key).await
  }

  async fn get_owned_peer(&self) -> Result<DiscoveredPeer, RepositoryError> {
    self.inner.get_owned_peer().await
  }

  async fn upsert_peer(&self, peer: Peer) -> Result<Upsert, RepositoryError> {
    if !self.failed.swap(true, Ordering::SeqCst) {
      return Err(RepositoryError::Backend("transient".to_string()));
    }
    self.inner.upsert_peer(peer).await
  }

  async fn update_owned_peer(&self, peer: DiscoveredPeer) -> Result<(), RepositoryError> {
    self.inner.update_owned_peer(peer).await
  }

  async fn set_reachable(&self, key: &PublicKey) -> Result<(), RepositoryError> {
    self.inner.set_reachable(key).await
  }

  async fn set_unreachable(&self, key: &PublicKey) -> Result<(), RepositoryError> {
    self.inner.set_unreachable(key).await
  }
}

#[tokio::test]
async fn test_refuses_to_start_without_seeds() {
  let me = DiscoveredPeer::owned(
    PeerIdentity::new("me", Host::from("127.0.0.1"), 3000),
    unix_millis(),
    AppState::default(),
  );
  let repo = Arc::new(MemoryRepository::new(me, vec![]));
  let (notifier, _rx) = ChannelNotifier::new();
  let res = GossipService::new(
    repo,
    Arc::new(SimNetwork::new()),
    Arc::new(notifier),
    evaluator(),
    Duration::from_secs(1),
  )
  .await;
  assert!(matches!(res, Err(GossipError::EmptySeed)));
}

#[tokio::test]
async fn test_tick_refreshes_owned_and_marks_dead_seed() {
  let me_id = PeerIdentity::new("me", Host::from("127.0.0.1"), 3000);
  let seed_id = PeerIdentity::new("seed", Host::from("127.0.0.1"), 4000);
  let me = DiscoveredPeer::owned(me_id, unix_millis() - 5_000, AppState::default());
  let repo = Arc::new(MemoryRepository::new(me, vec![Seed::new(seed_id.clone())]));
  let (notifier, _rx) = ChannelNotifier::new();
  // Nothing is registered on the network, so the seed is unreachable.
  let mut service = GossipService::new(
    repo.clone(),
    Arc::new(SimNetwork::new()),
    Arc::new(notifier),
    evaluator(),
    Duration::from_secs(1),
  )
  .await
  .unwrap()
  .with_rng(SmallRng::seed_from_u64(1));

  let report = service.tick().await.unwrap();
  assert_eq!(report.targets, vec![seed_id.clone()]);
  assert_eq!(report.unreachable, vec![seed_id]);
  assert!(report.errors.is_empty());

  let owned = repo.get_owned_peer().await.unwrap();
  assert!(owned.heartbeat.elapsed_heartbeats >= 5_000);
  // No seed has reported anything yet.
  assert_eq!(owned.status(), PeerStatus::Bootstrapping);
}

#[tokio::test]
async fn test_failed_upsert_does_not_drop_other_discoveries() {
  let net = Arc::new(SimNetwork::new());
  let seed_id = PeerIdentity::new("seed", Host::from("127.0.0.1"), 4000);
  let seed_owned = DiscoveredPeer::owned(seed_id.clone(), unix_millis(), AppState::default());
  let seed_repo = Arc::new(MemoryRepository::new(seed_owned, vec![]));
  for (i, key) in ["x", "y", "z"].iter().enumerate() {
    let id = PeerIdentity::new(*key, Host::from("127.0.0.1"), 5000 + i as u16);
    let peer = DiscoveredPeer::new(id, HeartbeatState::new(1_000, 10), AppState::default());
    seed_repo.upsert_peer(Peer::Discovered(peer)).await.unwrap();
  }
  let (seed_notifier, _seed_rx) = ChannelNotifier::new();
  net
    .register(&seed_id, Arc::new(Responder::new(seed_repo, Arc::new(seed_notifier))))
    .await;

  let me_id = PeerIdentity::new("me", Host::from("127.0.0.1"), 3000);
  let me = DiscoveredPeer::owned(me_id, unix_millis(), AppState::default());
  let repo = Arc::new(FlakyRepository {
    inner: MemoryRepository::new(me, vec![Seed::new(seed_id)]),
    failed: AtomicBool::new(false),
  });
  let (notifier, _rx) = ChannelNotifier::new();
  let mut service = GossipService::new(
    repo.clone(),
    net,
    Arc::new(notifier),
    evaluator(),
    Duration::from_secs(1),
  )
  .await
  .unwrap()
  .with_rng(SmallRng::seed_from_u64(1));

  let res = service.tick().await;
  assert!(matches!(res, Err(GossipError::Repository(RepositoryError::Backend(_)))));
  // One of the four discovered records was lost, the other three were merged.
  assert_eq!(repo.inner.len().await, 4);

  // The lost record comes back on the next tick.
  service.tick().await.unwrap();
  assert_eq!(repo.inner.len().await, 5);
}
