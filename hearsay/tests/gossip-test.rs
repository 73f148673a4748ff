use hearsay::config::NtpConfig;
use hearsay::gossip::{Cycle, GossipService, Responder};
use hearsay::notify::ChannelNotifier;
use hearsay::peer::{
  unix_millis, AppState, DiscoveredPeer, HeartbeatState, Host, Peer, PeerIdentity, PeerRecord,
  PublicKey, Seed,
};
use hearsay::status::StatusEvaluator;
use hearsay::store::{MemoryRepository, Repository};
use hearsay::testkit::{FailureConfig, FixedProbes, SimNetwork};
use hearsay::GossipError;
use itertools::Itertools;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

struct TestNode {
  identity: PeerIdentity,
  repo: Arc<MemoryRepository>,
  notifier: Arc<ChannelNotifier>,
  notifications: UnboundedReceiver<Peer>,
}
impl TestNode {
  async fn keys(&self) -> Vec<String> {
    self
      .repo
      .list_known_peers()
      .await
      .unwrap()
      .iter()
      .map(|p| p.key().to_string())
      .sorted()
      .collect()
  }

  fn notified(&mut self) -> Vec<String> {
    let mut keys = vec![];
    while let Ok(p) = self.notifications.try_recv() {
      keys.push(p.key().to_string());
    }
    keys.sort();
    keys
  }
}

fn identity(key: &str, port: u16) -> PeerIdentity {
  PeerIdentity::new(key, Host::from("127.0.0.1"), port)
}

async fn spawn_node(
  net: &SimNetwork,
  key: &str,
  port: u16,
  generation: u64,
  seeds: Vec<PeerIdentity>,
) -> TestNode {
  let id = identity(key, port);
  let app_state = AppState::new("0.0.1", Default::default());
  let owned = DiscoveredPeer::owned(id.clone(), generation, app_state);
  let seeds = seeds.into_iter().map(Seed::new).collect();
  let repo = Arc::new(MemoryRepository::new(owned, seeds));
  let (notifier, rx) = ChannelNotifier::new();
  let notifier = Arc::new(notifier);
  net
    .register(&id, Arc::new(Responder::new(repo.clone(), notifier.clone())))
    .await;
  TestNode {
    identity: id,
    repo: repo,
    notifier: notifier,
    notifications: rx,
  }
}

fn evaluator() -> StatusEvaluator {
  let ntp = NtpConfig {
    servers: vec![],
    ..Default::default()
  };
  StatusEvaluator::new(Arc::new(FixedProbes::healthy()), ntp, Duration::from_secs(60), 3)
}

async fn service(net: &Arc<SimNetwork>, node: &TestNode, seed: u64) -> GossipService {
  GossipService::new(
    node.repo.clone(),
    net.clone(),
    node.notifier.clone(),
    evaluator(),
    Duration::from_millis(10),
  )
  .await
  .unwrap()
  .with_rng(SmallRng::seed_from_u64(seed))
}

#[tokio::test]
async fn unreachable_seed_is_reported_not_raised() {
  let net = Arc::new(SimNetwork::new());
  let a = spawn_node(&net, "a", 3000, 1_000, vec![identity("b", 3001)]).await;
  let b = spawn_node(&net, "b", 3001, 2_000, vec![]).await;
  net.set_failure(&b.identity, FailureConfig { down: true, ..Default::default() }).await;

  let cycle = Cycle::new(a.repo.clone(), net.clone());
  let report = cycle.run(&mut SmallRng::seed_from_u64(1)).await.unwrap();
  assert_eq!(report.targets, vec![b.identity.clone()]);
  assert_eq!(report.unreachable, vec![b.identity.clone()]);
  assert!(report.reachable.is_empty());
  assert!(report.discovered.is_empty());
  assert!(report.errors.is_empty());
  assert_eq!(net.syns_delivered(), 0);
  assert_eq!(b.keys().await, vec!["b"]);
}

#[tokio::test]
async fn ack_delivers_full_records_to_the_target() {
  let net = Arc::new(SimNetwork::new());
  let mut a = spawn_node(&net, "a", 3000, 1_000, vec![identity("b", 3001)]).await;
  let mut b = spawn_node(&net, "b", 3001, 2_000, vec![]).await;
  let x = DiscoveredPeer::new(
    identity("x", 3002),
    HeartbeatState::new(500, 200),
    AppState::default(),
  );
  a.repo.upsert_peer(Peer::Discovered(x.clone())).await.unwrap();

  let cycle = Cycle::new(a.repo.clone(), net.clone());
  let report = cycle.run(&mut SmallRng::seed_from_u64(1)).await.unwrap();
  assert!(report.errors.is_empty(), "{:?}", report.errors);
  assert_eq!(report.reachable, vec![b.identity.clone()]);
  // The SYN-ACK carried b's own record back to a.
  assert_eq!(
    report.discovered.iter().map(|p| p.key().to_string()).collect::<Vec<_>>(),
    vec!["b"]
  );
  assert_eq!(net.acks_delivered(), 1);

  assert_eq!(b.keys().await, vec!["a", "b", "x"]);
  let stored = b.repo.get_peer(&PublicKey::from("x")).await.unwrap().unwrap();
  assert_eq!(stored, Peer::Discovered(x));
  // Nothing received over the wire becomes owned.
  let a_on_b = b.repo.get_peer(&PublicKey::from("a")).await.unwrap().unwrap();
  assert!(!a_on_b.is_owned());
  assert!(a_on_b.as_discovered().is_some());
  assert_eq!(b.notified(), vec!["a", "x"]);
  // The cycle reports discoveries; merging them is up to the service.
  assert!(a.notified().is_empty());
}

#[tokio::test]
async fn nodes_in_sync_exchange_nothing() {
  let net = Arc::new(SimNetwork::new());
  let mut a = spawn_node(&net, "a", 3000, 1_000, vec![identity("b", 3001)]).await;
  let mut b = spawn_node(&net, "b", 3001, 2_000, vec![]).await;
  let a_copy = a.repo.get_owned_peer().await.unwrap();
  let b_copy = b.repo.get_owned_peer().await.unwrap();
  b.repo
    .upsert_peer(Peer::Discovered(DiscoveredPeer::new(
      a_copy.identity,
      a_copy.heartbeat,
      a_copy.app_state,
    )))
    .await
    .unwrap();
  a.repo
    .upsert_peer(Peer::Discovered(DiscoveredPeer::new(
      b_copy.identity,
      b_copy.heartbeat,
      b_copy.app_state,
    )))
    .await
    .unwrap();

  let cycle = Cycle::new(a.repo.clone(), net.clone());
  let report = cycle.run(&mut SmallRng::seed_from_u64(1)).await.unwrap();
  // The seed and the reachable peer are both b.
  assert_eq!(report.targets, vec![b.identity.clone(), b.identity.clone()]);
  assert_eq!(report.reachable.len(), 2);
  assert!(report.discovered.is_empty());
  assert_eq!(net.syns_delivered(), 2);
  assert_eq!(net.acks_delivered(), 0);
  assert!(a.notified().is_empty());
  assert!(b.notified().is_empty());
}

#[tokio::test]
async fn one_failing_round_does_not_stop_the_others() {
  let net = Arc::new(SimNetwork::new());
  let seed = spawn_node(&net, "seed", 4000, 1_000, vec![]).await;
  let broken = spawn_node(&net, "broken", 4001, 1_000, vec![]).await;
  let healthy = spawn_node(&net, "healthy", 4002, 1_000, vec![]).await;
  let a = spawn_node(&net, "a", 3000, 1_000, vec![seed.identity.clone()]).await;
  net.set_failure(&seed.identity, FailureConfig { down: true, ..Default::default() }).await;
  net.set_failure(&broken.identity, FailureConfig { broken: true, ..Default::default() }).await;
  for node in [&broken, &healthy].iter() {
    let owned = node.repo.get_owned_peer().await.unwrap();
    let heartbeat = HeartbeatState::new(1_000, 10);
    let copy = DiscoveredPeer::new(owned.identity, heartbeat, owned.app_state);
    a.repo.upsert_peer(Peer::Discovered(copy)).await.unwrap();
  }
  a.repo.set_unreachable(healthy.identity.key()).await.unwrap();

  let cycle = Cycle::new(a.repo.clone(), net.clone());
  let report = cycle.run(&mut SmallRng::seed_from_u64(1)).await.unwrap();
  assert_eq!(
    report.targets,
    vec![seed.identity.clone(), broken.identity.clone(), healthy.identity.clone()]
  );
  assert_eq!(report.unreachable, vec![seed.identity.clone()]);
  assert_eq!(report.reachable, vec![healthy.identity.clone()]);
  assert_eq!(report.errors.len(), 1);
  assert!(matches!(report.errors[0], GossipError::Transport(_)));
  // healthy asked for a's record and got it.
  assert_eq!(net.acks_delivered(), 1);
  assert!(healthy.keys().await.contains(&"a".to_string()));
}

#[tokio::test]
async fn service_applies_reachability_and_merges() {
  let net = Arc::new(SimNetwork::new());
  let b = spawn_node(&net, "b", 3001, unix_millis(), vec![]).await;
  let mut a = spawn_node(&net, "a", 3000, unix_millis(), vec![b.identity.clone()]).await;
  let mut a_service = service(&net, &a, 1).await;

  a_service.tick().await.unwrap();
  assert_eq!(a.keys().await, vec!["a", "b"]);
  assert_eq!(a.notified(), vec!["b"]);
  let reachable = a.repo.list_reachable_peers().await.unwrap();
  assert_eq!(reachable.len(), 1);

  net.set_failure(&b.identity, FailureConfig { down: true, ..Default::default() }).await;
  let report = a_service.tick().await.unwrap();
  assert!(!report.unreachable.is_empty());
  assert!(a.repo.list_reachable_peers().await.unwrap().is_empty());
  assert_eq!(a.repo.list_unreachable_peers().await.unwrap().len(), 1);

  net.clear_failure(&b.identity).await;
  a_service.tick().await.unwrap();
  assert_eq!(a.repo.list_reachable_peers().await.unwrap().len(), 1);
  assert!(a.repo.list_unreachable_peers().await.unwrap().is_empty());
}

#[tokio::test]
async fn cluster_converges() {
  let net = Arc::new(SimNetwork::with_seed(3));
  net
    .set_cluster_failure(FailureConfig { drop_prob: 0.2, ..Default::default() })
    .await;
  let seed = identity("n0", 5000);
  let mut nodes = vec![];
  for i in 0..5u16 {
    let key = format!("n{}", i);
    nodes.push(spawn_node(&net, &key, 5000 + i, unix_millis(), vec![seed.clone()]).await);
  }
  let mut services = vec![];
  for (i, node) in nodes.iter().enumerate() {
    services.push(service(&net, node, i as u64).await);
  }
  for _ in 0..40 {
    for service in services.iter_mut() {
      service.tick().await.unwrap();
    }
  }
  let all = vec!["n0", "n1", "n2", "n3", "n4"];
  for node in nodes.iter() {
    assert_eq!(node.keys().await, all, "{}", node.identity);
  }
}

#[tokio::test]
async fn service_runs_until_shutdown() {
  let net = Arc::new(SimNetwork::new());
  let b = spawn_node(&net, "b", 3001, unix_millis(), vec![]).await;
  let a = spawn_node(&net, "a", 3000, unix_millis(), vec![b.identity.clone()]).await;
  let a_service = service(&net, &a, 1).await;
  let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
  let running = tokio::spawn(a_service.run(async move {
    let _ = stopped.await;
  }));

  let learned = tokio::time::timeout(Duration::from_secs(5), async {
    while b.keys().await.len() < 2 {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await;
  assert!(learned.is_ok());
  stop.send(()).unwrap();
  running.await.unwrap();
}

#[tokio::test]
async fn departed_node_becomes_unreachable() {
  let net = Arc::new(SimNetwork::new());
  let b = spawn_node(&net, "b", 3001, unix_millis(), vec![]).await;
  let a = spawn_node(&net, "a", 3000, unix_millis(), vec![b.identity.clone()]).await;
  let mut a_service = service(&net, &a, 1).await;
  a_service.tick().await.unwrap();
  assert_eq!(a.repo.list_reachable_peers().await.unwrap().len(), 1);

  net.unregister(&b.identity).await;
  let report = a_service.tick().await.unwrap();
  assert!(report.errors.is_empty(), "{:?}", report.errors);
  assert!(report.unreachable.contains(&b.identity));
  assert!(a.repo.list_reachable_peers().await.unwrap().is_empty());
  // Its record stays known.
  assert_eq!(a.keys().await, vec!["a", "b"]);
}
