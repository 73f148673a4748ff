use hearsay::config::NtpConfig;
use hearsay::gossip::{Cycle, GossipService, Responder};
use hearsay::notify::ChannelNotifier;
use hearsay::peer::{unix_millis, AppState, DiscoveredPeer, Host, PeerIdentity, PeerRecord, Seed};
use hearsay::status::StatusEvaluator;
use hearsay::store::{MemoryRepository, Repository};
use hearsay::testkit::FixedProbes;
use hearsay::transport::{serve, TcpTransport};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const HOST: &str = "127.0.0.1";

fn owned(key: &str, port: u16) -> DiscoveredPeer {
  DiscoveredPeer::owned(
    PeerIdentity::new(key, Host::from(HOST), port),
    unix_millis(),
    AppState::default(),
  )
}

fn transport() -> Arc<TcpTransport> {
  Arc::new(TcpTransport::new(Duration::from_millis(500), Duration::from_secs(2)))
}

#[tokio::test]
async fn two_nodes_over_loopback() {
  let listener = TcpListener::bind((HOST, 0)).await.unwrap();
  let b_port = listener.local_addr().unwrap().port();
  let b_repo = Arc::new(MemoryRepository::new(owned("b", b_port), vec![]));
  let (b_notifier, mut b_notifications) = ChannelNotifier::new();
  let responder = Arc::new(Responder::new(b_repo.clone(), Arc::new(b_notifier)));
  tokio::spawn(serve(listener, responder));

  let b_id = PeerIdentity::new("b", Host::from(HOST), b_port);
  let a_repo = Arc::new(MemoryRepository::new(owned("a", 1), vec![Seed::new(b_id)]));
  let (a_notifier, mut a_notifications) = ChannelNotifier::new();
  let ntp = NtpConfig {
    servers: vec![],
    ..Default::default()
  };
  let evaluator =
    StatusEvaluator::new(Arc::new(FixedProbes::healthy()), ntp, Duration::from_secs(60), 3);
  let mut service = GossipService::new(
    a_repo.clone(),
    transport(),
    Arc::new(a_notifier),
    evaluator,
    Duration::from_secs(1),
  )
  .await
  .unwrap()
  .with_rng(SmallRng::seed_from_u64(1));

  let report = service.tick().await.unwrap();
  assert!(report.errors.is_empty(), "{:?}", report.errors);
  assert_eq!(report.reachable.len(), 1);

  assert_eq!(a_repo.len().await, 2);
  assert_eq!(a_notifications.try_recv().unwrap().key().as_str(), "b");
  // The ACK was answered before the round ended, so b has merged a already.
  assert_eq!(b_repo.len().await, 2);
  assert_eq!(b_notifications.try_recv().unwrap().key().as_str(), "a");
  let a_on_b = b_repo.get_peer(&"a".into()).await.unwrap().unwrap();
  assert!(!a_on_b.is_owned());
}

#[tokio::test]
async fn closed_port_is_unreachable() {
  let listener = TcpListener::bind((HOST, 0)).await.unwrap();
  let port = listener.local_addr().unwrap().port();
  drop(listener);

  let gone = PeerIdentity::new("gone", Host::from(HOST), port);
  let repo = Arc::new(MemoryRepository::new(owned("a", 1), vec![Seed::new(gone.clone())]));
  let cycle = Cycle::new(repo, transport());
  let report = cycle.run(&mut SmallRng::seed_from_u64(1)).await.unwrap();
  assert_eq!(report.unreachable, vec![gone]);
  assert!(report.errors.is_empty());
}
