use crate::error::GossipError;
use crate::gossip::{merge_discovered, Ack, Diff, Syn, SynAck};
use crate::notify::Notifier;
use crate::peer::{unix_millis, Peer};
use crate::store::Repository;
use std::sync::Arc;
use tracing::{debug, warn};

/// The receiving side of a round.
pub struct Responder {
  repository: Arc<dyn Repository>,
  notifier: Arc<dyn Notifier>,
}
impl Responder {
  pub fn new(repository: Arc<dyn Repository>, notifier: Arc<dyn Notifier>) -> Responder {
    Responder {
      repository: repository,
      notifier: notifier,
    }
  }

  /// Diffs the initiator's digests against the local table. Full records go back for what the
  /// initiator is missing; digests go back for what we are missing.
  pub async fn on_syn(&self, syn: Syn) -> Result<SynAck, GossipError> {
    let table = self.repository.list_known_peers().await?;
    let diff = Diff::between(&table, &syn.known_peers);
    let syn_ack = SynAck {
      new_peers: diff
        .unknown_to_them
        .into_iter()
        .filter_map(Peer::into_discovered)
        .collect(),
      unknown_peers: diff.unknown_to_me,
    };
    debug!(
      initiator = %syn.initiator,
      new = syn_ack.new_peers.len(),
      unknown = syn_ack.unknown_peers.len(),
      "answering SYN"
    );
    Ok(syn_ack)
  }

  /// Merges the records the initiator sent back. Returns how many were fresh.
  ///
  /// Every record is tried; the first repository error is returned after that.
  pub async fn on_ack(&self, ack: Ack) -> Result<usize, GossipError> {
    let now = unix_millis();
    let mut merged = 0;
    let mut failure = None;
    for peer in ack.requested_peers {
      let identity = peer.identity.clone();
      match merge_discovered(&*self.repository, &*self.notifier, peer, now).await {
        Ok(true) => merged += 1,
        Ok(false) => {}
        Err(e) => {
          warn!(peer = %identity, error = %e, "cannot merge peer from ACK");
          failure.get_or_insert(e);
        }
      }
    }
    debug!(initiator = %ack.initiator, merged, "ACK merged");
    match failure {
      Some(e) => Err(e.into()),
      None => Ok(merged),
    }
  }
}

#[cfg(test)]
use crate::notify::ChannelNotifier;
#[cfg(test)]
use crate::peer::{
  AppState, DiscoveredPeer, HeartbeatState, Host, PeerDigest, PeerIdentity, PeerRecord, PublicKey,
};
#[cfg(test)]
use crate::store::MemoryRepository;
#[cfg(test)]
use itertools::Itertools;

#[cfg(test)]
fn identity(key: &str, port: u16) -> PeerIdentity {
  PeerIdentity::new(key, Host::from("127.0.0.1"), port)
}

#[cfg(test)]
fn full(key: &str, port: u16, elapsed: u64) -> DiscoveredPeer {
  DiscoveredPeer::new(identity(key, port), HeartbeatState::new(10, elapsed), AppState::default())
}

#[tokio::test]
async fn test_syn_is_answered_with_both_deltas() {
  let me = DiscoveredPeer::owned(identity("b", 4000), 10, AppState::default());
  let repo = Arc::new(MemoryRepository::new(me, vec![]));
  repo.upsert_peer(Peer::Discovered(full("x", 3001, 100))).await.unwrap();
  repo.upsert_peer(Peer::Discovered(full("y", 3002, 100))).await.unwrap();
  let (notifier, _rx) = ChannelNotifier::new();
  let responder = Responder::new(repo, Arc::new(notifier));

  let syn = Syn {
    initiator: identity("a", 3000),
    known_peers: vec![
      PeerDigest::new(identity("a", 3000), HeartbeatState::new(10, 5)),
      PeerDigest::new(identity("x", 3001), HeartbeatState::new(10, 100)),
      PeerDigest::new(identity("y", 3002), HeartbeatState::new(10, 150)),
    ],
  };
  let syn_ack = responder.on_syn(syn).await.unwrap();
  // "b" is unknown to the initiator, "x" is equal on both sides.
  let new = syn_ack.new_peers.iter().map(|p| p.key().as_str()).sorted().collect::<Vec<_>>();
  assert_eq!(new, vec!["b"]);
  let unknown = syn_ack.unknown_peers.iter().map(|p| p.key().as_str()).sorted().collect::<Vec<_>>();
  assert_eq!(unknown, vec!["a", "y"]);
}

#[tokio::test]
async fn test_ack_merges_and_notifies() {
  let me = DiscoveredPeer::owned(identity("b", 4000), 10, AppState::default());
  let repo = Arc::new(MemoryRepository::new(me, vec![]));
  repo.upsert_peer(Peer::Discovered(full("x", 3001, 100))).await.unwrap();
  let (notifier, mut rx) = ChannelNotifier::new();
  let responder = Responder::new(repo.clone(), Arc::new(notifier));

  let ack = Ack {
    initiator: identity("a", 3000),
    requested_peers: vec![full("a", 3000, 5), full("x", 3001, 50), full("b", 4000, 99)],
  };
  assert_eq!(responder.on_ack(ack).await.unwrap(), 1);
  let stored = repo.get_peer(&PublicKey::from("a")).await.unwrap().unwrap();
  assert!(stored.as_discovered().is_some());
  assert_eq!(rx.try_recv().unwrap().key().as_str(), "a");
  assert!(rx.try_recv().is_err());
  // The stale copy of "x" and our own record are left alone.
  let x = repo.get_peer(&PublicKey::from("x")).await.unwrap().unwrap();
  assert_eq!(x.heartbeat().elapsed_heartbeats, 100);
  assert!(repo.get_owned_peer().await.unwrap().is_owned());
}
