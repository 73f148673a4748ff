use crate::error::GossipError;
use crate::gossip::{Ack, RoundOutputs, Syn};
use crate::peer::{Peer, PeerDigest, PeerIdentity, PeerRecord};
use crate::store::Repository;
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use tracing::{debug, trace};

/// One SYN, SYN-ACK, ACK exchange with a single target. Never retried: the next tick will pick
/// targets again.
pub struct Round {
  transport: Arc<dyn Transport>,
  repository: Arc<dyn Repository>,
  initiator: PeerIdentity,
  digests: Arc<[PeerDigest]>,
  target: PeerIdentity,
}
impl Round {
  /// `digests` is the initiator's whole table, shared between the rounds of a cycle.
  pub fn new(
    transport: Arc<dyn Transport>,
    repository: Arc<dyn Repository>,
    initiator: PeerIdentity,
    digests: Arc<[PeerDigest]>,
    target: PeerIdentity,
  ) -> Round {
    Round {
      transport: transport,
      repository: repository,
      initiator: initiator,
      digests: digests,
      target: target,
    }
  }

  pub fn target(&self) -> &PeerIdentity {
    &self.target
  }

  /// Runs the exchange. An unreachable target is reported on `outputs` and is not an error.
  pub async fn run(self, outputs: &RoundOutputs) -> Result<(), GossipError> {
    let syn = Syn {
      initiator: self.initiator.clone(),
      known_peers: self.digests.to_vec(),
    };
    trace!(to = %self.target, digests = syn.known_peers.len(), "sending SYN");
    let syn_ack = match self.transport.send_syn(&self.target, syn).await {
      Ok(syn_ack) => syn_ack,
      Err(TransportError::Unreachable(reason)) => {
        debug!(to = %self.target, %reason, "SYN target unreachable");
        outputs.unreachable(self.target.clone());
        return Ok(());
      }
      Err(e) => return Err(e.into()),
    };
    outputs.reachable(self.target.clone());
    debug!(
      to = %self.target,
      new = syn_ack.new_peers.len(),
      unknown = syn_ack.unknown_peers.len(),
      "SYN-ACK received"
    );

    for peer in syn_ack.new_peers {
      if peer.identity.is_same_node(&self.initiator) {
        continue;
      }
      outputs.discovered(peer);
    }

    if syn_ack.unknown_peers.is_empty() {
      return Ok(());
    }
    let mut requested = Vec::with_capacity(syn_ack.unknown_peers.len());
    for digest in syn_ack.unknown_peers.iter() {
      match self.repository.get_peer(digest.key()).await? {
        Some(Peer::Discovered(p)) => requested.push(p),
        _ => trace!(peer = %digest.identity, "no full record to send"),
      }
    }
    if requested.is_empty() {
      return Ok(());
    }
    let ack = Ack {
      initiator: self.initiator.clone(),
      requested_peers: requested,
    };
    trace!(to = %self.target, peers = ack.requested_peers.len(), "sending ACK");
    match self.transport.send_ack(&self.target, ack).await {
      Ok(()) => Ok(()),
      Err(TransportError::Unreachable(reason)) => {
        debug!(to = %self.target, %reason, "ACK target unreachable");
        outputs.unreachable(self.target.clone());
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }
}

#[cfg(test)]
use crate::gossip::{round_channels, SynAck};
#[cfg(test)]
use crate::peer::{AppState, DiscoveredPeer, HeartbeatState, Host};
#[cfg(test)]
use crate::store::MemoryRepository;
#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use tokio::sync::Mutex;

#[cfg(test)]
struct ScriptedTransport {
  syn: Mutex<Option<Result<SynAck, TransportError>>>,
  ack: Mutex<Option<TransportError>>,
  syns: Mutex<Vec<Syn>>,
  acks: Mutex<Vec<Ack>>,
}
#[cfg(test)]
impl ScriptedTransport {
  fn new(syn: Result<SynAck, TransportError>) -> ScriptedTransport {
    ScriptedTransport {
      syn: Mutex::new(Some(syn)),
      ack: Mutex::new(None),
      syns: Mutex::new(vec![]),
      acks: Mutex::new(vec![]),
    }
  }
}
#[cfg(test)]
#[async_trait]
impl Transport for ScriptedTransport {
  async fn send_syn(&self, _: &PeerIdentity, syn: Syn) -> Result<SynAck, TransportError> {
    self.syns.lock().await.push(syn);
    self.syn.lock().await.take().unwrap()
  }

  async fn send_ack(&self, _: &PeerIdentity, ack: Ack) -> Result<(), TransportError> {
    self.acks.lock().await.push(ack);
    match self.ack.lock().await.take() {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

#[cfg(test)]
fn identity(key: &str, port: u16) -> PeerIdentity {
  PeerIdentity::new(key, Host::from("127.0.0.1"), port)
}

#[cfg(test)]
fn full(key: &str, port: u16, elapsed: u64) -> DiscoveredPeer {
  DiscoveredPeer::new(identity(key, port), HeartbeatState::new(10, elapsed), AppState::default())
}

#[cfg(test)]
async fn round_with(transport: Arc<ScriptedTransport>) -> (Round, Arc<MemoryRepository>) {
  let me = DiscoveredPeer::owned(identity("me", 3000), 10, AppState::default());
  let repo = Arc::new(MemoryRepository::new(me, vec![]));
  repo.upsert_peer(Peer::Discovered(full("a", 3001, 50))).await.unwrap();
  let digests = repo
    .list_known_peers()
    .await
    .unwrap()
    .iter()
    .map(Peer::to_digest)
    .collect::<Arc<[PeerDigest]>>();
  let round = Round::new(
    transport,
    repo.clone(),
    identity("me", 3000),
    digests,
    identity("target", 4000),
  );
  (round, repo)
}

#[tokio::test]
async fn test_unreachable_syn_is_not_an_error() {
  let transport = Arc::new(ScriptedTransport::new(Err(TransportError::Unreachable(
    "refused".to_string(),
  ))));
  let (round, _) = round_with(transport.clone()).await;
  let (outputs, inbox) = round_channels();
  round.run(&outputs).await.unwrap();
  drop(outputs);
  let report = inbox.drain(vec![]);
  assert_eq!(report.unreachable, vec![identity("target", 4000)]);
  assert!(report.reachable.is_empty());
  assert!(report.discovered.is_empty());
  assert!(transport.acks.lock().await.is_empty());
}

#[tokio::test]
async fn test_other_transport_errors_escalate() {
  let transport = Arc::new(ScriptedTransport::new(Err(TransportError::Remote(
    "corrupt".to_string(),
  ))));
  let (round, _) = round_with(transport).await;
  let (outputs, inbox) = round_channels();
  assert!(matches!(
    round.run(&outputs).await,
    Err(GossipError::Transport(TransportError::Remote(_)))
  ));
  drop(outputs);
  let report = inbox.drain(vec![]);
  assert!(report.reachable.is_empty() && report.unreachable.is_empty());
}

#[tokio::test]
async fn test_syn_ack_is_answered_with_full_records() {
  let syn_ack = SynAck {
    new_peers: vec![full("b", 3002, 7), full("me", 3000, 1)],
    unknown_peers: vec![
      full("a", 3001, 50).to_digest(),
      full("me", 3000, 1).to_digest(),
      full("never-heard-of", 3009, 1).to_digest(),
    ],
  };
  let transport = Arc::new(ScriptedTransport::new(Ok(syn_ack)));
  let (round, _) = round_with(transport.clone()).await;
  let (outputs, inbox) = round_channels();
  round.run(&outputs).await.unwrap();
  drop(outputs);

  let syns = transport.syns.lock().await;
  assert_eq!(syns[0].known_peers.len(), 2);

  let report = inbox.drain(vec![]);
  assert_eq!(report.reachable, vec![identity("target", 4000)]);
  // Our own record coming back is not a discovery.
  assert_eq!(report.discovered, vec![full("b", 3002, 7)]);

  let acks = transport.acks.lock().await;
  assert_eq!(acks.len(), 1);
  let sent = acks[0]
    .requested_peers
    .iter()
    .map(|p| p.key().as_str())
    .collect::<Vec<_>>();
  assert_eq!(sent, vec!["a", "me"]);
  assert_eq!(acks[0].initiator, identity("me", 3000));
}

#[tokio::test]
async fn test_unreachable_ack_is_not_an_error() {
  let syn_ack = SynAck {
    new_peers: vec![],
    unknown_peers: vec![full("a", 3001, 50).to_digest()],
  };
  let transport = Arc::new(ScriptedTransport::new(Ok(syn_ack)));
  *transport.ack.lock().await = Some(TransportError::Unreachable("gone".to_string()));
  let (round, _) = round_with(transport).await;
  let (outputs, inbox) = round_channels();
  round.run(&outputs).await.unwrap();
  drop(outputs);
  let report = inbox.drain(vec![]);
  assert_eq!(report.reachable, vec![identity("target", 4000)]);
  assert_eq!(report.unreachable, vec![identity("target", 4000)]);
}
