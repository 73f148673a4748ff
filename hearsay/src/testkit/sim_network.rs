use crate::gossip::{Ack, Responder, Syn, SynAck};
use crate::peer::PeerIdentity;
use crate::testkit::{FailureConfig, FailureConfigMap};
use crate::transport::{decode, encode, Transport, TransportError};
use async_trait::async_trait;
use im::HashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::trace;

/// An in-process network of [`Responder`]s, addressed by endpoint.
///
/// Every message and answer goes through the wire codec, so what a node receives is exactly what
/// it would receive over TCP. Unknown endpoints are unreachable.
pub struct SimNetwork {
  nodes: RwLock<HashMap<String, Arc<Responder>>>,
  failures: RwLock<FailureConfigMap>,
  rng: Mutex<SmallRng>,
  syns: AtomicUsize,
  acks: AtomicUsize,
}
impl SimNetwork {
  pub fn new() -> SimNetwork {
    SimNetwork::with_seed(0)
  }

  /// `seed` drives message drops.
  pub fn with_seed(seed: u64) -> SimNetwork {
    SimNetwork {
      nodes: RwLock::new(HashMap::new()),
      failures: RwLock::new(FailureConfigMap::default()),
      rng: Mutex::new(SmallRng::seed_from_u64(seed)),
      syns: AtomicUsize::new(0),
      acks: AtomicUsize::new(0),
    }
  }

  pub async fn register(&self, identity: &PeerIdentity, responder: Arc<Responder>) {
    self.nodes.write().await.insert(identity.endpoint(), responder);
  }

  pub async fn unregister(&self, identity: &PeerIdentity) {
    self.nodes.write().await.remove(&identity.endpoint());
  }

  pub async fn set_failure(&self, identity: &PeerIdentity, cfg: FailureConfig) {
    self.failures.write().await.node_wide.insert(identity.endpoint(), cfg);
  }

  pub async fn clear_failure(&self, identity: &PeerIdentity) {
    self.failures.write().await.node_wide.remove(&identity.endpoint());
  }

  pub async fn set_cluster_failure(&self, cfg: FailureConfig) {
    self.failures.write().await.cluster_wide = cfg;
  }

  /// SYNs that reached a responder.
  pub fn syns_delivered(&self) -> usize {
    self.syns.load(Ordering::SeqCst)
  }

  /// ACKs that reached a responder.
  pub fn acks_delivered(&self) -> usize {
    self.acks.load(Ordering::SeqCst)
  }

  async fn route(&self, target: &PeerIdentity) -> Result<Arc<Responder>, TransportError> {
    let endpoint = target.endpoint();
    let cfg = *self.failures.read().await.get(&endpoint);
    if cfg.down {
      return Err(TransportError::Unreachable(format!("{} is down", endpoint)));
    }
    if cfg.broken {
      return Err(TransportError::Remote(format!("{} answered garbage", endpoint)));
    }
    if cfg.drop_prob > 0.0 && self.rng.lock().await.gen::<f64>() < cfg.drop_prob {
      trace!(to = %target, "message dropped");
      return Err(TransportError::Unreachable(format!("message to {} lost", endpoint)));
    }
    self
      .nodes
      .read()
      .await
      .get(&endpoint)
      .cloned()
      .ok_or_else(|| TransportError::Unreachable(format!("nothing listens on {}", endpoint)))
  }
}
impl Default for SimNetwork {
  fn default() -> Self {
    SimNetwork::new()
  }
}
#[async_trait]
impl Transport for SimNetwork {
  async fn send_syn(&self, target: &PeerIdentity, syn: Syn) -> Result<SynAck, TransportError> {
    let responder = self.route(target).await?;
    let syn_ack = responder
      .on_syn(wire(&syn)?)
      .await
      .map_err(|e| TransportError::Remote(e.to_string()))?;
    self.syns.fetch_add(1, Ordering::SeqCst);
    wire(&syn_ack)
  }

  async fn send_ack(&self, target: &PeerIdentity, ack: Ack) -> Result<(), TransportError> {
    let responder = self.route(target).await?;
    self.acks.fetch_add(1, Ordering::SeqCst);
    responder
      .on_ack(wire(&ack)?)
      .await
      .map(|_| ())
      .map_err(|e| TransportError::Remote(e.to_string()))
  }
}

fn wire<T: Serialize + DeserializeOwned>(item: &T) -> Result<T, TransportError> {
  decode(&encode(item)?)
}
