use crate::peer::{DiscoveredPeer, Peer, PeerRecord, PublicKey, Seed};
use crate::store::{Repository, RepositoryError, Upsert};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

struct Table {
  seeds: Vec<Seed>,
  owned: PublicKey,
  peers: im::HashMap<PublicKey, Peer>,
  unreachable: im::HashSet<PublicKey>,
}

/// A peer table held in memory. All writes go through one lock, so concurrent rounds of a cycle
/// can merge into it safely.
pub struct MemoryRepository {
  table: RwLock<Table>,
}
impl MemoryRepository {
  /// `owned` must be the record of the local process.
  pub fn new(owned: DiscoveredPeer, seeds: Vec<Seed>) -> MemoryRepository {
    let key = owned.key().clone();
    MemoryRepository {
      table: RwLock::new(Table {
        seeds: seeds,
        owned: key.clone(),
        peers: im::hashmap! { key => Peer::Discovered(owned) },
        unreachable: im::HashSet::new(),
      }),
    }
  }

  pub async fn len(&self) -> usize {
    self.table.read().await.peers.len()
  }
}
#[async_trait]
impl Repository for MemoryRepository {
  async fn list_seed_peers(&self) -> Result<Vec<Seed>, RepositoryError> {
    Ok(self.table.read().await.seeds.clone())
  }

  async fn list_known_peers(&self) -> Result<Vec<Peer>, RepositoryError> {
    Ok(self.table.read().await.peers.values().cloned().collect())
  }

  async fn list_reachable_peers(&self) -> Result<Vec<Peer>, RepositoryError> {
    let table = self.table.read().await;
    Ok(
      table
        .peers
        .iter()
        .filter(|(k, _)| **k != table.owned && !table.unreachable.contains(*k))
        .map(|(_, p)| p.clone())
        .collect(),
    )
  }

  async fn list_unreachable_peers(&self) -> Result<Vec<Peer>, RepositoryError> {
    let table = self.table.read().await;
    Ok(
      table
        .unreachable
        .iter()
        .filter_map(|k| table.peers.get(k).cloned())
        .collect(),
    )
  }

  async fn get_peer(&self, key: &PublicKey) -> Result<Option<Peer>, RepositoryError> {
    Ok(self.table.read().await.peers.get(key).cloned())
  }

  async fn get_owned_peer(&self) -> Result<DiscoveredPeer, RepositoryError> {
    let table = self.table.read().await;
    table
      .peers
      .get(&table.owned)
      .and_then(Peer::as_discovered)
      .cloned()
      .ok_or(RepositoryError::MissingOwned)
  }

  async fn upsert_peer(&self, peer: Peer) -> Result<Upsert, RepositoryError> {
    if peer.is_owned() {
      return Err(RepositoryError::OwnedOverwrite(peer.key().clone()));
    }
    let mut table = self.table.write().await;
    let outcome = match table.peers.get(peer.key()) {
      None => Upsert::Inserted,
      Some(existing) if peer.supersedes(existing) => Upsert::Updated,
      Some(_) => Upsert::Ignored,
    };
    trace!(peer = %peer.identity(), ?outcome, "upsert");
    if outcome != Upsert::Ignored {
      table.peers.insert(peer.key().clone(), peer);
    }
    Ok(outcome)
  }

  async fn update_owned_peer(&self, peer: DiscoveredPeer) -> Result<(), RepositoryError> {
    let mut table = self.table.write().await;
    if !peer.is_owned() || *peer.key() != table.owned {
      return Err(RepositoryError::OwnedOverwrite(peer.key().clone()));
    }
    let key = table.owned.clone();
    table.peers.insert(key, Peer::Discovered(peer));
    Ok(())
  }

  async fn set_reachable(&self, key: &PublicKey) -> Result<(), RepositoryError> {
    self.table.write().await.unreachable.remove(key);
    Ok(())
  }

  async fn set_unreachable(&self, key: &PublicKey) -> Result<(), RepositoryError> {
    let mut table = self.table.write().await;
    if *key != table.owned {
      table.unreachable.insert(key.clone());
    }
    Ok(())
  }
}

#[cfg(test)]
use crate::peer::{AppState, HeartbeatState, Host, PeerDigest, PeerIdentity};
#[cfg(test)]
use itertools::Itertools;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
fn identity(key: &str) -> PeerIdentity {
  PeerIdentity::new(key, Host::from("127.0.0.1"), 3000)
}

#[cfg(test)]
fn remote(key: &str, elapsed: u64) -> Peer {
  Peer::Discovered(DiscoveredPeer::new(
    identity(key),
    HeartbeatState::new(100, elapsed),
    AppState::default(),
  ))
}

#[cfg(test)]
fn repository() -> MemoryRepository {
  let me = DiscoveredPeer::owned(identity("me"), 100, AppState::default());
  MemoryRepository::new(me, vec![Seed::new(identity("seed"))])
}

#[tokio::test]
async fn test_upsert_keeps_most_recent() {
  let repo = repository();
  assert_eq!(repo.upsert_peer(remote("x", 10)).await.unwrap(), Upsert::Inserted);
  assert_eq!(repo.upsert_peer(remote("x", 5)).await.unwrap(), Upsert::Ignored);
  assert_eq!(repo.upsert_peer(remote("x", 10)).await.unwrap(), Upsert::Ignored);
  assert_eq!(repo.upsert_peer(remote("x", 20)).await.unwrap(), Upsert::Updated);
  let stored = repo.get_peer(&PublicKey::from("x")).await.unwrap().unwrap();
  assert_eq!(stored.heartbeat().elapsed_heartbeats, 20);
  assert_eq!(repo.len().await, 2);
}

#[tokio::test]
async fn test_full_record_replaces_digest() {
  let repo = repository();
  let digest = Peer::Digest(PeerDigest::new(identity("x"), HeartbeatState::new(100, 10)));
  repo.upsert_peer(digest).await.unwrap();
  assert_eq!(repo.upsert_peer(remote("x", 10)).await.unwrap(), Upsert::Updated);
  let stored = repo.get_peer(&PublicKey::from("x")).await.unwrap().unwrap();
  assert!(stored.as_discovered().is_some());
}

#[tokio::test]
async fn test_owned_peer_is_protected() {
  let repo = repository();
  assert!(matches!(
    repo.upsert_peer(remote("me", 1_000_000)).await.unwrap(),
    Upsert::Ignored
  ));
  let impostor = DiscoveredPeer::owned(identity("x"), 100, AppState::default());
  assert!(matches!(
    repo.upsert_peer(Peer::Discovered(impostor.clone())).await,
    Err(RepositoryError::OwnedOverwrite(_))
  ));
  assert!(repo.update_owned_peer(impostor).await.is_err());
  let mut me = repo.get_owned_peer().await.unwrap();
  me.heartbeat.beat(500);
  repo.update_owned_peer(me).await.unwrap();
  assert_eq!(repo.get_owned_peer().await.unwrap().heartbeat.elapsed_heartbeats, 400);
}

#[tokio::test]
async fn test_reachability_partitions_known_peers() {
  let repo = repository();
  repo.upsert_peer(remote("a", 1)).await.unwrap();
  repo.upsert_peer(remote("b", 1)).await.unwrap();
  repo.set_unreachable(&PublicKey::from("b")).await.unwrap();
  repo.set_unreachable(&PublicKey::from("me")).await.unwrap();
  let keys = |peers: Vec<Peer>| -> Vec<String> {
    peers.iter().map(|p| p.key().to_string()).sorted().collect()
  };
  assert_eq!(keys(repo.list_known_peers().await.unwrap()), vec!["a", "b", "me"]);
  assert_eq!(keys(repo.list_reachable_peers().await.unwrap()), vec!["a"]);
  assert_eq!(keys(repo.list_unreachable_peers().await.unwrap()), vec!["b"]);
  repo.set_reachable(&PublicKey::from("b")).await.unwrap();
  assert_eq!(keys(repo.list_reachable_peers().await.unwrap()), vec!["a", "b"]);
  assert!(repo.list_unreachable_peers().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upserts_converge_on_freshest() {
  let repo = Arc::new(repository());
  let handles = (1..=50u64)
    .map(|elapsed| {
      let repo = repo.clone();
      tokio::spawn(async move { repo.upsert_peer(remote("x", elapsed)).await })
    })
    .collect::<Vec<_>>();
  for handle in handles {
    handle.await.unwrap().unwrap();
  }
  let stored = repo.get_peer(&PublicKey::from("x")).await.unwrap().unwrap();
  assert_eq!(stored.heartbeat().elapsed_heartbeats, 50);
}
