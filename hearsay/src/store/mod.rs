//! Where the local peer table lives.
//!
//! The gossip core reads and writes the table through [`Repository`] only. [`MemoryRepository`] is
//! the in-process implementation; other backends only need to keep the same upsert rule: a record
//! replaces the stored one only if it [supersedes](crate::peer::Peer::supersedes) it, checked and
//! written in one critical section.

mod memory;

use crate::peer::{DiscoveredPeer, Peer, PublicKey, Seed};
use async_trait::async_trait;

#[rustfmt::skip]
pub use {
  memory::MemoryRepository,
};

/// What an upsert did to the table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Upsert {
  Inserted,
  Updated,
  /// The stored record was at least as recent.
  Ignored,
}

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
  #[error("the owned peer is missing from the table")]
  MissingOwned,
  #[error("refusing to overwrite the owned peer with {0}")]
  OwnedOverwrite(PublicKey),
  #[error("storage backend failure: {0}")]
  Backend(String),
}

#[async_trait]
pub trait Repository: Send + Sync {
  async fn list_seed_peers(&self) -> Result<Vec<Seed>, RepositoryError>;

  /// Every peer in the table, the owned one included.
  async fn list_known_peers(&self) -> Result<Vec<Peer>, RepositoryError>;

  /// Known peers that did not fail their last exchange. Excludes the owned peer.
  async fn list_reachable_peers(&self) -> Result<Vec<Peer>, RepositoryError>;

  /// Known peers that failed their last exchange.
  async fn list_unreachable_peers(&self) -> Result<Vec<Peer>, RepositoryError>;

  async fn get_peer(&self, key: &PublicKey) -> Result<Option<Peer>, RepositoryError>;

  async fn get_owned_peer(&self) -> Result<DiscoveredPeer, RepositoryError>;

  /// Inserts or supersedes a remote record. Owned records are rejected.
  async fn upsert_peer(&self, peer: Peer) -> Result<Upsert, RepositoryError>;

  /// Replaces the owned record with a refreshed copy of itself.
  async fn update_owned_peer(&self, peer: DiscoveredPeer) -> Result<(), RepositoryError>;

  async fn set_reachable(&self, key: &PublicKey) -> Result<(), RepositoryError>;

  async fn set_unreachable(&self, key: &PublicKey) -> Result<(), RepositoryError>;
}
