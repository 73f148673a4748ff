use crate::notify::Notifier;
use crate::peer::{DiscoveredPeer, Peer, PeerRecord};
use crate::store::{Repository, RepositoryError};

/// Merges a record received from another node into the local table.
///
/// The heartbeat is frozen first. The notification goes out before the upsert and is not taken
/// back if the upsert fails. Returns whether the record was fresh.
pub async fn merge_discovered(
  repository: &dyn Repository,
  notifier: &dyn Notifier,
  mut peer: DiscoveredPeer,
  now: u64,
) -> Result<bool, RepositoryError> {
  peer.heartbeat.freeze(now);
  let peer = Peer::Discovered(peer);
  let fresh = match repository.get_peer(peer.key()).await? {
    None => true,
    Some(existing) => peer.supersedes(&existing),
  };
  if !fresh {
    return Ok(false);
  }
  notifier.notify(peer.clone());
  repository.upsert_peer(peer).await?;
  Ok(true)
}
