use crate::peer::{DiscoveredPeer, PeerDigest, PeerIdentity};
use serde::{Deserialize, Serialize};

/// Opens a round: everything the initiator knows, as digests.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Syn {
  pub initiator: PeerIdentity,
  pub known_peers: Vec<PeerDigest>,
}

/// The target's answer to a [`Syn`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SynAck {
  /// Full records the initiator lacks or holds stale.
  pub new_peers: Vec<DiscoveredPeer>,
  /// Peers the target lacks or holds stale, which the initiator should send back in full.
  pub unknown_peers: Vec<PeerDigest>,
}

/// Closes a round: the full records the target asked for.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Ack {
  pub initiator: PeerIdentity,
  pub requested_peers: Vec<DiscoveredPeer>,
}
