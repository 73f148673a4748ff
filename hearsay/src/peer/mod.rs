//! The records a node keeps about every member of the cluster, itself included.
//!
//! A [`PeerIdentity`] never changes. A [`HeartbeatState`] orders two copies of the same peer: the
//! generation (process start) first, then the elapsed heartbeats of that generation. An
//! [`AppState`] carries the health the peer reports about itself.
//!
//! Peers travel in two shapes. A [`PeerDigest`] is identity plus heartbeat and is cheap enough to
//! send for every known peer on every round. A [`DiscoveredPeer`] adds the [`AppState`] and is only
//! sent when the other side asked for it. Exactly one [`DiscoveredPeer`] in a peer table is
//! [owned](DiscoveredPeer::is_owned): the record of the local process.

mod app_state;
mod heartbeat;
mod identity;
mod record;

#[rustfmt::skip]
pub use {
  app_state::AppState,
  app_state::GeoPosition,
  app_state::PeerStatus,
  heartbeat::HeartbeatState,
  heartbeat::unix_millis,
  identity::Host,
  identity::PeerIdentity,
  identity::PublicKey,
  record::DiscoveredPeer,
  record::Peer,
  record::PeerDigest,
  record::PeerRecord,
  record::Seed,
};
