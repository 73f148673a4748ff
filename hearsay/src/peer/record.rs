use crate::peer::{AppState, HeartbeatState, PeerIdentity, PeerStatus, PublicKey};
use serde::{Deserialize, Serialize};

/// Anything carrying an identity and a heartbeat can be diffed and ordered.
pub trait PeerRecord {
  fn identity(&self) -> &PeerIdentity;
  fn heartbeat(&self) -> &HeartbeatState;

  fn key(&self) -> &PublicKey {
    self.identity().key()
  }

  fn endpoint(&self) -> String {
    self.identity().endpoint()
  }

  fn more_recent_than<R: PeerRecord + ?Sized>(&self, other: &R) -> bool {
    self.heartbeat().more_recent_than(other.heartbeat())
  }
}

/// Identity and heartbeat only. This is what a SYN carries.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PeerDigest {
  pub identity: PeerIdentity,
  pub heartbeat: HeartbeatState,
}
impl PeerDigest {
  pub fn new(identity: PeerIdentity, heartbeat: HeartbeatState) -> PeerDigest {
    PeerDigest {
      identity: identity,
      heartbeat: heartbeat,
    }
  }
}
impl PeerRecord for PeerDigest {
  fn identity(&self) -> &PeerIdentity {
    &self.identity
  }

  fn heartbeat(&self) -> &HeartbeatState {
    &self.heartbeat
  }
}

/// The full record of a peer, application state included.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DiscoveredPeer {
  pub identity: PeerIdentity,
  pub heartbeat: HeartbeatState,
  pub app_state: AppState,
  // Never on the wire: a record received from another node is never ours.
  #[serde(skip)]
  owned: bool,
}
impl DiscoveredPeer {
  pub fn new(
    identity: PeerIdentity,
    heartbeat: HeartbeatState,
    app_state: AppState,
  ) -> DiscoveredPeer {
    DiscoveredPeer {
      identity: identity,
      heartbeat: heartbeat,
      app_state: app_state,
      owned: false,
    }
  }

  /// The record of the local process, created once at startup.
  pub fn owned(
    identity: PeerIdentity,
    generation_time: u64,
    app_state: AppState,
  ) -> DiscoveredPeer {
    DiscoveredPeer {
      identity: identity,
      heartbeat: HeartbeatState::started_at(generation_time),
      app_state: app_state,
      owned: true,
    }
  }

  pub fn is_owned(&self) -> bool {
    self.owned
  }

  pub fn status(&self) -> PeerStatus {
    self.app_state.status
  }

  /// Overwrites the application state. Identity and heartbeat stay untouched.
  pub fn refresh(
    &mut self,
    status: PeerStatus,
    free_disk_space: u64,
    cpu_load: f64,
    discovered_peers_number: u32,
    p2p_factor: u32,
  ) {
    self.app_state = AppState {
      status: status,
      version: std::mem::take(&mut self.app_state.version),
      cpu_load: cpu_load,
      free_disk_space: free_disk_space,
      geo_position: self.app_state.geo_position,
      p2p_factor: p2p_factor,
      discovered_peers_number: discovered_peers_number,
    };
  }

  pub fn to_digest(&self) -> PeerDigest {
    PeerDigest::new(self.identity.clone(), self.heartbeat)
  }
}
impl PeerRecord for DiscoveredPeer {
  fn identity(&self) -> &PeerIdentity {
    &self.identity
  }

  fn heartbeat(&self) -> &HeartbeatState {
    &self.heartbeat
  }
}

/// A member of the local peer table, in one of its two shapes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Peer {
  Digest(PeerDigest),
  Discovered(DiscoveredPeer),
}
impl Peer {
  pub fn is_owned(&self) -> bool {
    match self {
      Peer::Digest(_) => false,
      Peer::Discovered(p) => p.is_owned(),
    }
  }

  pub fn to_digest(&self) -> PeerDigest {
    match self {
      Peer::Digest(d) => d.clone(),
      Peer::Discovered(p) => p.to_digest(),
    }
  }

  pub fn as_discovered(&self) -> Option<&DiscoveredPeer> {
    match self {
      Peer::Digest(_) => None,
      Peer::Discovered(p) => Some(p),
    }
  }

  pub fn into_discovered(self) -> Option<DiscoveredPeer> {
    match self {
      Peer::Digest(_) => None,
      Peer::Discovered(p) => Some(p),
    }
  }

  /// Whether this record should replace `existing` in a peer table. The owned record is never
  /// replaced. A full record also replaces a digest of the same age, since it carries more.
  pub fn supersedes(&self, existing: &Peer) -> bool {
    if existing.is_owned() {
      return false;
    }
    if self.more_recent_than(existing) {
      return true;
    }
    match (self, existing) {
      (Peer::Discovered(_), Peer::Digest(_)) => !existing.more_recent_than(self),
      _ => false,
    }
  }
}
impl PeerRecord for Peer {
  fn identity(&self) -> &PeerIdentity {
    match self {
      Peer::Digest(d) => &d.identity,
      Peer::Discovered(p) => &p.identity,
    }
  }

  fn heartbeat(&self) -> &HeartbeatState {
    match self {
      Peer::Digest(d) => &d.heartbeat,
      Peer::Discovered(p) => &p.heartbeat,
    }
  }
}
impl From<PeerDigest> for Peer {
  fn from(d: PeerDigest) -> Self {
    Peer::Digest(d)
  }
}
impl From<DiscoveredPeer> for Peer {
  fn from(p: DiscoveredPeer) -> Self {
    Peer::Discovered(p)
  }
}

/// A statically configured contact used to enter the cluster.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Seed {
  pub identity: PeerIdentity,
}
impl Seed {
  pub fn new(identity: PeerIdentity) -> Seed {
    Seed { identity: identity }
  }

  /// Nothing is known about a seed's clock, so its heartbeat is zero.
  pub fn to_digest(&self) -> PeerDigest {
    PeerDigest::new(self.identity.clone(), HeartbeatState::default())
  }
}

#[cfg(test)]
use crate::peer::{GeoPosition, Host};

#[cfg(test)]
fn identity(key: &str, port: u16) -> PeerIdentity {
  PeerIdentity::new(key, Host::from("127.0.0.1"), port)
}

#[test]
fn test_refresh_keeps_identity_and_heartbeat() {
  let geo = GeoPosition { lat: 48.85, lon: 2.35 };
  let mut me = DiscoveredPeer::owned(identity("me", 3000), 1_000, AppState::new("1.2.0", geo));
  me.heartbeat.beat(4_000);
  me.refresh(PeerStatus::Ok, 1 << 30, 0.25, 12, 3);
  assert_eq!(me.identity, identity("me", 3000));
  assert_eq!(me.heartbeat, HeartbeatState::new(1_000, 3_000));
  assert_eq!(me.status(), PeerStatus::Ok);
  assert_eq!(me.app_state.version, "1.2.0");
  assert_eq!(me.app_state.geo_position, geo);
  assert_eq!(me.app_state.discovered_peers_number, 12);
  assert_eq!(me.app_state.p2p_factor, 3);
  assert!(me.is_owned());
}

#[test]
fn test_owned_flag_is_not_serialized() {
  let me = DiscoveredPeer::owned(identity("me", 3000), 1_000, AppState::default());
  let bytes = serde_cbor::to_vec(&me).unwrap();
  let received: DiscoveredPeer = serde_cbor::from_slice(&bytes).unwrap();
  assert!(!received.is_owned());
  assert_eq!(received.identity, me.identity);
}

#[test]
fn test_supersedes() {
  let old = Peer::from(DiscoveredPeer::new(
    identity("x", 3001),
    HeartbeatState::new(1_000, 1_000),
    AppState::default(),
  ));
  let fresh = Peer::from(DiscoveredPeer::new(
    identity("x", 3001),
    HeartbeatState::new(1_000, 1_200),
    AppState::default(),
  ));
  let digest = Peer::from(PeerDigest::new(identity("x", 3001), HeartbeatState::new(1_000, 1_000)));
  assert!(fresh.supersedes(&old));
  assert!(!old.supersedes(&fresh));
  assert!(!old.supersedes(&old.clone()));
  assert!(old.supersedes(&digest));
  assert!(!digest.supersedes(&old));

  let me = Peer::from(DiscoveredPeer::owned(identity("x", 3001), 1_000, AppState::default()));
  assert!(!fresh.supersedes(&me));
}

#[test]
fn test_seed_digest_has_zero_heartbeat() {
  let seed = Seed::new(identity("seed", 3000));
  let digest = seed.to_digest();
  assert_eq!(digest.heartbeat, HeartbeatState::default());
  assert_eq!(digest.endpoint(), "127.0.0.1:3000");
}
