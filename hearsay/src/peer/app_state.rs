use serde::{Deserialize, Serialize};

/// Health of a peer as judged by the peer itself.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum PeerStatus {
  /// Still joining: has not seen enough of the cluster yet.
  Bootstrapping,
  Ok,
  /// A required local service or internet access is missing.
  Faulty,
  /// Clock is out of sync; the peer may store data but must not take part in anything time
  /// sensitive.
  StorageOnly,
}
impl Default for PeerStatus {
  fn default() -> Self {
    PeerStatus::Bootstrapping
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct GeoPosition {
  pub lat: f64,
  pub lon: f64,
}

/// Application level state of a peer. Replaced as a whole on every refresh.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AppState {
  pub status: PeerStatus,
  pub version: String,
  /// Load average per CPU.
  pub cpu_load: f64,
  /// In bytes.
  pub free_disk_space: u64,
  pub geo_position: GeoPosition,
  pub p2p_factor: u32,
  /// Number of peers this peer knows about, itself excluded.
  pub discovered_peers_number: u32,
}
impl AppState {
  pub fn new<S: Into<String>>(version: S, geo_position: GeoPosition) -> AppState {
    AppState {
      version: version.into(),
      geo_position: geo_position,
      ..Default::default()
    }
  }
}
